//! Merge appends: how manifests of successive appends are combined.

use manifest_kernel::manifest::{ManifestEntry, ManifestStatus};
use manifest_kernel::snapshot::{
    ADDED_DATA_FILES, EXISTING_DATA_FILES, MANIFESTS_CREATED, MANIFESTS_KEPT, MANIFESTS_REPLACED,
    TOTAL_DATA_FILES,
};
use manifest_kernel::table_metadata::FormatVersion;
use manifest_kernel::table_properties::{
    MANIFEST_MERGE_ENABLED, MANIFEST_MIN_MERGE_COUNT, MANIFEST_TARGET_SIZE_BYTES,
};
use manifest_kernel::BlobStore;
use rstest::rstest;
use test_utils::{file_a, file_b, file_c, file_d, write_staged_manifest, TestTable};

fn statuses(entries: &[ManifestEntry]) -> Vec<(String, ManifestStatus, Option<i64>)> {
    entries
        .iter()
        .map(|e| (e.data_file.file_path.clone(), e.status, e.snapshot_id))
        .collect()
}

#[rstest]
fn append_to_empty_table(#[values(FormatVersion::V1, FormatVersion::V2)] version: FormatVersion) {
    let t = TestTable::new(version, &[]);
    let mut append = t.table.new_append();
    append.append_file(file_a()).append_file(file_b());
    let snapshot = append.commit().unwrap();

    assert_eq!(snapshot.snapshot_id(), 1);
    assert_eq!(snapshot.sequence_number(), 1);
    assert_eq!(snapshot.parent_snapshot_id(), None);
    assert_eq!(snapshot.all_manifests().len(), 1);

    let manifest = &snapshot.all_manifests()[0];
    assert_eq!(manifest.added_snapshot_id, Some(1));
    assert_eq!(manifest.added_files_count, 2);
    let entries = manifest
        .entries(t.store.as_ref(), t.table.codec().as_ref())
        .unwrap();
    assert_eq!(
        statuses(&entries),
        vec![
            (file_a().file_path, ManifestStatus::Added, Some(1)),
            (file_b().file_path, ManifestStatus::Added, Some(1)),
        ]
    );
    assert_eq!(snapshot.summary().get(ADDED_DATA_FILES), Some("2"));
    assert_eq!(snapshot.summary().get(TOTAL_DATA_FILES), Some("2"));
    assert!(t.orphan_blobs().is_empty());
}

#[test]
fn merge_with_min_count_one() {
    let t = TestTable::new(FormatVersion::V2, &[]);
    let mut append = t.table.new_append();
    append.append_file(file_a()).append_file(file_b());
    let s1 = append.commit().unwrap();
    assert_eq!(s1.all_manifests().len(), 1);

    let mut update = t.table.update_properties();
    update.set(MANIFEST_MIN_MERGE_COUNT, "1").unwrap();
    update.commit().unwrap();

    let mut append = t.table.new_append();
    append.append_file(file_c()).append_file(file_d());
    let s2 = append.commit().unwrap();

    assert_eq!(s2.parent_snapshot_id(), Some(s1.snapshot_id()));
    assert_eq!(s2.all_manifests().len(), 1);
    let merged = &s2.all_manifests()[0];
    assert_eq!(merged.added_snapshot_id, Some(s2.snapshot_id()));
    assert_ne!(merged.manifest_path, s1.all_manifests()[0].manifest_path);

    let entries = merged
        .entries(t.store.as_ref(), t.table.codec().as_ref())
        .unwrap();
    assert_eq!(
        statuses(&entries),
        vec![
            (file_c().file_path, ManifestStatus::Added, Some(2)),
            (file_d().file_path, ManifestStatus::Added, Some(2)),
            (file_a().file_path, ManifestStatus::Existing, Some(1)),
            (file_b().file_path, ManifestStatus::Existing, Some(1)),
        ]
    );

    let summary = s2.summary();
    assert_eq!(summary.get(MANIFESTS_CREATED), Some("1"));
    assert_eq!(summary.get(MANIFESTS_KEPT), Some("0"));
    assert_eq!(summary.get(MANIFESTS_REPLACED), Some("1"));
    assert_eq!(summary.get(EXISTING_DATA_FILES), Some("2"));
    assert_eq!(summary.get(TOTAL_DATA_FILES), Some("4"));

    // the manifest of the new files was merged away before the commit
    assert!(t.orphan_blobs().is_empty());
}

#[rstest]
#[case::below_min_count(3, 2)]
#[case::at_min_count(2, 1)]
fn min_count_decides_merge(#[case] min_count: u32, #[case] expected_manifests: usize) {
    let min_count = min_count.to_string();
    let t = TestTable::new(
        FormatVersion::V2,
        &[(MANIFEST_MIN_MERGE_COUNT, min_count.as_str())],
    );
    let mut append = t.table.new_append();
    append.append_file(file_a());
    append.commit().unwrap();

    let mut append = t.table.new_append();
    append.append_file(file_b());
    let snapshot = append.commit().unwrap();
    assert_eq!(snapshot.all_manifests().len(), expected_manifests);
    assert_eq!(t.live_paths().len(), 2);
}

#[test]
fn merging_disabled_adds_one_manifest_per_append() {
    let t = TestTable::new(
        FormatVersion::V2,
        &[(MANIFEST_MIN_MERGE_COUNT, "1"), (MANIFEST_MERGE_ENABLED, "false")],
    );
    for (n, file) in [file_a(), file_b(), file_c()].into_iter().enumerate() {
        let mut append = t.table.new_append();
        append.append_file(file);
        let snapshot = append.commit().unwrap();
        assert_eq!(snapshot.all_manifests().len(), n + 1);
    }
}

#[test]
fn size_target_prevents_merging() {
    let t = TestTable::new(
        FormatVersion::V2,
        &[(MANIFEST_MIN_MERGE_COUNT, "1"), (MANIFEST_TARGET_SIZE_BYTES, "1")],
    );
    let mut append = t.table.new_append();
    append.append_file(file_a());
    let s1 = append.commit().unwrap();

    let mut append = t.table.new_append();
    append.append_file(file_b());
    let s2 = append.commit().unwrap();

    // every manifest is larger than the target, so each one is its own bin
    assert_eq!(s2.all_manifests().len(), 2);
    assert_eq!(s2.all_manifests()[1], s1.all_manifests()[0]);
    assert_eq!(s2.all_manifests()[0].added_snapshot_id, Some(s2.snapshot_id()));
}

#[test]
fn merge_with_appended_manifest() {
    let t = TestTable::new(FormatVersion::V2, &[(MANIFEST_MIN_MERGE_COUNT, "1")]);
    let mut append = t.table.new_append();
    append.append_file(file_a());
    append.commit().unwrap();

    let staged = write_staged_manifest(&t.table, [file_c(), file_d()]);
    let mut append = t.table.new_append();
    append.append_file(file_b());
    append.append_manifest(staged.clone()).unwrap();
    let snapshot = append.commit().unwrap();

    assert_eq!(snapshot.all_manifests().len(), 1);
    let entries = snapshot.all_manifests()[0]
        .entries(t.store.as_ref(), t.table.codec().as_ref())
        .unwrap();
    assert_eq!(
        statuses(&entries),
        vec![
            (file_b().file_path, ManifestStatus::Added, Some(2)),
            (file_c().file_path, ManifestStatus::Added, Some(2)),
            (file_d().file_path, ManifestStatus::Added, Some(2)),
            (file_a().file_path, ManifestStatus::Existing, Some(1)),
        ]
    );
    // without inheritance the table copies the manifest and the caller keeps the original
    assert!(t.store.exists(&staged.manifest_path).unwrap());
}

#[test]
fn appended_manifests_into_empty_table() {
    let t = TestTable::new(FormatVersion::V2, &[]);
    let first = write_staged_manifest(&t.table, [file_a(), file_b()]);
    let second = write_staged_manifest(&t.table, [file_c()]);

    let mut append = t.table.new_append();
    append.append_manifest(first).unwrap();
    append.append_manifest(second).unwrap();
    let snapshot = append.commit().unwrap();

    assert_eq!(snapshot.all_manifests().len(), 2);
    for manifest in snapshot.all_manifests() {
        assert_eq!(manifest.added_snapshot_id, Some(1));
        assert_eq!(manifest.existing_files_count, 0);
        for entry in manifest
            .entries(t.store.as_ref(), t.table.codec().as_ref())
            .unwrap()
        {
            assert_eq!(entry.status, ManifestStatus::Added);
            assert_eq!(entry.snapshot_id, Some(1));
            assert_eq!(entry.sequence_number, Some(1));
        }
    }
    assert_eq!(
        t.live_paths(),
        vec![file_a().file_path, file_b().file_path, file_c().file_path]
    );
}

#[test]
fn appending_nothing_keeps_parent_manifests() {
    let t = TestTable::new(FormatVersion::V2, &[]);
    let mut append = t.table.new_append();
    append.append_file(file_a());
    let s1 = append.commit().unwrap();

    let s2 = t.table.new_append().commit().unwrap();
    assert_eq!(s2.all_manifests(), s1.all_manifests());
    assert_eq!(s2.summary().get(MANIFESTS_KEPT), Some("1"));
    assert_eq!(s2.summary().get(MANIFESTS_CREATED), Some("0"));
}
