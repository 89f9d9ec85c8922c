//! A table kept entirely on the local file system: metadata files plus manifest blobs.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use manifest_kernel::committer::FileSystemCommitter;
use manifest_kernel::manifest::ManifestStatus;
use manifest_kernel::storage::LocalBlobStore;
use manifest_kernel::table_metadata::{FormatVersion, TableMetadata};
use manifest_kernel::table_properties::{COMMIT_MIN_RETRY_WAIT_MS, MANIFEST_MIN_MERGE_COUNT};
use manifest_kernel::{BlobStore, Table};
use test_utils::{bucket_file, bucket_spec, file_a, file_b, test_schema};
use url::Url;

fn create_table(root: &Path, properties: &[(&str, &str)]) -> Table {
    let metadata = TableMetadata::builder(
        Url::from_directory_path(root).unwrap(),
        test_schema(),
        bucket_spec(),
        FormatVersion::V2,
    )
    .with_properties([(COMMIT_MIN_RETRY_WAIT_MS, "0")])
    .with_properties(properties.iter().copied())
    .build()
    .unwrap();
    let committer = FileSystemCommitter::create(root.join("metadata"), &metadata).unwrap();
    open_table_with(root, committer)
}

fn open_table_with(root: &Path, committer: FileSystemCommitter) -> Table {
    let store = LocalBlobStore::try_new(root.join("manifests")).unwrap();
    Table::new(Arc::new(committer), Arc::new(store))
}

#[test]
fn commits_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let table = create_table(&root, &[]);

    let mut append = table.new_append();
    append.append_file(file_a()).append_file(file_b());
    let s1 = append.commit().unwrap();
    let mut delete = table.new_delete();
    delete.delete_data_file(&file_a());
    let s2 = delete.commit().unwrap();
    assert_eq!(table.version().unwrap(), 2);
    assert!(root
        .join("metadata")
        .join("00000000000000000002.metadata.json")
        .is_file());

    let reopened = open_table_with(&root, FileSystemCommitter::open(root.join("metadata")).unwrap());
    assert_eq!(reopened.version().unwrap(), 2);
    assert_eq!(reopened.current_snapshot().unwrap(), Some(s2.clone()));
    assert_eq!(reopened.snapshot(s1.snapshot_id()).unwrap(), s1);

    let entries = s2.all_manifests()[0]
        .entries(reopened.store().as_ref(), reopened.codec().as_ref())
        .unwrap();
    let statuses: Vec<_> = entries.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![ManifestStatus::Deleted, ManifestStatus::Existing]);
    let live = s2
        .live_entries(reopened.store().as_ref(), reopened.codec().as_ref())
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].data_file, file_b());
}

#[test]
fn racing_writers_on_one_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let table = create_table(&root, &[(MANIFEST_MIN_MERGE_COUNT, "3")]);

    let handles: Vec<_> = (0..3)
        .map(|n| {
            let root = root.clone();
            thread::spawn(move || {
                let committer = FileSystemCommitter::open(root.join("metadata")).unwrap();
                let table = open_table_with(&root, committer);
                let mut append = table.new_append();
                append.append_file(bucket_file(&format!("/path/to/data-{n}.parquet"), n));
                append.commit().unwrap().snapshot_id()
            })
        })
        .collect();
    let mut ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);

    let metadata = table.metadata().unwrap();
    assert_eq!(table.version().unwrap(), 3);
    let current = metadata.current_snapshot().unwrap();
    let live = current
        .live_entries(table.store().as_ref(), table.codec().as_ref())
        .unwrap();
    assert_eq!(live.len(), 3);

    // every manifest left in the directory belongs to some snapshot
    let referenced: Vec<&Url> = metadata
        .snapshots()
        .iter()
        .flat_map(|s| s.all_manifests().iter().map(|m| &m.manifest_path))
        .collect();
    for blob in table.store().list().unwrap() {
        assert!(referenced.contains(&&blob), "orphan manifest {blob}");
    }
}
