//! Table updates and the machinery that turns them into new table versions.
//!
//! Every update is built against a base [`TableMetadata`] and committed through
//! [`commit_with_retries`]: the snapshot operations ([`AppendFiles`], [`FastAppend`],
//! [`DeleteFiles`], [`OverwriteFiles`]) as well as [`UpdatePartitionSpec`] and
//! [`UpdateProperties`].
//!
//! The snapshot operations share one [`SnapshotProducer`]. It writes the manifests a new snapshot
//! needs and remembers them, keyed by what they depend on, so that rebuilding against a refreshed
//! base after a conflict rewrites only what actually changed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::manifest::{
    DataFile, Manifest, ManifestCodec, ManifestEntry, ManifestFile, ManifestStatus, ManifestWriter,
};
use crate::merge::{ManifestBin, ManifestMergePlanner};
use crate::snapshot::{Operation, Snapshot, SnapshotRef, SummaryCollector};
use crate::storage::BlobStore;
use crate::table_metadata::{TableMetadata, TableMetadataRef};
use crate::table_properties::TableProperties;
use crate::utils::{current_time_ms, require};
use crate::{Error, KernelResult};

mod append;
mod commit;
mod delete;
mod update_properties;
mod update_spec;

pub use append::{AppendFiles, FastAppend};
pub(crate) use commit::{commit_with_retries, PendingUpdate};
pub use delete::{DeleteFiles, OverwriteFiles};
pub use update_properties::UpdateProperties;
pub use update_spec::UpdatePartitionSpec;

/// Whether a snapshot operation bin-packs the manifests of the new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeMode {
    /// Merge according to the table's merge properties.
    Merge,
    /// Never merge; new manifests are only added.
    Fast,
}

/// Manifests written for the operation's own data files. `snapshot_id` is `None` when the entries
/// inherit it, which makes them valid for any snapshot id.
#[derive(Debug)]
struct NewFilesManifests {
    snapshot_id: Option<i64>,
    file_count: usize,
    manifests: Vec<ManifestFile>,
}

/// Builds candidate snapshots from pending file changes.
#[derive(Debug)]
pub(crate) struct SnapshotProducer {
    store: Arc<dyn BlobStore>,
    codec: Arc<dyn ManifestCodec>,
    merge_mode: MergeMode,
    snapshot_id: Option<i64>,

    added_files: Vec<DataFile>,
    appended_manifests: Vec<ManifestFile>,
    deleted_paths: BTreeSet<String>,
    validate_deletes: bool,

    new_files: Option<NewFilesManifests>,
    appended_copies: HashMap<(Url, i64), ManifestFile>,
    // keyed by the manifest, the snapshot id and the paths it deletes from that manifest
    filtered: HashMap<(Url, i64, Vec<String>), ManifestFile>,
    merged: HashMap<(Vec<Url>, i64), ManifestFile>,
    // every blob this producer wrote and has not deleted
    written: HashSet<Url>,
    // caller manifests the last build committed without rewriting them
    committed_as_is: Vec<ManifestFile>,
}

impl SnapshotProducer {
    pub(crate) fn new(
        store: Arc<dyn BlobStore>,
        codec: Arc<dyn ManifestCodec>,
        merge_mode: MergeMode,
    ) -> Self {
        Self {
            store,
            codec,
            merge_mode,
            snapshot_id: None,
            added_files: vec![],
            appended_manifests: vec![],
            deleted_paths: BTreeSet::new(),
            validate_deletes: false,
            new_files: None,
            appended_copies: HashMap::new(),
            filtered: HashMap::new(),
            merged: HashMap::new(),
            written: HashSet::new(),
            committed_as_is: vec![],
        }
    }

    pub(crate) fn add_file(&mut self, file: DataFile) {
        self.added_files.push(file);
    }

    /// Queue a manifest of staged entries. Only EXISTING entries may be appended.
    pub(crate) fn add_manifest(&mut self, manifest: ManifestFile) -> KernelResult<()> {
        require!(
            !manifest.has_added_files(),
            Error::validation("Cannot append manifest with added files")
        );
        require!(
            !manifest.has_deleted_files(),
            Error::validation("Cannot append manifest with deleted files")
        );
        self.appended_manifests.push(manifest);
        Ok(())
    }

    pub(crate) fn delete_path(&mut self, path: impl Into<String>) {
        self.deleted_paths.insert(path.into());
    }

    pub(crate) fn validate_deletes(&mut self) {
        self.validate_deletes = true;
    }

    fn operation(&self) -> Operation {
        let adds = !self.added_files.is_empty() || !self.appended_manifests.is_empty();
        match (adds, self.deleted_paths.is_empty()) {
            (_, true) => Operation::Append,
            (false, false) => Operation::Delete,
            (true, false) => Operation::Overwrite,
        }
    }

    /// Keep the snapshot id across builds unless `base` already uses it.
    fn snapshot_id_for(&mut self, base: &TableMetadata) -> i64 {
        match self.snapshot_id {
            Some(id) if base.snapshot(id).is_none() => id,
            stale => {
                let id = base.next_snapshot_id();
                if let Some(stale) = stale {
                    debug!(stale, id, "Snapshot id taken by a concurrent commit");
                    self.evict(stale);
                }
                self.snapshot_id = Some(id);
                id
            }
        }
    }

    /// Build the snapshot that applies the pending changes on top of `base`.
    ///
    /// Validation happens before any blob is written. Blobs written here are tracked and stay
    /// owned by the producer until [`Self::cleanup`] runs.
    #[instrument(
        name = "snapshot_producer.build",
        skip_all,
        fields(snapshot_id = tracing::field::Empty),
        err
    )]
    pub(crate) fn build_snapshot(&mut self, base: &TableMetadata) -> KernelResult<Snapshot> {
        let snapshot_id = self.snapshot_id_for(base);
        tracing::Span::current().record("snapshot_id", snapshot_id);
        let sequence_number = base.next_sequence_number();
        let properties = base.table_properties();
        let inherit = properties.snapshot_id_inheritance_enabled();
        let parent = base.current_snapshot();
        let base_manifests: Vec<ManifestFile> = parent
            .map(|s| s.all_manifests().to_vec())
            .unwrap_or_default();

        // Step 1: validate everything before writing anything
        self.validate_added_files(base)?;
        let appended = self.load_appended_manifests(base)?;
        let mut deletes = self.plan_deletes(&base_manifests)?;

        // Step 2: manifests for the operation's own files
        let mut summary = SummaryCollector::default();
        for file in &self.added_files {
            summary.add_file(file.record_count, file.file_size_in_bytes);
        }
        let mut manifests = self.new_files_manifests(base, snapshot_id, inherit)?;
        manifests.extend(self.appended(base, appended, snapshot_id, inherit, &mut summary)?);
        let mut manifests: Vec<ManifestFile> = manifests
            .into_iter()
            .map(|m| m.committed_as(snapshot_id, sequence_number))
            .collect();

        // Step 3: manifests of the parent, with deletes applied
        for manifest in &base_manifests {
            if let Some(entries) = deletes.remove(&manifest.manifest_path) {
                let filtered =
                    self.filter_manifest(base, manifest, entries, snapshot_id, &mut summary)?;
                manifests.push(filtered.committed_as(snapshot_id, sequence_number));
            } else if manifest.has_live_files() {
                manifests.push(manifest.clone());
            } else {
                debug!(path = %manifest.manifest_path, "Dropping manifest without live files");
            }
        }

        // Step 4: merge
        if self.merge_mode == MergeMode::Merge && properties.manifest_merge_enabled() {
            manifests = self.merge(base, manifests, snapshot_id, sequence_number, &properties)?;
        }

        // Step 5: manifests new to this snapshot come first
        let (mut ordered, carried): (Vec<_>, Vec<_>) = manifests
            .into_iter()
            .partition(|m| m.added_snapshot_id == Some(snapshot_id));
        summary.manifests_created = ordered.len() as u64;
        summary.manifests_kept = carried.len() as u64;
        summary.manifests_replaced = (base_manifests.len() - carried.len()) as u64;
        ordered.extend(carried);

        let operation = self.operation();
        let summary = summary.build(operation, parent.map(|s| s.summary()));
        info!(
            snapshot_id,
            sequence_number,
            %operation,
            manifests = ordered.len(),
            "Built snapshot"
        );
        Ok(Snapshot::new(
            snapshot_id,
            parent.map(|s| s.snapshot_id()),
            sequence_number,
            current_time_ms()?,
            base.schema().schema_id,
            ordered,
            summary,
        ))
    }

    fn validate_added_files(&self, base: &TableMetadata) -> KernelResult<()> {
        for file in &self.added_files {
            let spec = base.partition_spec(file.partition_spec_id).ok_or_else(|| {
                Error::validation(format!(
                    "Cannot add {}: unknown partition spec {}",
                    file.file_path, file.partition_spec_id
                ))
            })?;
            require!(
                file.partition.len() == spec.fields().len(),
                Error::validation(format!(
                    "Cannot add {}: partition has {} values, spec {} has {} fields",
                    file.file_path,
                    file.partition.len(),
                    spec.spec_id(),
                    spec.fields().len()
                ))
            );
        }
        Ok(())
    }

    fn load_appended_manifests(
        &self,
        base: &TableMetadata,
    ) -> KernelResult<Vec<(ManifestFile, Manifest)>> {
        let mut loaded = vec![];
        for manifest in &self.appended_manifests {
            require!(
                base.partition_spec(manifest.partition_spec_id).is_some(),
                Error::validation(format!(
                    "Cannot append manifest {}: unknown partition spec {}",
                    manifest.manifest_path, manifest.partition_spec_id
                ))
            );
            let content = manifest.load(self.store.as_ref(), self.codec.as_ref())?;
            for entry in &content.entries {
                match entry.status {
                    ManifestStatus::Existing => {}
                    ManifestStatus::Added => {
                        return Err(Error::validation("Cannot append manifest with added files"))
                    }
                    ManifestStatus::Deleted => {
                        return Err(Error::validation(
                            "Cannot append manifest with deleted files",
                        ))
                    }
                }
            }
            loaded.push((manifest.clone(), content));
        }
        Ok(loaded)
    }

    /// Resolved entries of each parent manifest holding a live file that is to be deleted.
    fn plan_deletes(
        &self,
        base_manifests: &[ManifestFile],
    ) -> KernelResult<HashMap<Url, Vec<ManifestEntry>>> {
        let mut plan = HashMap::new();
        if self.deleted_paths.is_empty() {
            return Ok(plan);
        }
        let mut found = HashSet::new();
        for manifest in base_manifests.iter().filter(|m| m.has_live_files()) {
            let entries = manifest.entries(self.store.as_ref(), self.codec.as_ref())?;
            let matches: Vec<&str> = entries
                .iter()
                .filter(|e| e.is_live() && self.deleted_paths.contains(e.file_path()))
                .map(ManifestEntry::file_path)
                .collect();
            if !matches.is_empty() {
                found.extend(matches.into_iter().map(str::to_string));
                plan.insert(manifest.manifest_path.clone(), entries);
            }
        }
        if self.validate_deletes {
            let missing = self
                .deleted_paths
                .iter()
                .filter(|p| !found.contains(*p))
                .join(", ");
            require!(
                missing.is_empty(),
                Error::validation(format!("Missing required files to delete: {missing}"))
            );
        }
        Ok(plan)
    }

    fn writer_for(&self, base: &TableMetadata, spec_id: i32) -> KernelResult<ManifestWriter> {
        let spec = base.partition_spec(spec_id).ok_or_else(|| {
            Error::validation(format!("Unknown partition spec {spec_id}"))
        })?;
        Ok(ManifestWriter::new(spec.clone(), base.format_version()))
    }

    fn write(&mut self, writer: ManifestWriter) -> KernelResult<ManifestFile> {
        let manifest = writer.write(self.store.as_ref(), self.codec.as_ref())?;
        self.written.insert(manifest.manifest_path.clone());
        Ok(manifest)
    }

    /// One manifest per partition spec for the added data files.
    fn new_files_manifests(
        &mut self,
        base: &TableMetadata,
        snapshot_id: i64,
        inherit: bool,
    ) -> KernelResult<Vec<ManifestFile>> {
        if self.added_files.is_empty() {
            return Ok(vec![]);
        }
        let entry_snapshot_id = (!inherit).then_some(snapshot_id);
        if let Some(cached) = &self.new_files {
            if cached.snapshot_id == entry_snapshot_id && cached.file_count == self.added_files.len()
            {
                debug!("Reusing manifests of added files");
                return Ok(cached.manifests.clone());
            }
        }
        if let Some(stale) = self.new_files.take() {
            for manifest in &stale.manifests {
                self.delete_written(&manifest.manifest_path);
            }
        }

        let spec_order: Vec<i32> = self
            .added_files
            .iter()
            .map(|f| f.partition_spec_id)
            .unique()
            .collect();
        let mut manifests = vec![];
        for spec_id in spec_order {
            let mut writer = self.writer_for(base, spec_id)?;
            for file in self.added_files.iter().filter(|f| f.partition_spec_id == spec_id) {
                writer.add_file(file.clone(), entry_snapshot_id)?;
            }
            manifests.push(self.write(writer)?);
        }
        self.new_files = Some(NewFilesManifests {
            snapshot_id: entry_snapshot_id,
            file_count: self.added_files.len(),
            manifests: manifests.clone(),
        });
        Ok(manifests)
    }

    /// References for the appended manifests: the caller's own blob when its entries can
    /// inherit the snapshot id, a copy with explicit ids otherwise.
    fn appended(
        &mut self,
        base: &TableMetadata,
        appended: Vec<(ManifestFile, Manifest)>,
        snapshot_id: i64,
        inherit: bool,
        summary: &mut SummaryCollector,
    ) -> KernelResult<Vec<ManifestFile>> {
        self.committed_as_is.clear();
        let mut manifests = vec![];
        for (manifest, content) in appended {
            for entry in &content.entries {
                summary.add_file(entry.data_file.record_count, entry.data_file.file_size_in_bytes);
            }
            if inherit && content.entries.iter().all(|e| e.snapshot_id.is_none()) {
                self.committed_as_is.push(manifest.clone());
                manifests.push(manifest.staged_as_added());
                continue;
            }
            let key = (manifest.manifest_path.clone(), snapshot_id);
            if let Some(copy) = self.appended_copies.get(&key) {
                manifests.push(copy.clone());
                continue;
            }
            let mut writer = self.writer_for(base, manifest.partition_spec_id)?;
            for entry in content.entries {
                writer.add_file(entry.data_file, Some(snapshot_id))?;
            }
            let copy = self.write(writer)?;
            self.appended_copies.insert(key, copy.clone());
            manifests.push(copy);
        }
        Ok(manifests)
    }

    /// Rewrite a parent manifest with the deleted files marked DELETED.
    fn filter_manifest(
        &mut self,
        base: &TableMetadata,
        manifest: &ManifestFile,
        entries: Vec<ManifestEntry>,
        snapshot_id: i64,
        summary: &mut SummaryCollector,
    ) -> KernelResult<ManifestFile> {
        let mut matched = vec![];
        for entry in entries
            .iter()
            .filter(|e| e.is_live() && self.deleted_paths.contains(e.file_path()))
        {
            summary.delete_file(entry.data_file.record_count, entry.data_file.file_size_in_bytes);
            matched.push(entry.file_path().to_string());
        }
        matched.sort();
        let key = (manifest.manifest_path.clone(), snapshot_id, matched);
        if let Some(filtered) = self.filtered.get(&key) {
            debug!(path = %manifest.manifest_path, "Reusing filtered manifest");
            return Ok(filtered.clone());
        }

        let mut writer = self.writer_for(base, manifest.partition_spec_id)?;
        for entry in entries {
            match entry.status {
                // deleted by an older snapshot
                ManifestStatus::Deleted => {}
                ManifestStatus::Added | ManifestStatus::Existing
                    if self.deleted_paths.contains(entry.file_path()) =>
                {
                    writer.add_delete_entry(entry, snapshot_id)?
                }
                ManifestStatus::Added | ManifestStatus::Existing => {
                    writer.add_existing_entry(entry)?
                }
            }
        }
        let filtered = self.write(writer)?;
        self.filtered.insert(key, filtered.clone());
        Ok(filtered)
    }

    #[instrument(name = "snapshot_producer.merge", skip_all, err)]
    fn merge(
        &mut self,
        base: &TableMetadata,
        manifests: Vec<ManifestFile>,
        snapshot_id: i64,
        sequence_number: i64,
        properties: &TableProperties,
    ) -> KernelResult<Vec<ManifestFile>> {
        let planner = ManifestMergePlanner::from_properties(properties);
        let mut merged = vec![];
        for bin in planner.plan(manifests) {
            match bin {
                ManifestBin::Keep(manifest) => merged.push(manifest),
                ManifestBin::Merge(bin) => {
                    let manifest = self.merge_bin(base, bin, snapshot_id)?;
                    merged.push(manifest.committed_as(snapshot_id, sequence_number));
                }
            }
        }
        Ok(merged)
    }

    fn merge_bin(
        &mut self,
        base: &TableMetadata,
        bin: Vec<ManifestFile>,
        snapshot_id: i64,
    ) -> KernelResult<ManifestFile> {
        let key = (
            bin.iter().map(|m| m.manifest_path.clone()).collect::<Vec<_>>(),
            snapshot_id,
        );
        if let Some(merged) = self.merged.get(&key) {
            debug!(path = %merged.manifest_path, "Reusing merged manifest");
            return Ok(merged.clone());
        }
        let spec_id = bin
            .first()
            .map(|m| m.partition_spec_id)
            .ok_or_else(|| Error::internal_error("Cannot merge an empty bin"))?;

        let mut writer = self.writer_for(base, spec_id)?;
        for manifest in &bin {
            for entry in manifest.entries(self.store.as_ref(), self.codec.as_ref())? {
                let this_snapshot = entry.snapshot_id == Some(snapshot_id);
                match entry.status {
                    ManifestStatus::Deleted if this_snapshot => writer.add_entry(entry)?,
                    ManifestStatus::Deleted => {}
                    ManifestStatus::Added if this_snapshot => {
                        writer.add_file(entry.data_file, Some(snapshot_id))?
                    }
                    ManifestStatus::Added | ManifestStatus::Existing => {
                        writer.add_existing_entry(entry)?
                    }
                }
            }
        }
        let merged = self.write(writer)?;
        info!(
            merged = bin.len(),
            path = %merged.manifest_path,
            "Merged manifests"
        );
        self.merged.insert(key, merged.clone());
        Ok(merged)
    }

    /// Drop cached artifacts that embed `stale_id`.
    fn evict(&mut self, stale_id: i64) {
        let mut stale = vec![];
        self.appended_copies.retain(|(_, id), m| {
            if *id == stale_id {
                stale.push(m.manifest_path.clone());
            }
            *id != stale_id
        });
        self.filtered.retain(|(_, id, _), m| {
            if *id == stale_id {
                stale.push(m.manifest_path.clone());
            }
            *id != stale_id
        });
        self.merged.retain(|(_, id), m| {
            if *id == stale_id {
                stale.push(m.manifest_path.clone());
            }
            *id != stale_id
        });
        for path in stale {
            self.delete_written(&path);
        }
    }

    fn delete_written(&mut self, path: &Url) {
        if self.written.remove(path) {
            delete_blob(self.store.as_ref(), path);
        }
    }

    /// Delete every blob this producer wrote that `committed` does not reference.
    ///
    /// Caller manifests committed without a rewrite belong to the table once a commit succeeds,
    /// so those that the committed snapshot does not reference are deleted too. After a failed
    /// commit they are left alone.
    pub(crate) fn cleanup(&mut self, committed: Option<&Snapshot>) {
        let committed_paths: HashSet<&Url> = committed
            .map(|s| s.all_manifests().iter().map(|m| &m.manifest_path).collect())
            .unwrap_or_default();
        for path in self.written.drain() {
            if !committed_paths.contains(&path) {
                delete_blob(self.store.as_ref(), &path);
            }
        }
        if committed.is_some() {
            for manifest in self.committed_as_is.drain(..) {
                if !committed_paths.contains(&manifest.manifest_path) {
                    delete_blob(self.store.as_ref(), &manifest.manifest_path);
                }
            }
        }
        self.new_files = None;
        self.appended_copies.clear();
        self.filtered.clear();
        self.merged.clear();
    }
}

fn delete_blob(store: &dyn BlobStore, path: &Url) {
    match store.delete(path) {
        Ok(()) => debug!(path = %path, "Deleted uncommitted manifest"),
        Err(e) => warn!(path = %path, error = %e, "Failed to delete uncommitted manifest"),
    }
}

impl PendingUpdate for SnapshotProducer {
    type Output = SnapshotRef;

    fn apply(&mut self, base: &TableMetadataRef) -> KernelResult<(TableMetadata, SnapshotRef)> {
        let snapshot = Arc::new(self.build_snapshot(base)?);
        let metadata = base.with_snapshot(snapshot.clone())?;
        Ok((metadata, snapshot))
    }

    fn clean_uncommitted(&mut self, committed: Option<&SnapshotRef>) {
        self.cleanup(committed.map(|s| s.as_ref()))
    }
}
