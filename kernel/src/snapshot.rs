//! Snapshots: the immutable states of a table, each listing the manifests that make it up.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::manifest::{ManifestCodec, ManifestEntry, ManifestFile};
use crate::storage::BlobStore;
use crate::KernelResult;

pub type SnapshotRef = Arc<Snapshot>;

// Summary keys
pub const OPERATION: &str = "operation";
pub const ADDED_DATA_FILES: &str = "added-data-files";
pub const DELETED_DATA_FILES: &str = "deleted-data-files";
pub const EXISTING_DATA_FILES: &str = "existing-data-files";
pub const ADDED_RECORDS: &str = "added-records";
pub const DELETED_RECORDS: &str = "deleted-records";
pub const EXISTING_RECORDS: &str = "existing-records";
pub const ADDED_FILE_SIZE: &str = "added-files-size";
pub const REMOVED_FILE_SIZE: &str = "removed-files-size";
pub const TOTAL_DATA_FILES: &str = "total-data-files";
pub const TOTAL_RECORDS: &str = "total-records";
pub const TOTAL_FILE_SIZE: &str = "total-files-size";
pub const MANIFESTS_CREATED: &str = "manifests-created";
pub const MANIFESTS_KEPT: &str = "manifests-kept";
pub const MANIFESTS_REPLACED: &str = "manifests-replaced";

/// Kind of change a snapshot made.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    /// Only added files.
    Append,
    /// Only removed files.
    Delete,
    /// Added and removed files.
    Overwrite,
    /// Rewrote files without changing the data.
    Replace,
}

/// String-keyed statistics of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub operation: Operation,
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

impl Summary {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)?.parse().ok()
    }
}

/// Counts gathered while a snapshot is produced, rendered into a [`Summary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SummaryCollector {
    pub(crate) added_files: u64,
    pub(crate) deleted_files: u64,
    pub(crate) added_records: u64,
    pub(crate) deleted_records: u64,
    pub(crate) added_size: u64,
    pub(crate) removed_size: u64,
    pub(crate) manifests_created: u64,
    pub(crate) manifests_kept: u64,
    pub(crate) manifests_replaced: u64,
}

impl SummaryCollector {
    pub(crate) fn add_file(&mut self, records: u64, size: u64) {
        self.added_files += 1;
        self.added_records += records;
        self.added_size += size;
    }

    pub(crate) fn delete_file(&mut self, records: u64, size: u64) {
        self.deleted_files += 1;
        self.deleted_records += records;
        self.removed_size += size;
    }

    /// Render the summary. Totals carry forward from `previous`; they are omitted when the
    /// previous snapshot has none.
    pub(crate) fn build(&self, operation: Operation, previous: Option<&Summary>) -> Summary {
        let mut properties = BTreeMap::new();
        let mut put = |key: &str, value: u64| {
            properties.insert(key.to_string(), value.to_string());
        };
        put(ADDED_DATA_FILES, self.added_files);
        put(DELETED_DATA_FILES, self.deleted_files);
        put(ADDED_RECORDS, self.added_records);
        put(DELETED_RECORDS, self.deleted_records);
        put(ADDED_FILE_SIZE, self.added_size);
        put(REMOVED_FILE_SIZE, self.removed_size);
        put(MANIFESTS_CREATED, self.manifests_created);
        put(MANIFESTS_KEPT, self.manifests_kept);
        put(MANIFESTS_REPLACED, self.manifests_replaced);

        let totals = match previous {
            None => Some((0, 0, 0)),
            Some(previous) => previous
                .get_u64(TOTAL_DATA_FILES)
                .zip(previous.get_u64(TOTAL_RECORDS))
                .zip(previous.get_u64(TOTAL_FILE_SIZE))
                .map(|((files, records), size)| (files, records, size)),
        };
        if let Some((files, records, size)) = totals {
            let total_files = (files + self.added_files).saturating_sub(self.deleted_files);
            let total_records = (records + self.added_records).saturating_sub(self.deleted_records);
            let total_size = (size + self.added_size).saturating_sub(self.removed_size);
            put(TOTAL_DATA_FILES, total_files);
            put(TOTAL_RECORDS, total_records);
            put(TOTAL_FILE_SIZE, total_size);
            put(EXISTING_DATA_FILES, total_files.saturating_sub(self.added_files));
            put(EXISTING_RECORDS, total_records.saturating_sub(self.added_records));
        }

        Summary {
            operation,
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    snapshot_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_snapshot_id: Option<i64>,
    sequence_number: i64,
    timestamp_ms: i64,
    schema_id: i32,
    manifests: Arc<Vec<ManifestFile>>,
    summary: Summary,
}

impl Snapshot {
    pub(crate) fn new(
        snapshot_id: i64,
        parent_snapshot_id: Option<i64>,
        sequence_number: i64,
        timestamp_ms: i64,
        schema_id: i32,
        manifests: Vec<ManifestFile>,
        summary: Summary,
    ) -> Self {
        Self {
            snapshot_id,
            parent_snapshot_id,
            sequence_number,
            timestamp_ms,
            schema_id,
            manifests: Arc::new(manifests),
            summary,
        }
    }

    pub fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }

    pub fn parent_snapshot_id(&self) -> Option<i64> {
        self.parent_snapshot_id
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn schema_id(&self) -> i32 {
        self.schema_id
    }

    /// Manifests of this snapshot, newest first.
    pub fn all_manifests(&self) -> &[ManifestFile] {
        &self.manifests
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Manifests first committed by this snapshot.
    pub fn added_manifests(&self) -> impl Iterator<Item = &ManifestFile> {
        self.manifests
            .iter()
            .filter(move |m| m.added_snapshot_id == Some(self.snapshot_id))
    }

    /// Every ADDED or EXISTING entry reachable from this snapshot.
    pub fn live_entries(
        &self,
        store: &dyn BlobStore,
        codec: &dyn ManifestCodec,
    ) -> KernelResult<Vec<ManifestEntry>> {
        let mut live = vec![];
        for manifest in self.manifests.iter() {
            live.extend(
                manifest
                    .entries(store, codec)?
                    .into_iter()
                    .filter(ManifestEntry::is_live),
            );
        }
        Ok(live)
    }
}
