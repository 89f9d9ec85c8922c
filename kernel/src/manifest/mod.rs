//! Manifests: the files that list a table's data files.
//!
//! A [`Manifest`] is the decoded content of one stored manifest blob: a header describing the
//! partition spec its tuples are encoded against, and a list of [`ManifestEntry`]s. A
//! [`ManifestFile`] is the reference to such a blob that snapshots carry, together with counts and
//! partition bounds summarising its content.
//!
//! Entries may omit their snapshot id and sequence number. Such entries inherit both from the
//! manifest reference that first brings the blob into a snapshot, see
//! [`ManifestEntry::inherit_from`].

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::partition::{PartitionData, PartitionSpec, PartitionSpecRef, PartitionValue};
use crate::schema::Schema;
use crate::storage::BlobStore;
use crate::table_metadata::FormatVersion;
use crate::utils::require;
use crate::{Error, KernelResult};

mod codec;
mod writer;

pub use codec::{JsonManifestCodec, ManifestCodec};
pub use writer::ManifestWriter;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataFileFormat {
    #[default]
    Parquet,
    Avro,
    Orc,
}

/// Descriptor of one data file tracked by the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataFile {
    pub file_path: String,
    pub file_format: DataFileFormat,
    pub partition_spec_id: i32,
    pub partition: PartitionData,
    pub record_count: u64,
    pub file_size_in_bytes: u64,
}

impl DataFile {
    pub fn builder(spec: &PartitionSpec) -> DataFileBuilder<'_> {
        DataFileBuilder {
            spec,
            file_path: None,
            file_format: DataFileFormat::default(),
            partition: None,
            record_count: 0,
            file_size_in_bytes: 0,
        }
    }
}

#[derive(Debug)]
pub struct DataFileBuilder<'a> {
    spec: &'a PartitionSpec,
    file_path: Option<String>,
    file_format: DataFileFormat,
    partition: Option<PartitionData>,
    record_count: u64,
    file_size_in_bytes: u64,
}

impl DataFileBuilder<'_> {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_format(mut self, format: DataFileFormat) -> Self {
        self.file_format = format;
        self
    }

    pub fn with_partition(mut self, partition: PartitionData) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_partition_path(mut self, schema: &Schema, path: &str) -> KernelResult<Self> {
        self.partition = Some(self.spec.parse_partition_path(schema, path)?);
        Ok(self)
    }

    pub fn with_record_count(mut self, record_count: u64) -> Self {
        self.record_count = record_count;
        self
    }

    pub fn with_file_size_in_bytes(mut self, size: u64) -> Self {
        self.file_size_in_bytes = size;
        self
    }

    pub fn build(self) -> KernelResult<DataFile> {
        let file_path = self
            .file_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::generic("Data file path is required"))?;
        let partition = match self.partition {
            Some(partition) => partition,
            None if self.spec.fields().is_empty() => PartitionData::default(),
            None => {
                return Err(Error::generic(format!(
                    "Partition data is required for {file_path} in a partitioned spec"
                )))
            }
        };
        require!(
            partition.len() == self.spec.fields().len(),
            Error::generic(format!(
                "Partition tuple of {file_path} has {} values, spec {} has {} fields",
                partition.len(),
                self.spec.spec_id(),
                self.spec.fields().len()
            ))
        );
        Ok(DataFile {
            file_path,
            file_format: self.file_format,
            partition_spec_id: self.spec.spec_id(),
            partition,
            record_count: self.record_count,
            file_size_in_bytes: self.file_size_in_bytes,
        })
    }
}

/// Lifecycle status of a file within one snapshot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ManifestStatus {
    /// Added by the snapshot the entry's snapshot id names.
    Added,
    /// Added by an earlier snapshot and still live.
    Existing,
    /// Removed by the snapshot the entry's snapshot id names.
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestEntry {
    pub status: ManifestStatus,
    pub snapshot_id: Option<i64>,
    pub sequence_number: Option<i64>,
    pub data_file: DataFile,
}

impl ManifestEntry {
    /// An entry for a file that the snapshot committing it adds.
    pub fn added(data_file: DataFile, snapshot_id: Option<i64>) -> Self {
        Self {
            status: ManifestStatus::Added,
            snapshot_id,
            sequence_number: None,
            data_file,
        }
    }

    /// An entry written ahead of any commit. It has no origin yet, and resolves to ADDED in the
    /// snapshot that first commits its manifest.
    pub fn staged(data_file: DataFile) -> Self {
        Self {
            status: ManifestStatus::Existing,
            snapshot_id: None,
            sequence_number: None,
            data_file,
        }
    }

    pub fn file_path(&self) -> &str {
        &self.data_file.file_path
    }

    /// ADDED or EXISTING: the file is part of the snapshot.
    pub fn is_live(&self) -> bool {
        match self.status {
            ManifestStatus::Added | ManifestStatus::Existing => true,
            ManifestStatus::Deleted => false,
        }
    }

    fn is_staged(&self) -> bool {
        self.status == ManifestStatus::Existing && self.snapshot_id.is_none()
    }

    /// Fill in the origin fields this entry left to its manifest reference.
    pub fn inherit_from(mut self, manifest: &ManifestFile) -> Self {
        if self.snapshot_id.is_none() {
            if self.is_staged() {
                self.status = ManifestStatus::Added;
            }
            self.snapshot_id = manifest.added_snapshot_id;
        }
        if self.sequence_number.is_none() {
            self.sequence_number = manifest.sequence_number;
        }
        self
    }
}

/// Header of a manifest: the layout its partition tuples are encoded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMetadata {
    pub partition_spec: PartitionSpecRef,
    pub format_version: FormatVersion,
}

/// Decoded content of one manifest blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub metadata: ManifestMetadata,
    pub entries: Vec<ManifestEntry>,
}

/// Bounds of one partition field over the entries of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldSummary {
    pub contains_null: bool,
    pub lower_bound: Option<PartitionValue>,
    pub upper_bound: Option<PartitionValue>,
}

impl FieldSummary {
    pub(crate) fn update(&mut self, value: Option<&PartitionValue>) {
        let Some(value) = value else {
            self.contains_null = true;
            return;
        };
        if self.lower_bound.as_ref().is_none_or(|lower| value < lower) {
            self.lower_bound = Some(value.clone());
        }
        if self.upper_bound.as_ref().is_none_or(|upper| value > upper) {
            self.upper_bound = Some(value.clone());
        }
    }
}

/// Reference to a stored manifest. Two references are equal iff they point at the same blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestFile {
    pub manifest_path: Url,
    pub manifest_length: u64,
    pub partition_spec_id: i32,
    /// Snapshot that first committed this manifest; `None` until then.
    pub added_snapshot_id: Option<i64>,
    pub sequence_number: Option<i64>,
    pub min_sequence_number: Option<i64>,
    pub added_files_count: u32,
    pub existing_files_count: u32,
    pub deleted_files_count: u32,
    pub added_rows_count: u64,
    pub existing_rows_count: u64,
    pub deleted_rows_count: u64,
    pub partitions: Vec<FieldSummary>,
}

impl PartialEq for ManifestFile {
    fn eq(&self, other: &Self) -> bool {
        self.manifest_path == other.manifest_path
    }
}

impl Eq for ManifestFile {}

impl Hash for ManifestFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.manifest_path.hash(state);
    }
}

impl ManifestFile {
    pub fn has_added_files(&self) -> bool {
        self.added_files_count > 0
    }

    pub fn has_existing_files(&self) -> bool {
        self.existing_files_count > 0
    }

    pub fn has_deleted_files(&self) -> bool {
        self.deleted_files_count > 0
    }

    /// Whether any entry is ADDED or EXISTING.
    pub fn has_live_files(&self) -> bool {
        self.has_added_files() || self.has_existing_files()
    }

    /// Decode the blob this reference points at, without origin inheritance.
    pub fn load(&self, store: &dyn BlobStore, codec: &dyn ManifestCodec) -> KernelResult<Manifest> {
        let bytes = store.read(&self.manifest_path)?;
        codec.decode(&bytes)
    }

    /// Entries of this manifest with origin fields resolved against this reference.
    pub fn entries(
        &self,
        store: &dyn BlobStore,
        codec: &dyn ManifestCodec,
    ) -> KernelResult<Vec<ManifestEntry>> {
        let manifest = self.load(store, codec)?;
        Ok(manifest
            .entries
            .into_iter()
            .map(|entry| entry.inherit_from(self))
            .collect())
    }

    /// The reference recorded when a snapshot first includes this manifest.
    pub(crate) fn committed_as(&self, snapshot_id: i64, sequence_number: i64) -> Self {
        let mut committed = self.clone();
        committed.added_snapshot_id = Some(snapshot_id);
        committed.sequence_number = Some(sequence_number);
        committed.min_sequence_number = Some(
            self.min_sequence_number
                .map_or(sequence_number, |min| min.min(sequence_number)),
        );
        committed
    }

    /// Reference for a manifest of staged entries: they count as added by the snapshot that
    /// commits it.
    pub(crate) fn staged_as_added(mut self) -> Self {
        self.added_files_count += std::mem::take(&mut self.existing_files_count);
        self.added_rows_count += std::mem::take(&mut self.existing_rows_count);
        self
    }
}
