use tracing::debug;

use super::{FieldSummary, Manifest, ManifestCodec, ManifestEntry, ManifestFile, ManifestMetadata, ManifestStatus};
use crate::manifest::DataFile;
use crate::partition::PartitionSpecRef;
use crate::storage::BlobStore;
use crate::table_metadata::FormatVersion;
use crate::utils::require;
use crate::{Error, KernelResult};

/// Accumulates entries for one manifest and writes them as a single blob.
///
/// All entries must belong to the writer's partition spec. The returned [`ManifestFile`] carries
/// the counts and partition bounds of what was written, but no snapshot id or sequence number:
/// those are assigned when a snapshot first includes the manifest.
#[derive(Debug)]
pub struct ManifestWriter {
    spec: PartitionSpecRef,
    format_version: FormatVersion,
    entries: Vec<ManifestEntry>,
}

impl ManifestWriter {
    pub fn new(spec: PartitionSpecRef, format_version: FormatVersion) -> Self {
        Self {
            spec,
            format_version,
            entries: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_entry(&mut self, entry: ManifestEntry) -> KernelResult<()> {
        let file = &entry.data_file;
        require!(
            file.partition_spec_id == self.spec.spec_id(),
            Error::generic(format!(
                "Cannot write {} with partition spec {} into a manifest for spec {}",
                file.file_path,
                file.partition_spec_id,
                self.spec.spec_id()
            ))
        );
        require!(
            file.partition.len() == self.spec.fields().len(),
            Error::generic(format!(
                "Partition tuple of {} does not match spec {}",
                file.file_path,
                self.spec.spec_id()
            ))
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Add a file as ADDED. Without a snapshot id the entry inherits it on commit.
    pub fn add_file(&mut self, file: DataFile, snapshot_id: Option<i64>) -> KernelResult<()> {
        self.add_entry(ManifestEntry::added(file, snapshot_id))
    }

    /// Add a file with no origin, for manifests handed to an append operation.
    pub fn add_staged_file(&mut self, file: DataFile) -> KernelResult<()> {
        self.add_entry(ManifestEntry::staged(file))
    }

    /// Carry an entry over as EXISTING, keeping its origin.
    pub fn add_existing_entry(&mut self, entry: ManifestEntry) -> KernelResult<()> {
        self.add_entry(ManifestEntry {
            status: ManifestStatus::Existing,
            ..entry
        })
    }

    /// Record that `snapshot_id` removes the entry's file.
    pub fn add_delete_entry(&mut self, entry: ManifestEntry, snapshot_id: i64) -> KernelResult<()> {
        self.add_entry(ManifestEntry {
            status: ManifestStatus::Deleted,
            snapshot_id: Some(snapshot_id),
            ..entry
        })
    }

    pub fn write(
        self,
        store: &dyn BlobStore,
        codec: &dyn ManifestCodec,
    ) -> KernelResult<ManifestFile> {
        let mut partitions = vec![FieldSummary::default(); self.spec.fields().len()];
        let (mut added_files, mut existing_files, mut deleted_files) = (0u32, 0u32, 0u32);
        let (mut added_rows, mut existing_rows, mut deleted_rows) = (0u64, 0u64, 0u64);
        let mut min_sequence_number: Option<i64> = None;

        for entry in &self.entries {
            let rows = entry.data_file.record_count;
            match entry.status {
                ManifestStatus::Added => {
                    added_files += 1;
                    added_rows += rows;
                }
                ManifestStatus::Existing => {
                    existing_files += 1;
                    existing_rows += rows;
                }
                ManifestStatus::Deleted => {
                    deleted_files += 1;
                    deleted_rows += rows;
                }
            }
            for (summary, value) in partitions.iter_mut().zip(entry.data_file.partition.values()) {
                summary.update(value.as_ref());
            }
            if let Some(seq) = entry.sequence_number.filter(|_| entry.is_live()) {
                min_sequence_number = Some(min_sequence_number.map_or(seq, |min| min.min(seq)));
            }
        }

        let partition_spec_id = self.spec.spec_id();
        let manifest = Manifest {
            metadata: ManifestMetadata {
                partition_spec: self.spec,
                format_version: self.format_version,
            },
            entries: self.entries,
        };
        let bytes = codec.encode(&manifest)?;
        let manifest_length = bytes.len() as u64;
        let manifest_path = store.write(bytes)?;
        debug!(
            path = %manifest_path,
            entries = manifest.entries.len(),
            "Wrote manifest"
        );

        Ok(ManifestFile {
            manifest_path,
            manifest_length,
            partition_spec_id,
            added_snapshot_id: None,
            sequence_number: None,
            min_sequence_number,
            added_files_count: added_files,
            existing_files_count: existing_files,
            deleted_files_count: deleted_files,
            added_rows_count: added_rows,
            existing_rows_count: existing_rows,
            deleted_rows_count: deleted_rows,
            partitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::manifest::JsonManifestCodec;
    use crate::partition::{PartitionData, PartitionSpec, PartitionValue};
    use crate::schema::{NestedField, PrimitiveType, Schema};
    use crate::storage::InMemoryBlobStore;

    fn spec() -> PartitionSpecRef {
        let schema = Schema::try_new(
            0,
            [
                NestedField::required(1, "id", PrimitiveType::Int),
                NestedField::required(2, "data", PrimitiveType::String),
            ],
        )
        .unwrap();
        Arc::new(PartitionSpec::builder(&schema).bucket("data", 16).build().unwrap())
    }

    fn file(spec: &PartitionSpec, path: &str, bucket: i32, records: u64) -> DataFile {
        DataFile::builder(spec)
            .with_path(path)
            .with_partition(PartitionData::new(vec![Some(PartitionValue::Int(bucket))]))
            .with_record_count(records)
            .with_file_size_in_bytes(10)
            .build()
            .unwrap()
    }

    #[test]
    fn write_summarises_entries() {
        let spec = spec();
        let store = InMemoryBlobStore::new();
        let codec = JsonManifestCodec;
        let mut writer = ManifestWriter::new(spec.clone(), FormatVersion::V2);
        writer.add_file(file(&spec, "/a.parquet", 3, 5), Some(10)).unwrap();
        writer
            .add_existing_entry(ManifestEntry {
                status: ManifestStatus::Added,
                snapshot_id: Some(4),
                sequence_number: Some(2),
                data_file: file(&spec, "/b.parquet", 1, 7),
            })
            .unwrap();
        writer
            .add_delete_entry(
                ManifestEntry {
                    status: ManifestStatus::Existing,
                    snapshot_id: Some(3),
                    sequence_number: Some(1),
                    data_file: file(&spec, "/c.parquet", 8, 2),
                },
                10,
            )
            .unwrap();

        let manifest = writer.write(&store, &codec).unwrap();
        assert_eq!(manifest.added_files_count, 1);
        assert_eq!(manifest.existing_files_count, 1);
        assert_eq!(manifest.deleted_files_count, 1);
        assert_eq!(manifest.added_rows_count, 5);
        assert_eq!(manifest.existing_rows_count, 7);
        assert_eq!(manifest.deleted_rows_count, 2);
        assert_eq!(manifest.min_sequence_number, Some(2));
        assert_eq!(manifest.added_snapshot_id, None);
        assert_eq!(manifest.partitions[0].lower_bound, Some(PartitionValue::Int(1)));
        assert_eq!(manifest.partitions[0].upper_bound, Some(PartitionValue::Int(8)));
        assert_eq!(store.length(&manifest.manifest_path).unwrap(), manifest.manifest_length);

        let decoded = manifest.load(&store, &codec).unwrap();
        assert_eq!(decoded.entries.len(), 3);
        assert_eq!(decoded.entries[2].status, ManifestStatus::Deleted);
        assert_eq!(decoded.entries[2].snapshot_id, Some(10));
    }

    #[test]
    fn rejects_files_of_other_specs() {
        let spec = spec();
        let mut writer = ManifestWriter::new(spec, FormatVersion::V1);
        let other = DataFile::builder(&PartitionSpec::unpartitioned())
            .with_path("/x.parquet")
            .build()
            .unwrap();
        // unpartitioned spec also has id 0, but no partition values
        assert!(writer.add_file(other, None).is_err());
        assert!(writer.is_empty());
    }
}
