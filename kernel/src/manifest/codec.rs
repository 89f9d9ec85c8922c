//! Encoding of manifests into blobs.
//!
//! The engine only depends on [`ManifestCodec`]; [`JsonManifestCodec`] is the reference encoding.
//! It embeds the partition spec in the header so a manifest can be decoded without table
//! metadata. Partition tuples are positional under format version 1 and tagged by partition
//! field id under format version 2, which is why version 1 specs keep tombstones for removed
//! fields.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{DataFile, DataFileFormat, Manifest, ManifestEntry, ManifestMetadata, ManifestStatus};
use crate::partition::{PartitionData, PartitionSpec, PartitionValue};
use crate::table_metadata::FormatVersion;
use crate::utils::require;
use crate::{Error, KernelResult};

/// Converts manifests to and from the bytes stored in a blob.
pub trait ManifestCodec: Send + Sync + Debug {
    fn encode(&self, manifest: &Manifest) -> KernelResult<Bytes>;
    fn decode(&self, bytes: &[u8]) -> KernelResult<Manifest>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonManifestCodec;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EncodedManifest {
    format_version: FormatVersion,
    partition_spec: PartitionSpec,
    entries: Vec<EncodedEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EncodedEntry {
    status: ManifestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence_number: Option<i64>,
    file_path: String,
    file_format: DataFileFormat,
    partition: EncodedPartition,
    record_count: u64,
    file_size_in_bytes: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EncodedPartition {
    Positional(Vec<Option<PartitionValue>>),
    /// Keyed by the decimal partition field id.
    Tagged(BTreeMap<String, PartitionValue>),
}

impl EncodedPartition {
    fn encode(data: &PartitionData, spec: &PartitionSpec, version: FormatVersion) -> Self {
        match version {
            FormatVersion::V1 => Self::Positional(data.values().to_vec()),
            FormatVersion::V2 => Self::Tagged(
                spec.fields()
                    .iter()
                    .zip(data.values())
                    .filter_map(|(field, value)| {
                        value.clone().map(|v| (field.field_id.to_string(), v))
                    })
                    .collect(),
            ),
        }
    }

    fn decode(self, spec: &PartitionSpec) -> KernelResult<PartitionData> {
        match self {
            Self::Positional(values) => {
                require!(
                    values.len() == spec.fields().len(),
                    Error::generic(format!(
                        "Partition tuple has {} values but spec {} has {} fields",
                        values.len(),
                        spec.spec_id(),
                        spec.fields().len()
                    ))
                );
                Ok(PartitionData::new(values))
            }
            Self::Tagged(mut values) => {
                let data = spec
                    .fields()
                    .iter()
                    .map(|field| values.remove(&field.field_id.to_string()))
                    .collect();
                require!(
                    values.is_empty(),
                    Error::generic(format!(
                        "Partition tuple has values for unknown field ids: {:?}",
                        values.keys().collect::<Vec<_>>()
                    ))
                );
                Ok(PartitionData::new(data))
            }
        }
    }
}

impl ManifestCodec for JsonManifestCodec {
    fn encode(&self, manifest: &Manifest) -> KernelResult<Bytes> {
        let spec = manifest.metadata.partition_spec.as_ref();
        let version = manifest.metadata.format_version;
        let encoded = EncodedManifest {
            format_version: version,
            partition_spec: spec.clone(),
            entries: manifest
                .entries
                .iter()
                .map(|entry| EncodedEntry {
                    status: entry.status,
                    snapshot_id: entry.snapshot_id,
                    sequence_number: entry.sequence_number,
                    file_path: entry.data_file.file_path.clone(),
                    file_format: entry.data_file.file_format,
                    partition: EncodedPartition::encode(&entry.data_file.partition, spec, version),
                    record_count: entry.data_file.record_count,
                    file_size_in_bytes: entry.data_file.file_size_in_bytes,
                })
                .collect(),
        };
        Ok(Bytes::from(serde_json::to_vec(&encoded)?))
    }

    fn decode(&self, bytes: &[u8]) -> KernelResult<Manifest> {
        let encoded: EncodedManifest = serde_json::from_slice(bytes)?;
        let spec = Arc::new(encoded.partition_spec);
        let entries = encoded
            .entries
            .into_iter()
            .map(|entry| {
                Ok(ManifestEntry {
                    status: entry.status,
                    snapshot_id: entry.snapshot_id,
                    sequence_number: entry.sequence_number,
                    data_file: DataFile {
                        file_path: entry.file_path,
                        file_format: entry.file_format,
                        partition_spec_id: spec.spec_id(),
                        partition: entry.partition.decode(&spec)?,
                        record_count: entry.record_count,
                        file_size_in_bytes: entry.file_size_in_bytes,
                    },
                })
            })
            .collect::<KernelResult<Vec<_>>>()?;
        Ok(Manifest {
            metadata: ManifestMetadata {
                partition_spec: spec,
                format_version: encoded.format_version,
            },
            entries,
        })
    }
}
