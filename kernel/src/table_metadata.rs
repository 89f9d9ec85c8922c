//! Table metadata: the value the catalog pointer refers to.
//!
//! [`TableMetadata`] is immutable. Every change produces a successor through one of the `with_*`
//! methods, which share unchanged parts (schema, specs, snapshots) with their base through `Arc`s.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::partition::{PartitionSpec, PartitionSpecRef, PartitionSpecRegistry, RemovalPolicy};
use crate::schema::{Schema, SchemaRef};
use crate::snapshot::SnapshotRef;
use crate::table_properties::{validate_property_value, TableProperties};
use crate::utils::{current_time_ms, require};
use crate::{Error, KernelResult};

pub type TableMetadataRef = Arc<TableMetadata>;

/// Table format version. Decides how partition tuples are encoded in manifests and therefore
/// what happens to removed partition fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FormatVersion {
    /// Positional partition tuples.
    V1,
    /// Partition tuples tagged by field id.
    V2,
}

impl FormatVersion {
    pub fn removal_policy(&self) -> RemovalPolicy {
        match self {
            FormatVersion::V1 => RemovalPolicy::Tombstone,
            FormatVersion::V2 => RemovalPolicy::Drop,
        }
    }
}

impl From<FormatVersion> for u8 {
    fn from(version: FormatVersion) -> Self {
        match version {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }
}

impl TryFrom<u8> for FormatVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            v => Err(Error::generic(format!("Unsupported format version: {v}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotLogEntry {
    pub timestamp_ms: i64,
    pub snapshot_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableMetadata {
    format_version: FormatVersion,
    table_uuid: Uuid,
    location: Url,
    last_sequence_number: i64,
    last_updated_ms: i64,
    schema: SchemaRef,
    #[serde(flatten)]
    partition_specs: PartitionSpecRegistry,
    #[serde(default)]
    properties: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_snapshot_id: Option<i64>,
    #[serde(default)]
    snapshots: Vec<SnapshotRef>,
    #[serde(default)]
    snapshot_log: Vec<SnapshotLogEntry>,
}

impl TableMetadata {
    pub fn builder(
        location: Url,
        schema: Schema,
        spec: PartitionSpec,
        format_version: FormatVersion,
    ) -> TableMetadataBuilder {
        TableMetadataBuilder {
            location,
            schema,
            spec,
            format_version,
            properties: HashMap::new(),
        }
    }

    pub fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    pub fn table_uuid(&self) -> Uuid {
        self.table_uuid
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn last_sequence_number(&self) -> i64 {
        self.last_sequence_number
    }

    pub fn last_updated_ms(&self) -> i64 {
        self.last_updated_ms
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn partition_specs(&self) -> &PartitionSpecRegistry {
        &self.partition_specs
    }

    pub fn partition_spec(&self, spec_id: i32) -> Option<&PartitionSpecRef> {
        self.partition_specs.spec(spec_id)
    }

    pub fn default_partition_spec(&self) -> KernelResult<&PartitionSpecRef> {
        self.partition_specs.default_spec()
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Typed view of [`Self::properties`].
    pub fn table_properties(&self) -> TableProperties {
        TableProperties::from(self.properties.iter())
    }

    pub fn current_snapshot_id(&self) -> Option<i64> {
        self.current_snapshot_id
    }

    pub fn current_snapshot(&self) -> Option<&SnapshotRef> {
        self.current_snapshot_id.and_then(|id| self.snapshot(id))
    }

    pub fn snapshot(&self, snapshot_id: i64) -> Option<&SnapshotRef> {
        self.snapshots.iter().find(|s| s.snapshot_id() == snapshot_id)
    }

    pub fn snapshots(&self) -> &[SnapshotRef] {
        &self.snapshots
    }

    pub fn snapshot_log(&self) -> &[SnapshotLogEntry] {
        &self.snapshot_log
    }

    /// Id for the next snapshot: one above every id in use.
    pub fn next_snapshot_id(&self) -> i64 {
        self.snapshots
            .iter()
            .map(|s| s.snapshot_id())
            .max()
            .map_or(1, |id| id + 1)
    }

    pub fn next_sequence_number(&self) -> i64 {
        self.last_sequence_number + 1
    }

    /// Successor whose current snapshot is `snapshot`, a child of the current snapshot.
    pub fn with_snapshot(&self, snapshot: SnapshotRef) -> KernelResult<Self> {
        require!(
            snapshot.parent_snapshot_id() == self.current_snapshot_id,
            Error::generic(format!(
                "Snapshot {} has parent {:?}, but the current snapshot is {:?}",
                snapshot.snapshot_id(),
                snapshot.parent_snapshot_id(),
                self.current_snapshot_id
            ))
        );
        require!(
            self.snapshot(snapshot.snapshot_id()).is_none(),
            Error::generic(format!(
                "Snapshot id {} is already in use",
                snapshot.snapshot_id()
            ))
        );
        require!(
            snapshot.sequence_number() > self.last_sequence_number,
            Error::generic(format!(
                "Sequence number {} is not above the last sequence number {}",
                snapshot.sequence_number(),
                self.last_sequence_number
            ))
        );
        let mut next = self.clone();
        next.last_sequence_number = snapshot.sequence_number();
        next.last_updated_ms = snapshot.timestamp_ms();
        next.current_snapshot_id = Some(snapshot.snapshot_id());
        next.snapshot_log.push(SnapshotLogEntry {
            timestamp_ms: snapshot.timestamp_ms(),
            snapshot_id: snapshot.snapshot_id(),
        });
        next.snapshots.push(snapshot);
        Ok(next)
    }

    /// Successor with a different partition spec registry.
    pub fn with_partition_specs(&self, partition_specs: PartitionSpecRegistry) -> KernelResult<Self> {
        require!(
            partition_specs.last_assigned_field_id() >= self.partition_specs.last_assigned_field_id(),
            Error::internal_error("Partition field id high-water mark moved backwards")
        );
        let mut next = self.clone();
        next.partition_specs = partition_specs;
        next.last_updated_ms = current_time_ms()?;
        Ok(next)
    }

    /// Successor with `updates` set and `removals` unset. Known keys are validated.
    pub fn with_properties(
        &self,
        updates: &HashMap<String, String>,
        removals: &[String],
    ) -> KernelResult<Self> {
        for (key, value) in updates {
            validate_property_value(key, value).map_err(Error::invalid_table_property)?;
        }
        let mut next = self.clone();
        for key in removals {
            next.properties.remove(key);
        }
        next.properties
            .extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        next.last_updated_ms = current_time_ms()?;
        Ok(next)
    }
}

#[derive(Debug)]
pub struct TableMetadataBuilder {
    location: Url,
    schema: Schema,
    spec: PartitionSpec,
    format_version: FormatVersion,
    properties: HashMap<String, String>,
}

impl TableMetadataBuilder {
    pub fn with_properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> KernelResult<TableMetadata> {
        for (key, value) in &self.properties {
            validate_property_value(key, value).map_err(Error::invalid_table_property)?;
        }
        // make sure every field resolves against the schema
        self.spec.partition_type(&self.schema)?;
        Ok(TableMetadata {
            format_version: self.format_version,
            table_uuid: Uuid::new_v4(),
            location: self.location,
            last_sequence_number: 0,
            last_updated_ms: current_time_ms()?,
            schema: Arc::new(self.schema),
            partition_specs: PartitionSpecRegistry::new(self.spec),
            properties: self.properties,
            current_snapshot_id: None,
            snapshots: vec![],
            snapshot_log: vec![],
        })
    }
}
