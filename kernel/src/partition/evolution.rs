//! The versioned set of partition specs of a table and the rules for evolving it.
//!
//! Evolution never renumbers a field: existing fields keep their ids, new fields get ids above
//! the table-wide high-water mark (or reuse the id an identical field had in an earlier spec),
//! and removed fields are either left in place as void tombstones or dropped, depending on
//! whether readers decode partition tuples by position or by field id.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    check_name_against_schema, PartitionField, PartitionSpec, PartitionSpecRef, Transform,
    PARTITION_DATA_ID_START,
};
use crate::schema::Schema;
use crate::utils::require;
use crate::{Error, KernelResult};

/// What happens to a partition field when an evolution removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Keep the slot as a void field so positional decoding of older tuples still works.
    Tombstone,
    /// Remove the field; tuples are decoded by field id.
    Drop,
}

/// A single change to the current partition spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecEdit {
    AddField {
        source: String,
        transform: Transform,
        name: Option<String>,
    },
    RemoveField {
        name: String,
    },
    RenameField {
        from: String,
        to: String,
    },
}

/// All partition specs a table has ever had, the current default, and the highest partition
/// field id ever assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionSpecRegistry {
    #[serde(rename = "partition-specs")]
    specs: Vec<PartitionSpecRef>,
    default_spec_id: i32,
    #[serde(rename = "last-partition-id")]
    last_assigned_field_id: i32,
}

impl PartitionSpecRegistry {
    pub fn new(initial: PartitionSpec) -> Self {
        Self {
            default_spec_id: initial.spec_id(),
            last_assigned_field_id: initial.last_assigned_field_id(),
            specs: vec![PartitionSpecRef::new(initial)],
        }
    }

    pub fn specs(&self) -> &[PartitionSpecRef] {
        &self.specs
    }

    pub fn spec(&self, spec_id: i32) -> Option<&PartitionSpecRef> {
        self.specs.iter().find(|s| s.spec_id() == spec_id)
    }

    pub fn default_spec_id(&self) -> i32 {
        self.default_spec_id
    }

    pub fn default_spec(&self) -> KernelResult<&PartitionSpecRef> {
        self.spec(self.default_spec_id).ok_or_else(|| {
            Error::internal_error(format!(
                "Default partition spec {} is not registered",
                self.default_spec_id
            ))
        })
    }

    /// Highest partition field id ever assigned in this table, across every spec.
    pub fn last_assigned_field_id(&self) -> i32 {
        self.last_assigned_field_id
    }

    fn next_spec_id(&self) -> i32 {
        self.specs
            .iter()
            .map(|s| s.spec_id())
            .max()
            .map_or(0, |id| id + 1)
    }

    /// Apply `edits` to the default spec and return a registry whose default is the result.
    pub fn evolve(
        &self,
        schema: &Schema,
        edits: &[SpecEdit],
        policy: RemovalPolicy,
    ) -> KernelResult<Self> {
        let current = self.default_spec()?;
        let mut fields: Vec<PartitionField> = current.fields().to_vec();
        let mut last_assigned = self.last_assigned_field_id;

        for edit in edits {
            match edit {
                SpecEdit::RemoveField { name } => {
                    let pos = live_position(&fields, name).ok_or_else(|| {
                        Error::invalid_partition_spec(format!(
                            "Cannot find partition field to remove: {name}"
                        ))
                    })?;
                    match policy {
                        RemovalPolicy::Tombstone => {
                            let field = &mut fields[pos];
                            field.name = PartitionField::tombstone_name(field.field_id);
                            field.transform = Transform::Void;
                        }
                        RemovalPolicy::Drop => {
                            fields.remove(pos);
                        }
                    }
                }
                SpecEdit::RenameField { from, to } => {
                    let pos = live_position(&fields, from).ok_or_else(|| {
                        Error::invalid_partition_spec(format!(
                            "Cannot find partition field to rename: {from}"
                        ))
                    })?;
                    require!(
                        !fields.iter().any(|f| f.name == *to),
                        Error::invalid_partition_spec(format!(
                            "Cannot rename partition field {from}: {to} already exists"
                        ))
                    );
                    let field = &fields[pos];
                    check_name_against_schema(schema, to, field.source_id, field.transform)?;
                    fields[pos].name = to.clone();
                }
                SpecEdit::AddField {
                    source,
                    transform,
                    name,
                } => {
                    let column = schema.field_by_name(source).ok_or_else(|| {
                        Error::invalid_partition_spec(format!(
                            "Cannot find source column: {source}"
                        ))
                    })?;
                    transform.result_type(column.field_type)?;
                    let candidate = PartitionField {
                        source_id: column.id,
                        field_id: 0,
                        name: name
                            .clone()
                            .unwrap_or_else(|| transform.default_field_name(&column.name)),
                        transform: *transform,
                    };
                    require!(
                        !fields
                            .iter()
                            .any(|f| !f.transform.is_void() && f.same_partitioning(&candidate)),
                        Error::invalid_partition_spec(format!(
                            "Cannot add duplicate partition field: {transform}({source})"
                        ))
                    );
                    require!(
                        !fields.iter().any(|f| f.name == candidate.name),
                        Error::invalid_partition_spec(format!(
                            "Cannot add partition field with duplicate name: {}",
                            candidate.name
                        ))
                    );
                    check_name_against_schema(
                        schema,
                        &candidate.name,
                        candidate.source_id,
                        candidate.transform,
                    )?;
                    let field_id = match self.recycled_field_id(&candidate, &fields) {
                        Some(id) => id,
                        None => {
                            last_assigned += 1;
                            last_assigned
                        }
                    };
                    fields.push(PartitionField {
                        field_id,
                        ..candidate
                    });
                }
            }
        }

        let evolved = PartitionSpec::try_new(current.spec_id(), fields)?;
        self.install(evolved, last_assigned)
    }

    /// Register a spec built elsewhere (for instance parsed from JSON) and make it the default.
    /// Its field ids must agree with every spec already registered.
    pub fn with_spec(&self, spec: PartitionSpec) -> KernelResult<Self> {
        for field in spec.fields() {
            let conflicting = self
                .specs
                .iter()
                .flat_map(|s| s.fields())
                .find(|f| {
                    f.field_id == field.field_id
                        && !f.transform.is_void()
                        && !field.transform.is_void()
                        && !f.same_partitioning(field)
                });
            if let Some(existing) = conflicting {
                return Err(Error::invalid_partition_spec(format!(
                    "Field id {} already assigned to {}({}), cannot reuse it for {}({})",
                    field.field_id,
                    existing.transform,
                    existing.source_id,
                    field.transform,
                    field.source_id
                )));
            }
        }
        let last_assigned = self
            .last_assigned_field_id
            .max(spec.last_assigned_field_id());
        self.install(spec, last_assigned)
    }

    fn install(&self, spec: PartitionSpec, last_assigned: i32) -> KernelResult<Self> {
        let mut next = self.clone();
        next.last_assigned_field_id = last_assigned.max(PARTITION_DATA_ID_START - 1);
        if let Some(existing) = self.specs.iter().find(|s| s.compatible_with(&spec)) {
            debug!(spec_id = existing.spec_id(), "Evolved spec matches a registered spec");
            next.default_spec_id = existing.spec_id();
            return Ok(next);
        }
        let spec_id = self.next_spec_id();
        next.specs.push(PartitionSpecRef::new(spec.with_spec_id(spec_id)));
        next.default_spec_id = spec_id;
        Ok(next)
    }

    /// Id an identical field had in an earlier spec, if that id is free in `fields`.
    fn recycled_field_id(
        &self,
        candidate: &PartitionField,
        fields: &[PartitionField],
    ) -> Option<i32> {
        self.specs
            .iter()
            .rev()
            .flat_map(|s| s.fields())
            .find(|f| !f.transform.is_void() && f.same_partitioning(candidate))
            .map(|f| f.field_id)
            .filter(|id| !fields.iter().any(|f| f.field_id == *id))
    }
}

fn live_position(fields: &[PartitionField], name: &str) -> Option<usize> {
    fields
        .iter()
        .position(|f| f.name == name && !f.transform.is_void())
}
