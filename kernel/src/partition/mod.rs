//! Partition specs: how a table's rows are grouped into partitions, and the tuples of partition
//! values carried by data files.
//!
//! Every partition field has a field id that is stable across the table's whole history. Ids
//! start at [`PARTITION_DATA_ID_START`] so they never collide with schema field ids, and once
//! handed out an id always refers to the same `(source, transform)` pair (or to a tombstone of
//! it). See [`PartitionSpecRegistry`] for how specs evolve.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::{NestedField, PrimitiveType, Schema};
use crate::utils::require;
use crate::{Error, KernelResult};

mod evolution;
mod parser;

pub use evolution::{PartitionSpecRegistry, RemovalPolicy, SpecEdit};
pub use parser::{partition_spec_from_json, partition_spec_to_json};

/// First id handed out to partition fields.
pub const PARTITION_DATA_ID_START: i32 = 1000;

const REMOVED_FIELD_SUFFIX: &str = "__[removed]";

pub type PartitionSpecRef = Arc<PartitionSpec>;

/// A function from a source column value to a partition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Transform {
    Identity,
    Bucket(u32),
    Truncate(u32),
    Year,
    Month,
    Day,
    Hour,
    /// Always produces null. Used for tombstones of removed fields.
    Void,
}

impl Transform {
    pub fn is_void(&self) -> bool {
        matches!(self, Transform::Void)
    }

    /// Type of the partition values produced from a source column of type `source`.
    pub fn result_type(&self, source: PrimitiveType) -> KernelResult<PrimitiveType> {
        use PrimitiveType::*;
        let result = match (self, source) {
            (Transform::Identity | Transform::Void, t) => Some(t),
            (Transform::Bucket(_), Int | Long | String | Date | Timestamp) => Some(Int),
            (Transform::Truncate(_), t @ (Int | Long | String)) => Some(t),
            (Transform::Year | Transform::Month, Date | Timestamp) => Some(Int),
            (Transform::Day, Date | Timestamp) => Some(Date),
            (Transform::Hour, Timestamp) => Some(Int),
            _ => None,
        };
        result.ok_or_else(|| {
            Error::invalid_partition_spec(format!("Cannot apply {self} to a {source} column"))
        })
    }

    /// Name a field gets when the caller does not pick one.
    pub fn default_field_name(&self, source_name: &str) -> String {
        match self {
            Transform::Identity => source_name.to_string(),
            Transform::Bucket(_) => format!("{source_name}_bucket"),
            Transform::Truncate(_) => format!("{source_name}_trunc"),
            Transform::Year => format!("{source_name}_year"),
            Transform::Month => format!("{source_name}_month"),
            Transform::Day => format!("{source_name}_day"),
            Transform::Hour => format!("{source_name}_hour"),
            Transform::Void => format!("{source_name}_null"),
        }
    }
}

impl Display for Transform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Bucket(n) => write!(f, "bucket[{n}]"),
            Transform::Truncate(w) => write!(f, "truncate[{w}]"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Void => write!(f, "void"),
        }
    }
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parameter = |prefix: &str| -> Option<KernelResult<u32>> {
            let arg = s.strip_prefix(prefix)?.strip_prefix('[')?.strip_suffix(']')?;
            Some(
                arg.parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| Error::invalid_partition_spec(format!("Invalid transform: {s}"))),
            )
        };
        match s {
            "identity" => Ok(Transform::Identity),
            "year" => Ok(Transform::Year),
            "month" => Ok(Transform::Month),
            "day" => Ok(Transform::Day),
            "hour" => Ok(Transform::Hour),
            "void" => Ok(Transform::Void),
            _ => {
                if let Some(n) = parameter("bucket") {
                    return n.map(Transform::Bucket);
                }
                if let Some(w) = parameter("truncate") {
                    return w.map(Transform::Truncate);
                }
                Err(Error::invalid_partition_spec(format!(
                    "Unknown transform: {s}"
                )))
            }
        }
    }
}

impl From<Transform> for String {
    fn from(transform: Transform) -> Self {
        transform.to_string()
    }
}

impl TryFrom<String> for Transform {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One value of a partition tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionValue {
    Boolean(bool),
    Int(i32),
    Long(i64),
    String(String),
    Date(i32),
}

impl PartitionValue {
    /// Parse the textual form used in partition paths.
    pub fn parse(raw: &str, value_type: PrimitiveType) -> KernelResult<Self> {
        let invalid = || Error::generic(format!("Cannot parse '{raw}' as {value_type}"));
        match value_type {
            PrimitiveType::Boolean => raw.parse().map(Self::Boolean).map_err(|_| invalid()),
            PrimitiveType::Int => raw.parse().map(Self::Int).map_err(|_| invalid()),
            PrimitiveType::Long | PrimitiveType::Timestamp => {
                raw.parse().map(Self::Long).map_err(|_| invalid())
            }
            PrimitiveType::Date => raw.parse().map(Self::Date).map_err(|_| invalid()),
            PrimitiveType::String => Ok(Self::String(raw.to_string())),
        }
    }
}

impl Display for PartitionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionValue::Boolean(v) => write!(f, "{v}"),
            PartitionValue::Int(v) | PartitionValue::Date(v) => write!(f, "{v}"),
            PartitionValue::Long(v) => write!(f, "{v}"),
            PartitionValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// The partition tuple of a data file, positional with respect to its spec's fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionData(Vec<Option<PartitionValue>>);

impl PartitionData {
    pub fn new(values: Vec<Option<PartitionValue>>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Option<PartitionValue>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionField {
    pub source_id: i32,
    pub field_id: i32,
    pub name: String,
    pub transform: Transform,
}

impl PartitionField {
    /// Whether this field is a placeholder for a field removed from an earlier spec.
    pub fn is_tombstone(&self) -> bool {
        self.transform.is_void() && self.name.ends_with(REMOVED_FIELD_SUFFIX)
    }

    fn tombstone_name(field_id: i32) -> String {
        format!("{field_id}{REMOVED_FIELD_SUFFIX}")
    }

    /// True if both fields compute the same values from the same column.
    pub(crate) fn same_partitioning(&self, other: &PartitionField) -> bool {
        self.source_id == other.source_id && self.transform == other.transform
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionSpec {
    spec_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// Build a spec from already-numbered fields, checking ids and names are unique.
    pub fn try_new(spec_id: i32, fields: Vec<PartitionField>) -> KernelResult<Self> {
        for (i, field) in fields.iter().enumerate() {
            let earlier = &fields[..i];
            require!(
                !earlier.iter().any(|f| f.field_id == field.field_id),
                Error::invalid_partition_spec(format!(
                    "Duplicate partition field id {}",
                    field.field_id
                ))
            );
            require!(
                !earlier.iter().any(|f| f.name == field.name),
                Error::invalid_partition_spec(format!(
                    "Duplicate partition field name: {}",
                    field.name
                ))
            );
        }
        Ok(Self { spec_id, fields })
    }

    pub fn unpartitioned() -> Self {
        Self {
            spec_id: 0,
            fields: vec![],
        }
    }

    pub fn builder(schema: &Schema) -> PartitionSpecBuilder<'_> {
        PartitionSpecBuilder::new(schema)
    }

    pub fn spec_id(&self) -> i32 {
        self.spec_id
    }

    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    pub fn field_by_name(&self, name: &str) -> Option<&PartitionField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True when every field is void, i.e. all files land in one partition.
    pub fn is_unpartitioned(&self) -> bool {
        self.fields.iter().all(|f| f.transform.is_void())
    }

    /// Highest field id in this spec, or `PARTITION_DATA_ID_START - 1` for an empty spec.
    pub fn last_assigned_field_id(&self) -> i32 {
        self.fields
            .iter()
            .map(|f| f.field_id)
            .max()
            .unwrap_or(PARTITION_DATA_ID_START - 1)
    }

    /// The result fields of this spec against `schema`. All result fields are optional.
    pub fn partition_type(&self, schema: &Schema) -> KernelResult<Vec<NestedField>> {
        self.fields
            .iter()
            .map(|field| {
                let source = schema.field_by_id(field.source_id).ok_or_else(|| {
                    Error::invalid_partition_spec(format!(
                        "Cannot find source column {} for partition field {}",
                        field.source_id, field.name
                    ))
                })?;
                let result_type = field.transform.result_type(source.field_type)?;
                Ok(NestedField::optional(field.field_id, &field.name, result_type))
            })
            .collect()
    }

    /// Parse a Hive-style partition path (`"data_bucket=2/id_bucket=null"`) into a tuple.
    pub fn parse_partition_path(&self, schema: &Schema, path: &str) -> KernelResult<PartitionData> {
        let partition_type = self.partition_type(schema)?;
        let parts: Vec<&str> = if path.is_empty() {
            vec![]
        } else {
            path.split('/').collect()
        };
        require!(
            parts.len() == partition_type.len(),
            Error::generic(format!(
                "Invalid partition path '{path}': expected {} fields",
                partition_type.len()
            ))
        );
        let values = parts
            .into_iter()
            .zip(partition_type.iter())
            .map(|(part, field)| {
                let (name, raw) = part.split_once('=').ok_or_else(|| {
                    Error::generic(format!("Invalid partition path segment '{part}'"))
                })?;
                require!(
                    name == field.name,
                    Error::generic(format!(
                        "Partition path segment '{name}' does not match field '{}'",
                        field.name
                    ))
                );
                match raw {
                    "null" => Ok(None),
                    raw => PartitionValue::parse(raw, field.field_type).map(Some),
                }
            })
            .collect::<KernelResult<Vec<_>>>()?;
        Ok(PartitionData::new(values))
    }

    /// Render a tuple as a Hive-style partition path.
    pub fn partition_path(&self, data: &PartitionData) -> String {
        self.fields
            .iter()
            .zip(data.values())
            .map(|(field, value)| match value {
                Some(value) => format!("{}={value}", field.name),
                None => format!("{}=null", field.name),
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Whether `other` partitions data identically (spec ids aside).
    pub fn compatible_with(&self, other: &PartitionSpec) -> bool {
        self.fields == other.fields
    }

    pub(crate) fn with_spec_id(mut self, spec_id: i32) -> Self {
        self.spec_id = spec_id;
        self
    }
}

/// A partition field name may only shadow a schema column when it is the identity partition of
/// that very column.
pub(crate) fn check_name_against_schema(
    schema: &Schema,
    name: &str,
    source_id: i32,
    transform: Transform,
) -> KernelResult<()> {
    if let Some(column) = schema.field_by_name(name) {
        require!(
            column.id == source_id && transform == Transform::Identity,
            Error::invalid_partition_spec(format!(
                "Cannot create partition from name that exists in schema: {name}"
            ))
        );
    }
    Ok(())
}

/// Builds the first spec of a table, numbering fields from [`PARTITION_DATA_ID_START`].
#[derive(Debug)]
pub struct PartitionSpecBuilder<'a> {
    schema: &'a Schema,
    spec_id: i32,
    pending: Vec<(String, Transform, Option<String>)>,
}

impl<'a> PartitionSpecBuilder<'a> {
    fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            spec_id: 0,
            pending: vec![],
        }
    }

    pub fn with_spec_id(mut self, spec_id: i32) -> Self {
        self.spec_id = spec_id;
        self
    }

    pub fn add_field(mut self, source: impl Into<String>, transform: Transform) -> Self {
        self.pending.push((source.into(), transform, None));
        self
    }

    pub fn add_named_field(
        mut self,
        source: impl Into<String>,
        transform: Transform,
        name: impl Into<String>,
    ) -> Self {
        self.pending.push((source.into(), transform, Some(name.into())));
        self
    }

    pub fn identity(self, source: impl Into<String>) -> Self {
        self.add_field(source, Transform::Identity)
    }

    pub fn bucket(self, source: impl Into<String>, buckets: u32) -> Self {
        self.add_field(source, Transform::Bucket(buckets))
    }

    pub fn truncate(self, source: impl Into<String>, width: u32) -> Self {
        self.add_field(source, Transform::Truncate(width))
    }

    pub fn day(self, source: impl Into<String>) -> Self {
        self.add_field(source, Transform::Day)
    }

    pub fn build(self) -> KernelResult<PartitionSpec> {
        let mut fields: Vec<PartitionField> = Vec::with_capacity(self.pending.len());
        let mut next_id = PARTITION_DATA_ID_START;
        for (source, transform, name) in self.pending {
            let column = self.schema.field_by_name(&source).ok_or_else(|| {
                Error::invalid_partition_spec(format!("Cannot find source column: {source}"))
            })?;
            transform.result_type(column.field_type)?;
            require!(
                !fields.iter().any(|f| f.source_id == column.id && f.transform == transform),
                Error::invalid_partition_spec(format!(
                    "Cannot add redundant partition: {transform}({source})"
                ))
            );
            let name = name.unwrap_or_else(|| transform.default_field_name(&column.name));
            check_name_against_schema(self.schema, &name, column.id, transform)?;
            fields.push(PartitionField {
                source_id: column.id,
                field_id: next_id,
                name,
                transform,
            });
            next_id += 1;
        }
        PartitionSpec::try_new(self.spec_id, fields)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::schema::NestedField;

    fn schema() -> Schema {
        Schema::try_new(
            0,
            [
                NestedField::required(1, "id", PrimitiveType::Int),
                NestedField::required(2, "data", PrimitiveType::String),
                NestedField::optional(3, "ts", PrimitiveType::Timestamp),
            ],
        )
        .unwrap()
    }

    #[rstest]
    #[case("identity", Transform::Identity)]
    #[case("bucket[16]", Transform::Bucket(16))]
    #[case("truncate[4]", Transform::Truncate(4))]
    #[case("year", Transform::Year)]
    #[case("month", Transform::Month)]
    #[case("day", Transform::Day)]
    #[case("hour", Transform::Hour)]
    #[case("void", Transform::Void)]
    fn transform_string_form(#[case] text: &str, #[case] transform: Transform) {
        assert_eq!(text.parse::<Transform>().unwrap(), transform);
        assert_eq!(transform.to_string(), text);
    }

    #[rstest]
    #[case("bucket[0]")]
    #[case("bucket[x]")]
    #[case("truncate")]
    #[case("zorder")]
    fn invalid_transforms(#[case] text: &str) {
        assert!(text.parse::<Transform>().is_err());
    }

    #[test]
    fn builder_assigns_ids_from_start() {
        let schema = schema();
        let spec = PartitionSpec::builder(&schema)
            .bucket("data", 16)
            .identity("id")
            .day("ts")
            .build()
            .unwrap();
        let ids: Vec<i32> = spec.fields().iter().map(|f| f.field_id).collect();
        assert_eq!(ids, vec![1000, 1001, 1002]);
        assert_eq!(spec.last_assigned_field_id(), 1002);
        let partition_type: Vec<String> = spec
            .partition_type(&schema)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            partition_type,
            vec![
                "1000: data_bucket: optional int",
                "1001: id: optional int",
                "1002: ts_day: optional date",
            ]
        );
    }

    #[test]
    fn builder_rejects_bad_fields() {
        let schema = schema();
        let missing = PartitionSpec::builder(&schema).identity("nope").build();
        assert!(missing.unwrap_err().to_string().contains("Cannot find source column"));

        let redundant = PartitionSpec::builder(&schema)
            .bucket("data", 16)
            .add_named_field("data", Transform::Bucket(16), "other")
            .build();
        assert!(redundant.unwrap_err().to_string().contains("redundant partition"));

        let shadowing = PartitionSpec::builder(&schema)
            .add_named_field("data", Transform::Bucket(4), "id")
            .build();
        assert!(shadowing.unwrap_err().to_string().contains("exists in schema"));

        let bad_type = PartitionSpec::builder(&schema).day("data").build();
        assert!(bad_type.unwrap_err().to_string().contains("Cannot apply day"));
    }

    #[test]
    fn unpartitioned_spec() {
        let spec = PartitionSpec::unpartitioned();
        assert!(spec.is_unpartitioned());
        assert_eq!(spec.last_assigned_field_id(), 999);
    }

    #[test]
    fn partition_path_round_trip() {
        let schema = schema();
        let spec = PartitionSpec::builder(&schema)
            .bucket("data", 16)
            .identity("id")
            .build()
            .unwrap();
        let data = spec
            .parse_partition_path(&schema, "data_bucket=3/id=null")
            .unwrap();
        assert_eq!(
            data.values(),
            &[Some(PartitionValue::Int(3)), None]
        );
        assert_eq!(spec.partition_path(&data), "data_bucket=3/id=null");

        let wrong = spec.parse_partition_path(&schema, "id=3/data_bucket=1");
        assert!(wrong.is_err());
        let short = spec.parse_partition_path(&schema, "data_bucket=3");
        assert!(short.is_err());
    }
}
