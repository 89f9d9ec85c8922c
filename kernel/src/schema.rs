//! A minimal table schema: flat, id-addressed fields with primitive types. Partition transforms
//! resolve their source columns against it and derive their result types from it.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

use crate::utils::require;
use crate::{Error, KernelResult};

pub type SchemaRef = std::sync::Arc<Schema>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    Int,
    Long,
    String,
    Date,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NestedField {
    pub id: i32,
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: PrimitiveType,
}

impl NestedField {
    pub fn required(id: i32, name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            id,
            name: name.into(),
            required: true,
            field_type,
        }
    }

    pub fn optional(id: i32, name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            id,
            name: name.into(),
            required: false,
            field_type,
        }
    }
}

impl Display for NestedField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let nullability = if self.required { "required" } else { "optional" };
        write!(
            f,
            "{}: {}: {} {}",
            self.id, self.name, nullability, self.field_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Schema {
    pub schema_id: i32,
    fields: Vec<NestedField>,
}

impl Schema {
    /// Build a schema, rejecting duplicate field ids or names.
    pub fn try_new(schema_id: i32, fields: impl IntoIterator<Item = NestedField>) -> KernelResult<Self> {
        let fields: Vec<NestedField> = fields.into_iter().collect();
        for (i, field) in fields.iter().enumerate() {
            require!(
                !fields[..i].iter().any(|f| f.id == field.id || f.name == field.name),
                Error::generic(format!(
                    "Duplicate schema field: {} (id {})",
                    field.name, field.id
                ))
            );
        }
        Ok(Self { schema_id, fields })
    }

    pub fn fields(&self) -> &[NestedField] {
        &self.fields
    }

    pub fn field_by_id(&self, id: i32) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn highest_field_id(&self) -> i32 {
        self.fields.iter().map(|f| f.id).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_and_name() {
        let schema = Schema::try_new(
            0,
            [
                NestedField::required(1, "id", PrimitiveType::Int),
                NestedField::required(2, "data", PrimitiveType::String),
            ],
        )
        .unwrap();
        assert_eq!(schema.field_by_name("data").unwrap().id, 2);
        assert_eq!(schema.field_by_id(1).unwrap().name, "id");
        assert!(schema.field_by_id(3).is_none());
        assert_eq!(schema.highest_field_id(), 2);
    }

    #[test]
    fn duplicate_fields_rejected() {
        let res = Schema::try_new(
            0,
            [
                NestedField::required(1, "id", PrimitiveType::Int),
                NestedField::optional(1, "other", PrimitiveType::Long),
            ],
        );
        assert!(res.unwrap_err().to_string().contains("Duplicate schema field"));
    }

    #[test]
    fn field_display() {
        let field = NestedField::optional(1000, "data_bucket", PrimitiveType::Int);
        assert_eq!(field.to_string(), "1000: data_bucket: optional int");
    }
}
