//! JSON form of a partition spec:
//!
//! ```json
//! {"spec-id": 1, "fields": [
//!   {"name": "data_bucket", "transform": "bucket[16]", "source-id": 2, "field-id": 1000}
//! ]}
//! ```
//!
//! `field-id` may be omitted by older writers; such fields are numbered in order from
//! [`PARTITION_DATA_ID_START`], skipping ids already claimed by earlier fields.

use serde::Deserialize;

use super::{PartitionField, PartitionSpec, Transform, PARTITION_DATA_ID_START};
use crate::KernelResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UnboundPartitionSpec {
    spec_id: i32,
    fields: Vec<UnboundPartitionField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UnboundPartitionField {
    name: String,
    transform: Transform,
    source_id: i32,
    #[serde(default)]
    field_id: Option<i32>,
}

pub fn partition_spec_from_json(json: &str) -> KernelResult<PartitionSpec> {
    let unbound: UnboundPartitionSpec = serde_json::from_str(json)?;
    let mut next_id = PARTITION_DATA_ID_START;
    let fields = unbound
        .fields
        .into_iter()
        .map(|field| {
            let field_id = field.field_id.unwrap_or(next_id);
            next_id = next_id.max(field_id + 1);
            PartitionField {
                source_id: field.source_id,
                field_id,
                name: field.name,
                transform: field.transform,
            }
        })
        .collect();
    PartitionSpec::try_new(unbound.spec_id, fields)
}

pub fn partition_spec_to_json(spec: &PartitionSpec) -> KernelResult<String> {
    Ok(serde_json::to_string(spec)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_json_layout() {
        let spec = PartitionSpec::try_new(
            1,
            vec![
                PartitionField {
                    source_id: 1,
                    field_id: 1001,
                    name: "id_bucket".to_string(),
                    transform: Transform::Bucket(8),
                },
                PartitionField {
                    source_id: 2,
                    field_id: 1000,
                    name: "data_bucket".to_string(),
                    transform: Transform::Bucket(16),
                },
            ],
        )
        .unwrap();
        let expected = r#"{"spec-id":1,"fields":[{"source-id":1,"field-id":1001,"name":"id_bucket","transform":"bucket[8]"},{"source-id":2,"field-id":1000,"name":"data_bucket","transform":"bucket[16]"}]}"#;
        assert_eq!(partition_spec_to_json(&spec).unwrap(), expected);
        assert_eq!(partition_spec_from_json(expected).unwrap(), spec);
    }

    #[test]
    fn from_json_with_field_ids() {
        let json = r#"{
            "spec-id": 1,
            "fields": [
                {"name": "id_bucket", "transform": "bucket[8]", "source-id": 1, "field-id": 1001},
                {"name": "data_bucket", "transform": "bucket[16]", "source-id": 2, "field-id": 1000}
            ]
        }"#;
        let spec = partition_spec_from_json(json).unwrap();
        assert_eq!(spec.spec_id(), 1);
        assert_eq!(spec.fields()[0].field_id, 1001);
        assert_eq!(spec.fields()[1].field_id, 1000);
        assert_eq!(spec.last_assigned_field_id(), 1001);
    }

    #[test]
    fn from_json_without_field_ids() {
        let json = r#"{
            "spec-id": 1,
            "fields": [
                {"name": "id_bucket", "transform": "bucket[8]", "source-id": 1},
                {"name": "data_bucket", "transform": "bucket[16]", "source-id": 2}
            ]
        }"#;
        let spec = partition_spec_from_json(json).unwrap();
        assert_eq!(spec.fields()[0].field_id, 1000);
        assert_eq!(spec.fields()[1].field_id, 1001);
        assert_eq!(spec.last_assigned_field_id(), 1001);
    }

    #[test]
    fn from_json_rejects_bad_input() {
        let bad_transform =
            r#"{"spec-id": 0, "fields": [{"name": "x", "transform": "bucket[", "source-id": 1}]}"#;
        assert!(partition_spec_from_json(bad_transform).is_err());

        let dup_ids = r#"{"spec-id": 0, "fields": [
            {"name": "a", "transform": "identity", "source-id": 1, "field-id": 1000},
            {"name": "b", "transform": "identity", "source-id": 2, "field-id": 1000}
        ]}"#;
        let err = partition_spec_from_json(dup_ids).unwrap_err();
        assert!(err.to_string().contains("Duplicate partition field id 1000"));
    }
}
