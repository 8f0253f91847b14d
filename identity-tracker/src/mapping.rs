//! Identity mapping types
//!
//! Core types for the bijection between external ids and vector ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrackerError};

/// Opaque metadata attached to a mapping
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key carrying the external id inside vector index records
pub const EXTERNAL_ID_KEY: &str = "external_id";

/// Bijective association between one external id and one vector id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Identifier meaningful to the rest of the application
    pub external_id: String,
    /// Identifier used inside the vector index
    pub vector_id: String,
    /// Caller-supplied metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// When the mapping was first recorded
    pub created_at: DateTime<Utc>,
    /// When the metadata was last overwritten
    pub updated_at: DateTime<Utc>,
}

impl IdentityMapping {
    /// Create a mapping stamped with the current time
    pub fn new(
        external_id: impl Into<String>,
        vector_id: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            external_id: external_id.into(),
            vector_id: vector_id.into(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Approximate in-memory footprint, used by the cache budget
    pub fn approximate_size(&self) -> usize {
        const OVERHEAD: usize = 96;
        let metadata_len = serde_json::to_string(&self.metadata)
            .map(|s| s.len())
            .unwrap_or(0);
        OVERHEAD + 2 * self.external_id.len() + 2 * self.vector_id.len() + metadata_len
    }
}

/// Row layout of the relational mapping table
///
/// Metadata is held as JSON text; it is decoded only when a row is turned
/// back into an [`IdentityMapping`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRow {
    pub external_id: String,
    pub vector_id: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MappingRow {
    pub fn encode(mapping: &IdentityMapping) -> Result<Self> {
        Ok(Self {
            external_id: mapping.external_id.clone(),
            vector_id: mapping.vector_id.clone(),
            metadata: serde_json::to_string(&mapping.metadata)?,
            created_at: mapping.created_at,
            updated_at: mapping.updated_at,
        })
    }

    pub fn decode(self) -> Result<IdentityMapping> {
        let metadata = if self.metadata.is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(&self.metadata)?
        };
        Ok(IdentityMapping {
            external_id: self.external_id,
            vector_id: self.vector_id,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Reject empty identifiers
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(TrackerError::integrity(format!("{} must not be empty", kind)));
    }
    Ok(())
}

/// Check caller-supplied metadata shape
///
/// Keys must be non-empty and must not shadow [`EXTERNAL_ID_KEY`], which the
/// vector adapter writes into index records.
pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    for key in metadata.keys() {
        if key.is_empty() {
            return Err(TrackerError::integrity("metadata keys must not be empty"));
        }
        if key == EXTERNAL_ID_KEY {
            return Err(TrackerError::integrity(format!(
                "metadata key '{}' is reserved",
                EXTERNAL_ID_KEY
            )));
        }
    }
    Ok(())
}

/// Interpret an arbitrary JSON value as metadata
pub fn metadata_from_value(value: Value) -> Result<Metadata> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        other => Err(TrackerError::integrity(format!(
            "metadata must be a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested() -> Metadata {
        metadata_from_value(json!({
            "type": "bug_report",
            "severity": "high",
            "tags": ["ui", {"nested": [1, 2, 3]}],
            "owner": {"id": 7, "name": "ops", "active": true, "score": null}
        }))
        .unwrap()
    }

    #[test]
    fn test_row_round_trip_preserves_nested_metadata() {
        let mapping = IdentityMapping::new("bug_report_5", "vec-5", nested());
        let row = MappingRow::encode(&mapping).unwrap();
        assert!(row.metadata.contains("\"severity\":\"high\""));

        let decoded = row.decode().unwrap();
        assert_eq!(decoded, mapping);
    }

    #[test]
    fn test_row_with_empty_metadata_text() {
        let row = MappingRow {
            external_id: "user_1".into(),
            vector_id: "v1".into(),
            metadata: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(row.decode().unwrap().metadata.is_empty());
    }

    #[test]
    fn test_validate_metadata_rejects_reserved_key() {
        let meta = metadata_from_value(json!({ "external_id": "spoofed" })).unwrap();
        let err = validate_metadata(&meta).unwrap_err();
        assert!(matches!(err, TrackerError::IntegrityViolation(_)));
    }

    #[test]
    fn test_validate_metadata_rejects_empty_key() {
        let meta = metadata_from_value(json!({ "": 1 })).unwrap();
        assert!(validate_metadata(&meta).is_err());
        assert!(validate_metadata(&nested()).is_ok());
    }

    #[test]
    fn test_metadata_from_value_rejects_non_objects() {
        assert!(metadata_from_value(json!([1, 2])).is_err());
        assert!(metadata_from_value(json!("text")).is_err());
        assert!(metadata_from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("external id", "user_1").is_ok());
        assert!(validate_id("external id", "  ").is_err());
    }

    #[test]
    fn test_approximate_size_grows_with_metadata() {
        let small = IdentityMapping::new("a", "b", Metadata::new());
        let large = IdentityMapping::new("a", "b", nested());
        assert!(large.approximate_size() > small.approximate_size());
    }
}
