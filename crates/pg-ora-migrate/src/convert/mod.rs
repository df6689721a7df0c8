//! Type conversion from PostgreSQL-native values to Oracle-native
//! representations.
//!
//! Conventions applied, one per source kind:
//!
//! - `uuid` -> 36-character canonical lowercase string (`CHAR(36)` column)
//! - `json` / `jsonb` -> serialized JSON text (`CLOB` column)
//! - `boolean` -> 0/1 (`NUMBER(1)` column; Oracle has no native boolean)
//! - `timestamp` / `timestamptz` / `date` -> ISO-8601 text for timestamp binds
//!
//! [`convert`] is pure and deterministic. The importer tallies one
//! [`ConversionKind`] per converted value; the tally is diagnostic output,
//! not a correctness gate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::SqlValue;

/// What kind of conversion a value went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    /// UUID rendered as a canonical 36-character string.
    UuidToChar,

    /// Semi-structured document serialized to a text blob.
    JsonToClob,

    /// Boolean mapped to 0/1.
    BooleanToNumber,

    /// Timestamp rendered as ISO-8601 text.
    TimestampToIso,

    /// Value carried over unchanged.
    Passthrough,
}

/// Convert one source value to its target representation.
///
/// `source_type` is the source column's declared type (lowercased udt name
/// for PostgreSQL). NULLs pass through unchanged regardless of type.
pub fn convert(value: &SqlValue, source_type: &str) -> (SqlValue, ConversionKind) {
    if value.is_null() {
        return (SqlValue::Null, ConversionKind::Passthrough);
    }

    match source_type.to_ascii_lowercase().as_str() {
        "uuid" => {
            let text = match value {
                SqlValue::Uuid(u) => u.to_string(),
                SqlValue::Text(s) => s.to_ascii_lowercase(),
                other => return (other.clone(), ConversionKind::Passthrough),
            };
            (SqlValue::Text(text), ConversionKind::UuidToChar)
        }

        "json" | "jsonb" => {
            let text = match value {
                SqlValue::Json(v) => v.to_string(),
                // Already-serialized documents stay as they are.
                SqlValue::Text(s) => s.clone(),
                other => return (other.clone(), ConversionKind::Passthrough),
            };
            (SqlValue::Text(text), ConversionKind::JsonToClob)
        }

        "bool" | "boolean" => match value {
            SqlValue::Bool(b) => (
                SqlValue::Int(if *b { 1 } else { 0 }),
                ConversionKind::BooleanToNumber,
            ),
            SqlValue::Int(v) => (SqlValue::Int(*v), ConversionKind::BooleanToNumber),
            other => (other.clone(), ConversionKind::Passthrough),
        },

        "timestamp" | "timestamptz" | "date" | "timestamp without time zone"
        | "timestamp with time zone" => match value {
            SqlValue::Timestamp(t) => (
                SqlValue::Text(t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
                ConversionKind::TimestampToIso,
            ),
            other => (other.clone(), ConversionKind::Passthrough),
        },

        _ => (value.clone(), ConversionKind::Passthrough),
    }
}

/// Per-kind conversion counter accumulated across an import.
#[derive(Debug, Clone, Default)]
pub struct ConversionTally {
    counts: HashMap<ConversionKind, u64>,
}

impl ConversionTally {
    /// Create an empty tally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one conversion.
    pub fn record(&mut self, kind: ConversionKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    /// Count for a single kind.
    #[must_use]
    pub fn count(&self, kind: ConversionKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Consume the tally into the map form carried by `ImportResult`.
    #[must_use]
    pub fn into_counts(self) -> HashMap<ConversionKind, u64> {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn test_uuid_to_char36() {
        let id = Uuid::parse_str("6fa459ea-ee8a-3ca4-894e-db77e160355e").unwrap();
        let (value, kind) = convert(&SqlValue::Uuid(id), "uuid");
        assert_eq!(kind, ConversionKind::UuidToChar);
        match value {
            SqlValue::Text(s) => {
                assert_eq!(s.len(), 36);
                assert_eq!(s, "6fa459ea-ee8a-3ca4-894e-db77e160355e");
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_jsonb_to_clob_text() {
        let doc = serde_json::json!({"tags": ["a", "b"], "size": 3});
        let (value, kind) = convert(&SqlValue::Json(doc.clone()), "jsonb");
        assert_eq!(kind, ConversionKind::JsonToClob);
        match value {
            SqlValue::Text(s) => {
                assert_eq!(serde_json::from_str::<serde_json::Value>(&s).unwrap(), doc)
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_boolean_to_number_convention() {
        assert_eq!(
            convert(&SqlValue::Bool(true), "boolean"),
            (SqlValue::Int(1), ConversionKind::BooleanToNumber)
        );
        assert_eq!(
            convert(&SqlValue::Bool(false), "bool"),
            (SqlValue::Int(0), ConversionKind::BooleanToNumber)
        );
    }

    #[test]
    fn test_timestamp_to_iso() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_micro_opt(9, 30, 1, 250_000)
            .unwrap();
        let (value, kind) = convert(&SqlValue::Timestamp(ts), "timestamptz");
        assert_eq!(kind, ConversionKind::TimestampToIso);
        assert_eq!(value, SqlValue::Text("2024-03-05T09:30:01.250000".into()));
    }

    #[test]
    fn test_null_passes_through() {
        let (value, kind) = convert(&SqlValue::Null, "uuid");
        assert_eq!(value, SqlValue::Null);
        assert_eq!(kind, ConversionKind::Passthrough);
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let (value, kind) = convert(&SqlValue::Int(42), "int8");
        assert_eq!(value, SqlValue::Int(42));
        assert_eq!(kind, ConversionKind::Passthrough);
    }

    #[test]
    fn test_convert_is_deterministic() {
        let doc = SqlValue::Json(serde_json::json!({"b": 1, "a": 2}));
        assert_eq!(convert(&doc, "json"), convert(&doc, "json"));
    }

    #[test]
    fn test_tally_counts() {
        let mut tally = ConversionTally::new();
        tally.record(ConversionKind::UuidToChar);
        tally.record(ConversionKind::UuidToChar);
        tally.record(ConversionKind::BooleanToNumber);
        assert_eq!(tally.count(ConversionKind::UuidToChar), 2);
        assert_eq!(tally.count(ConversionKind::BooleanToNumber), 1);
        assert_eq!(tally.count(ConversionKind::JsonToClob), 0);
    }
}
