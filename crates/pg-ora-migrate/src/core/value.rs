//! Value and row types for database-agnostic data transfer.
//!
//! Every value moved by the engine is a [`SqlValue`] - a tagged union of the
//! representations this migration actually carries. Rows are [`Record`]s, an
//! ordered column-to-value map, so that comparisons can normalize column
//! names (Oracle uppercases identifiers) without caring about column order.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Tagged value union for rows moving between source and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value (source-native; the converter maps it to 0/1).
    Bool(bool),

    /// Signed integer (covers smallint/int/bigint).
    Int(i64),

    /// Floating point value.
    Float(f64),

    /// Text data.
    Text(String),

    /// UUID value (36-character canonical form when rendered).
    Uuid(Uuid),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Semi-structured document (json/jsonb column).
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short type tag, used in logs and difference reports.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Json(_) => "json",
        }
    }

    /// Render as a SQL literal for backup statement generation.
    ///
    /// Single quotes inside text are doubled; timestamps render as ISO-8601
    /// strings so the statements replay on any target that accepts ISO input.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Uuid(u) => format!("'{}'", u),
            SqlValue::Timestamp(t) => format!("'{}'", t.format("%Y-%m-%dT%H:%M:%S%.6f")),
            SqlValue::Json(v) => format!("'{}'", v.to_string().replace('\'', "''")),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

/// One row: an ordered map of column name to value.
///
/// Column lookup is case-insensitive because the target uppercases
/// identifiers; storage preserves the names as inserted (sorted order,
/// which keeps serialized output deterministic).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    columns: BTreeMap<String, SqlValue>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value, replacing any existing value for that name
    /// (case-insensitively).
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        let column = column.into();
        if let Some(existing) = self.key_for(&column) {
            self.columns.insert(existing, value.into());
        } else {
            self.columns.insert(column, value.into());
        }
    }

    /// Builder-style `set`.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Case-insensitive column lookup.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    fn key_for(&self, column: &str) -> Option<String> {
        self.columns
            .keys()
            .find(|name| name.eq_ignore_ascii_case(column))
            .cloned()
    }

    /// Column names in storage order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Iterate over `(column, value)` pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the record has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Uppercase-keyed view, used by the sample comparator to normalize
    /// column names before field-by-field comparison.
    #[must_use]
    pub fn normalized(&self) -> BTreeMap<String, &SqlValue> {
        self.columns
            .iter()
            .map(|(name, value)| (name.to_ascii_uppercase(), value))
            .collect()
    }
}

impl FromIterator<(String, SqlValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, SqlValue)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.set(column, value);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let record = Record::new().with("user_id", 7i64).with("NAME", "ada");
        assert_eq!(record.get("USER_ID"), Some(&SqlValue::Int(7)));
        assert_eq!(record.get("name"), Some(&SqlValue::Text("ada".into())));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn test_set_replaces_across_case() {
        let mut record = Record::new().with("Id", 1i64);
        record.set("ID", 2i64);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("id"), Some(&SqlValue::Int(2)));
    }

    #[test]
    fn test_sql_literal_escaping() {
        assert_eq!(
            SqlValue::Text("o'neill".into()).to_sql_literal(),
            "'o''neill'"
        );
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
        assert_eq!(SqlValue::Bool(true).to_sql_literal(), "1");
    }

    #[test]
    fn test_normalized_uppercases_keys() {
        let record = Record::new().with("created_at", "2024-01-01");
        let normalized = record.normalized();
        assert!(normalized.contains_key("CREATED_AT"));
    }
}
