//! Reconciliation data model

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Attribute name used for record-level ONLY_IN_* exceptions
pub const RECORD_ATTRIBUTE: &str = "__record__";

// ============================================================================
// Attribute values
// ============================================================================

/// A single non-null attribute value as materialized from a data source.
///
/// SQL NULL is never represented here; an absent attribute is `None` at the
/// call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Composite join key. Ordering is (instrument_id, as_of_date).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub instrument_id: String,
    pub as_of_date: NaiveDate,
}

/// One security-master row from either side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub key: RecordKey,
    /// Non-key columns; NULL columns are simply missing
    pub attributes: BTreeMap<String, Value>,
}

impl SecurityRecord {
    pub fn new(instrument_id: impl Into<String>, as_of_date: NaiveDate) -> Self {
        Self {
            key: RecordKey {
                instrument_id: instrument_id.into(),
                as_of_date,
            },
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

// ============================================================================
// Engine output
// ============================================================================

/// Fixed difference taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifferenceType {
    OnlyInSource,
    OnlyInTarget,
    ValueMismatch,
}

impl DifferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlyInSource => "ONLY_IN_SOURCE",
            Self::OnlyInTarget => "ONLY_IN_TARGET",
            Self::ValueMismatch => "VALUE_MISMATCH",
        }
    }
}

impl fmt::Display for DifferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected discrepancy. Only the engine constructs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub run_id: String,
    pub as_of_date: NaiveDate,
    pub instrument_id: String,
    /// Attribute name, or [`RECORD_ATTRIBUTE`] for whole-record exceptions
    pub attribute: String,
    pub source_system: String,
    pub target_system: String,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
    pub difference_type: DifferenceType,
}

// ============================================================================
// Metrics
// ============================================================================

/// Per-run summary counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub run_id: String,
    pub as_of_date: NaiveDate,
    pub total_exceptions: u64,
    pub unexplained_exceptions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_record_key_orders_by_instrument_then_date() {
        let a = RecordKey { instrument_id: "US0001".into(), as_of_date: date("2023-12-30") };
        let b = RecordKey { instrument_id: "US0002".into(), as_of_date: date("2023-12-29") };
        let c = RecordKey { instrument_id: "US0002".into(), as_of_date: date("2023-12-30") };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Float(3.5).to_string(), "3.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Date(date("2033-12-29")).to_string(), "2033-12-29");
        assert_eq!(Value::from("DXXXXXX").to_string(), "DXXXXXX");
    }

    #[test]
    fn test_difference_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&DifferenceType::OnlyInSource).unwrap();
        assert_eq!(json, "\"ONLY_IN_SOURCE\"");
        assert_eq!(DifferenceType::ValueMismatch.to_string(), "VALUE_MISMATCH");
    }

    #[test]
    fn test_missing_attribute_is_none() {
        let rec = SecurityRecord::new("US0001", date("2023-12-29")).with("coupon", 4.0);
        assert_eq!(rec.get("coupon"), Some(&Value::Float(4.0)));
        assert!(rec.get("cfi_code").is_none());
    }
}
