//! Reconciliation engine
//!
//! Aligns the source (legacy) and target (strategic) record sets with a full
//! outer join on `(instrument_id, as_of_date)` and emits one
//! [`ExceptionRecord`] per discrepancy:
//!
//! - key only in source → `ONLY_IN_SOURCE` (target value null)
//! - key only in target → `ONLY_IN_TARGET` (source value null)
//! - key on both sides  → `VALUE_MISMATCH` for each comparable attribute that
//!   is not equal under its rule (raw equality when no rule exists)
//!
//! The engine is a pure function of its inputs. Output is ordered by key, then
//! by the configured attribute order. A coercion failure aborts the whole
//! reconciliation; no partial exception set is ever returned.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::model::{DifferenceType, ExceptionRecord, RecordKey, SecurityRecord, Value, RECORD_ATTRIBUTE};
use crate::rules::{AttributeRule, RuleCatalog, RuleType};
use crate::{Error, Result};

/// Attributes compared when none are configured
pub const DEFAULT_ATTRIBUTES: [&str; 4] = ["coupon", "cfi_code", "maturity_date", "callable_flag"];

/// How keys present on only one side are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingGranularity {
    /// One exception per comparable attribute, carrying the present side's value
    #[default]
    Attribute,
    /// One exception per key with attribute `__record__`
    Record,
}

/// Per-run engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Comparable attributes, in output order
    pub attributes: Vec<String>,
    pub granularity: MissingGranularity,
    pub source_system: String,
    pub target_system: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            attributes: DEFAULT_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
            granularity: MissingGranularity::Attribute,
            source_system: "legacy".to_string(),
            target_system: "strategic".to_string(),
        }
    }
}

// ============================================================================
// Outer join
// ============================================================================

/// Classification of one key in the outer join
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Joined<'a> {
    SourceOnly(&'a SecurityRecord),
    TargetOnly(&'a SecurityRecord),
    Both(&'a SecurityRecord, &'a SecurityRecord),
}

impl Joined<'_> {
    pub fn key(&self) -> &RecordKey {
        match self {
            Joined::SourceOnly(r) | Joined::TargetOnly(r) | Joined::Both(r, _) => &r.key,
        }
    }
}

/// Index records by key. The first row for a key wins.
fn index_by_key<'a>(side: &str, records: &'a [SecurityRecord]) -> BTreeMap<&'a RecordKey, &'a SecurityRecord> {
    let mut map = BTreeMap::new();
    let mut duplicates = 0usize;
    for record in records {
        if map.contains_key(&record.key) {
            duplicates += 1;
            continue;
        }
        map.insert(&record.key, record);
    }
    if duplicates > 0 {
        warn!(side, duplicates, "Duplicate keys ignored (first row kept)");
    }
    map
}

/// Full outer join on the composite key. Every distinct key from either input
/// appears exactly once, in key order.
pub fn outer_join<'a>(source: &'a [SecurityRecord], target: &'a [SecurityRecord]) -> Vec<Joined<'a>> {
    let source_map = index_by_key("source", source);
    let target_map = index_by_key("target", target);

    let keys: BTreeSet<&RecordKey> = source_map.keys().chain(target_map.keys()).copied().collect();

    keys.into_iter()
        .filter_map(|key| match (source_map.get(key), target_map.get(key)) {
            (Some(s), Some(t)) => Some(Joined::Both(s, t)),
            (Some(s), None) => Some(Joined::SourceOnly(s)),
            (None, Some(t)) => Some(Joined::TargetOnly(t)),
            (None, None) => None,
        })
        .collect()
}

// ============================================================================
// Value equality
// ============================================================================

/// A value after rule-driven normalization
#[derive(Debug, Clone, PartialEq)]
enum Normalized {
    Float(f64),
    Bool(bool),
    Text(String),
    Date(NaiveDate),
    Raw(Value),
}

fn coercion(rule: &AttributeRule, value: &Value, expected: &'static str) -> Error {
    Error::Coercion {
        attribute: rule.name.clone(),
        value: value.to_string(),
        expected,
    }
}

fn to_float(value: &Value, rule: &AttributeRule) -> Result<f64> {
    match value {
        Value::Float(x) => Ok(*x),
        Value::Integer(i) => Ok(*i as f64),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s.trim().parse::<f64>().map_err(|_| coercion(rule, value, "float")),
        Value::Date(_) => Err(coercion(rule, value, "float")),
    }
}

fn to_bool(value: &Value, rule: &AttributeRule) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Integer(i) => Ok(*i != 0),
        Value::Float(x) => Ok(*x != 0.0),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" => Ok(false),
            _ => Err(coercion(rule, value, "boolean")),
        },
        Value::Date(_) => Err(coercion(rule, value, "boolean")),
    }
}

/// Dates are unified across `Value::Date` and ISO text. Anything that does
/// not parse compares unmodified.
fn to_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Text(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
                .ok()
        }
        _ => None,
    }
}

/// Text form used by string rules. Integral floats keep a trailing `.0` so
/// `5.0` and `"5.0"` agree.
fn to_text(value: &Value) -> String {
    match value {
        Value::Float(x) if x.is_finite() && x.fract() == 0.0 => format!("{x:.1}"),
        other => other.to_string(),
    }
}

fn normalize(value: &Value, rule: &AttributeRule) -> Result<Normalized> {
    Ok(match rule.rule_type {
        RuleType::Float => Normalized::Float(to_float(value, rule)?),
        RuleType::Boolean => Normalized::Bool(to_bool(value, rule)?),
        RuleType::String => {
            let mut s = to_text(value);
            if rule.trim {
                s = s.trim().to_string();
            }
            if rule.ignore_case {
                s = s.to_uppercase();
            }
            Normalized::Text(s)
        }
        RuleType::Date => to_date(value).map_or_else(|| Normalized::Raw(value.clone()), Normalized::Date),
        RuleType::Passthrough => Normalized::Raw(value.clone()),
    })
}

/// Compare two possibly-absent values under `rule`.
///
/// Both absent → equal; exactly one absent → not equal. Otherwise both sides
/// are normalized per the rule type; float rules with a tolerance compare
/// `|src - tgt| <= tolerance`.
pub fn value_equal(src: Option<&Value>, tgt: Option<&Value>, rule: &AttributeRule) -> Result<bool> {
    let (src, tgt) = match (src, tgt) {
        (None, None) => return Ok(true),
        (Some(s), Some(t)) => (s, t),
        _ => return Ok(false),
    };

    let normalized_src = normalize(src, rule)?;
    let normalized_tgt = normalize(tgt, rule)?;

    match (rule.rule_type, rule.tolerance, &normalized_src, &normalized_tgt) {
        (RuleType::Float, Some(tolerance), Normalized::Float(a), Normalized::Float(b)) => {
            Ok((a - b).abs() <= tolerance)
        }
        _ => Ok(normalized_src == normalized_tgt),
    }
}

// ============================================================================
// Exception generation
// ============================================================================

/// Rule catalog plus run-invariant options
#[derive(Debug, Clone)]
pub struct ReconEngine {
    catalog: RuleCatalog,
    options: EngineOptions,
}

impl ReconEngine {
    pub fn new(catalog: RuleCatalog, options: EngineOptions) -> Self {
        Self { catalog, options }
    }

    /// Diff `source` against `target` for one run
    pub fn build_exceptions(
        &self,
        source: &[SecurityRecord],
        target: &[SecurityRecord],
        run_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<Vec<ExceptionRecord>> {
        let joined = outer_join(source, target);
        let mut exceptions = Vec::new();

        for entry in &joined {
            match entry {
                Joined::SourceOnly(record) => {
                    self.emit_one_sided(&mut exceptions, record, DifferenceType::OnlyInSource, run_id, as_of_date)
                }
                Joined::TargetOnly(record) => {
                    self.emit_one_sided(&mut exceptions, record, DifferenceType::OnlyInTarget, run_id, as_of_date)
                }
                Joined::Both(src, tgt) => {
                    self.emit_mismatches(&mut exceptions, src, tgt, run_id, as_of_date)?
                }
            }
        }

        debug!(
            run_id,
            keys = joined.len(),
            exceptions = exceptions.len(),
            "Reconciliation complete"
        );
        Ok(exceptions)
    }

    #[allow(clippy::too_many_arguments)]
    fn exception(
        &self,
        run_id: &str,
        as_of_date: NaiveDate,
        key: &RecordKey,
        attribute: &str,
        source_value: Option<Value>,
        target_value: Option<Value>,
        difference_type: DifferenceType,
    ) -> ExceptionRecord {
        ExceptionRecord {
            run_id: run_id.to_string(),
            as_of_date,
            instrument_id: key.instrument_id.clone(),
            attribute: attribute.to_string(),
            source_system: self.options.source_system.clone(),
            target_system: self.options.target_system.clone(),
            source_value,
            target_value,
            difference_type,
        }
    }

    fn emit_one_sided(
        &self,
        out: &mut Vec<ExceptionRecord>,
        record: &SecurityRecord,
        difference_type: DifferenceType,
        run_id: &str,
        as_of_date: NaiveDate,
    ) {
        let split = |value: Option<Value>| match difference_type {
            DifferenceType::OnlyInTarget => (None, value),
            _ => (value, None),
        };

        match self.options.granularity {
            MissingGranularity::Record => {
                let (src, tgt) = split(Some(Value::from("present")));
                out.push(self.exception(run_id, as_of_date, &record.key, RECORD_ATTRIBUTE, src, tgt, difference_type));
            }
            MissingGranularity::Attribute => {
                for attr in &self.options.attributes {
                    let (src, tgt) = split(record.get(attr).cloned());
                    out.push(self.exception(run_id, as_of_date, &record.key, attr, src, tgt, difference_type));
                }
            }
        }
    }

    fn emit_mismatches(
        &self,
        out: &mut Vec<ExceptionRecord>,
        src: &SecurityRecord,
        tgt: &SecurityRecord,
        run_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<()> {
        for attr in &self.options.attributes {
            let src_value = src.get(attr);
            let tgt_value = tgt.get(attr);

            let equal = match self.catalog.get_rule(attr) {
                None => src_value == tgt_value,
                Some(rule) => value_equal(src_value, tgt_value, rule).map_err(|e| {
                    error!(
                        instrument_id = %src.key.instrument_id,
                        attribute = %attr,
                        error = %e,
                        "Value coercion failed; aborting reconciliation"
                    );
                    e
                })?,
            };

            if !equal {
                out.push(self.exception(
                    run_id,
                    as_of_date,
                    &src.key,
                    attr,
                    src_value.cloned(),
                    tgt_value.cloned(),
                    DifferenceType::ValueMismatch,
                ));
            }
        }
        Ok(())
    }
}

/// Diff with default options (standard attribute set, per-attribute ONLY_IN_* granularity)
pub fn build_exceptions(
    source: &[SecurityRecord],
    target: &[SecurityRecord],
    catalog: &RuleCatalog,
    run_id: &str,
    as_of_date: NaiveDate,
) -> Result<Vec<ExceptionRecord>> {
    ReconEngine::new(catalog.clone(), EngineOptions::default()).build_exceptions(source, target, run_id, as_of_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn coupon_rule() -> AttributeRule {
        AttributeRule::new("coupon", RuleType::Float).with_tolerance(0.01)
    }

    fn rec(id: &str) -> SecurityRecord {
        SecurityRecord::new(id, date("2023-12-29"))
    }

    // ------------------------------------------------------------------
    // value_equal
    // ------------------------------------------------------------------

    #[test]
    fn test_tolerance_boundary() {
        let rule = coupon_rule();
        let a = Value::Float(5.00);
        assert!(value_equal(Some(&a), Some(&Value::Float(5.005)), &rule).unwrap());
        assert!(!value_equal(Some(&a), Some(&Value::Float(5.02)), &rule).unwrap());
    }

    #[test]
    fn test_float_without_tolerance_is_exact() {
        let rule = AttributeRule::new("coupon", RuleType::Float);
        assert!(value_equal(Some(&Value::Integer(4)), Some(&Value::Float(4.0)), &rule).unwrap());
        assert!(!value_equal(Some(&Value::Float(4.0)), Some(&Value::Float(4.000001)), &rule).unwrap());
    }

    #[test]
    fn test_float_parses_text() {
        let rule = coupon_rule();
        assert!(value_equal(Some(&Value::from(" 4.5 ")), Some(&Value::Float(4.5)), &rule).unwrap());
    }

    #[test]
    fn test_float_rejects_non_numeric() {
        let rule = coupon_rule();
        let err = value_equal(Some(&Value::from("abc")), Some(&Value::Float(1.0)), &rule).unwrap_err();
        assert!(matches!(err, Error::Coercion { ref attribute, expected: "float", .. } if attribute == "coupon"));
    }

    #[test]
    fn test_string_normalization() {
        let rule = AttributeRule::new("cfi_code", RuleType::String)
            .with_ignore_case(true)
            .with_trim(true);
        assert!(value_equal(Some(&Value::from(" abc ")), Some(&Value::from("ABC")), &rule).unwrap());
    }

    #[test]
    fn test_string_without_flags_is_exact() {
        let rule = AttributeRule::new("cfi_code", RuleType::String);
        assert!(!value_equal(Some(&Value::from(" abc ")), Some(&Value::from("ABC")), &rule).unwrap());
        assert!(!value_equal(Some(&Value::from("abc")), Some(&Value::from("ABC")), &rule).unwrap());
    }

    #[test]
    fn test_string_rule_renders_integral_floats_with_decimal() {
        let rule = AttributeRule::new("coupon_text", RuleType::String);
        assert!(value_equal(Some(&Value::Float(5.0)), Some(&Value::from("5.0")), &rule).unwrap());
        assert!(value_equal(Some(&Value::Float(4.25)), Some(&Value::from("4.25")), &rule).unwrap());
        assert!(!value_equal(Some(&Value::Float(5.0)), Some(&Value::from("5")), &rule).unwrap());
    }

    #[test]
    fn test_null_handling_for_every_rule_type() {
        let rules = [
            coupon_rule(),
            AttributeRule::new("b", RuleType::Boolean),
            AttributeRule::new("s", RuleType::String).with_trim(true),
            AttributeRule::new("d", RuleType::Date),
            AttributeRule::new("p", RuleType::Passthrough),
        ];
        let x = Value::from("anything");
        for rule in &rules {
            assert!(value_equal(None, None, rule).unwrap());
            assert!(!value_equal(None, Some(&x), rule).unwrap());
            assert!(!value_equal(Some(&x), None, rule).unwrap());
        }
    }

    #[test]
    fn test_boolean_coercion() {
        let rule = AttributeRule::new("callable_flag", RuleType::Boolean);
        assert!(value_equal(Some(&Value::Integer(1)), Some(&Value::Bool(true)), &rule).unwrap());
        assert!(value_equal(Some(&Value::from("N")), Some(&Value::Bool(false)), &rule).unwrap());
        assert!(!value_equal(Some(&Value::Integer(0)), Some(&Value::Bool(true)), &rule).unwrap());
        assert!(value_equal(Some(&Value::from("maybe")), Some(&Value::Bool(true)), &rule).is_err());
    }

    #[test]
    fn test_date_coercion() {
        let rule = AttributeRule::new("maturity_date", RuleType::Date);
        let d = Value::Date(date("2033-12-29"));
        assert!(value_equal(Some(&Value::from("2033-12-29")), Some(&d), &rule).unwrap());
        assert!(value_equal(Some(&Value::from("2033-12-29 00:00:00")), Some(&d), &rule).unwrap());
        assert!(!value_equal(Some(&Value::from("2030-01-01")), Some(&d), &rule).unwrap());
    }

    #[test]
    fn test_unparseable_dates_compare_unmodified() {
        let rule = AttributeRule::new("maturity_date", RuleType::Date);
        let text = Value::from("12/29/2033");
        assert!(value_equal(Some(&text), Some(&text.clone()), &rule).unwrap());
        assert!(!value_equal(Some(&text), Some(&Value::from("12/30/2033")), &rule).unwrap());
        assert!(!value_equal(Some(&text), Some(&Value::Date(date("2033-12-29"))), &rule).unwrap());
    }

    #[test]
    fn test_identical_non_iso_dates_produce_no_exceptions() {
        let catalog = RuleCatalog::new([AttributeRule::new("maturity_date", RuleType::Date)]);
        let source = vec![rec("A").with("maturity_date", "12/29/2033")];
        let target = vec![rec("A").with("maturity_date", "12/29/2033")];

        let exceptions = build_exceptions(&source, &target, &catalog, "r1", date("2023-12-29")).unwrap();
        assert!(exceptions.is_empty());
    }

    #[test]
    fn test_passthrough_compares_unmodified() {
        let rule = AttributeRule::new("currency", RuleType::Passthrough);
        assert!(value_equal(Some(&Value::from("USD")), Some(&Value::from("USD")), &rule).unwrap());
        assert!(!value_equal(Some(&Value::from("usd")), Some(&Value::from("USD")), &rule).unwrap());
    }

    // ------------------------------------------------------------------
    // outer_join
    // ------------------------------------------------------------------

    #[test]
    fn test_outer_join_classifies_every_key_once() {
        let source = vec![rec("A"), rec("B"), rec("C")];
        let target = vec![rec("B"), rec("D")];
        let joined = outer_join(&source, &target);

        let ids: Vec<&str> = joined.iter().map(|j| j.key().instrument_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert!(matches!(joined[0], Joined::SourceOnly(_)));
        assert!(matches!(joined[1], Joined::Both(_, _)));
        assert!(matches!(joined[2], Joined::SourceOnly(_)));
        assert!(matches!(joined[3], Joined::TargetOnly(_)));
    }

    #[test]
    fn test_outer_join_keeps_first_duplicate() {
        let source = vec![rec("A").with("coupon", 1.0), rec("A").with("coupon", 2.0)];
        let joined = outer_join(&source, &[]);
        assert_eq!(joined.len(), 1);
        match joined[0] {
            Joined::SourceOnly(r) => assert_eq!(r.get("coupon"), Some(&Value::Float(1.0))),
            _ => panic!("expected source-only"),
        }
    }

    #[test]
    fn test_outer_join_distinguishes_dates() {
        let source = vec![SecurityRecord::new("A", date("2023-12-29"))];
        let target = vec![SecurityRecord::new("A", date("2023-12-30"))];
        let joined = outer_join(&source, &target);
        assert_eq!(joined.len(), 2);
    }

    // ------------------------------------------------------------------
    // build_exceptions
    // ------------------------------------------------------------------

    #[test]
    fn test_no_rule_falls_back_to_raw_equality() {
        let options = EngineOptions {
            attributes: vec!["currency".into(), "isin".into()],
            ..EngineOptions::default()
        };
        let engine = ReconEngine::new(RuleCatalog::default(), options);
        let source = vec![rec("A").with("currency", "USD")];
        let target = vec![rec("A").with("currency", "usd")];

        let exceptions = engine.build_exceptions(&source, &target, "r1", date("2023-12-29")).unwrap();
        // currency differs in case; isin absent on both sides counts as equal
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].attribute, "currency");
        assert_eq!(exceptions[0].difference_type, DifferenceType::ValueMismatch);
    }

    #[test]
    fn test_record_granularity_emits_one_exception_per_key() {
        let options = EngineOptions {
            granularity: MissingGranularity::Record,
            ..EngineOptions::default()
        };
        let engine = ReconEngine::new(RuleCatalog::default(), options);
        let source = vec![rec("A").with("coupon", 1.0)];
        let target = vec![rec("B").with("coupon", 1.0)];

        let exceptions = engine.build_exceptions(&source, &target, "r1", date("2023-12-29")).unwrap();
        assert_eq!(exceptions.len(), 2);
        assert_eq!(exceptions[0].attribute, RECORD_ATTRIBUTE);
        assert_eq!(exceptions[0].difference_type, DifferenceType::OnlyInSource);
        assert!(exceptions[0].target_value.is_none());
        assert_eq!(exceptions[1].difference_type, DifferenceType::OnlyInTarget);
        assert!(exceptions[1].source_value.is_none());
    }

    #[test]
    fn test_coercion_failure_aborts_run() {
        let catalog = RuleCatalog::new([coupon_rule()]);
        let source = vec![rec("A").with("coupon", 1.0), rec("B").with("coupon", "n/a")];
        let target = vec![rec("A").with("coupon", 2.0), rec("B").with("coupon", 1.0)];

        let result = build_exceptions(&source, &target, &catalog, "r1", date("2023-12-29"));
        assert!(matches!(result, Err(Error::Coercion { .. })));
    }

    #[test]
    fn test_one_sided_values_are_never_coerced() {
        let catalog = RuleCatalog::new([coupon_rule()]);
        let source = vec![rec("A").with("coupon", "garbage")];

        let exceptions = build_exceptions(&source, &[], &catalog, "r1", date("2023-12-29")).unwrap();
        assert_eq!(exceptions.len(), 4);
        assert!(exceptions.iter().all(|e| e.difference_type == DifferenceType::OnlyInSource));
    }

    #[test]
    fn test_output_is_deterministic() {
        let catalog = RuleCatalog::default();
        let source = vec![rec("C").with("coupon", 1.0), rec("A").with("coupon", 1.0)];
        let target = vec![rec("A").with("coupon", 2.0), rec("B")];

        let first = build_exceptions(&source, &target, &catalog, "r1", date("2023-12-29")).unwrap();
        let second = build_exceptions(&source, &target, &catalog, "r1", date("2023-12-29")).unwrap();
        assert_eq!(first, second);

        let keys: Vec<(&str, &str)> = first
            .iter()
            .map(|e| (e.instrument_id.as_str(), e.attribute.as_str()))
            .collect();
        assert_eq!(keys[0], ("A", "coupon"));
        assert_eq!(keys[1], ("B", "coupon"));
        assert_eq!(keys[5], ("C", "coupon"));
        assert_eq!(keys.len(), 1 + 4 + 4);
    }
}
