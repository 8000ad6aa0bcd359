//! Rule catalog: per-attribute comparison policies
//!
//! Rules are read from a TOML document of the form
//!
//! ```toml
//! [attributes.coupon]
//! type = "float"
//! tolerance = 0.01
//!
//! [attributes.cfi_code]
//! type = "string"
//! ignore_case = true
//! trim = true
//! ```
//!
//! `type` is required; `tolerance`, `ignore_case` and `trim` are optional and
//! default to none / false / false. The catalog is immutable once built.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Closed set of normalization types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Float,
    Boolean,
    String,
    Date,
    /// Any other declared type: values are compared unmodified
    Passthrough,
}

impl RuleType {
    /// Map a declared type name onto the closed set. Unknown names pass through.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "float" => RuleType::Float,
            "boolean" => RuleType::Boolean,
            "string" => RuleType::String,
            "date" => RuleType::Date,
            _ => RuleType::Passthrough,
        }
    }
}

/// Comparison policy for a single attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeRule {
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Only meaningful for [`RuleType::Float`]
    pub tolerance: Option<f64>,
    /// Only meaningful for [`RuleType::String`]
    pub ignore_case: bool,
    /// Only meaningful for [`RuleType::String`]
    pub trim: bool,
}

impl AttributeRule {
    /// Rule with the given type and all optional fields at their defaults
    pub fn new(name: impl Into<String>, rule_type: RuleType) -> Self {
        Self {
            name: name.into(),
            rule_type,
            tolerance: None,
            ignore_case: false,
            trim: false,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    /// Parse one `[attributes.<name>]` table
    fn from_table(name: &str, table: &toml::Table) -> Result<Self> {
        let rule_type = match table.get("type") {
            Some(toml::Value::String(s)) => RuleType::from_name(s),
            Some(other) => {
                return Err(Error::Config(format!(
                    "attribute '{name}': 'type' must be a string, found {}",
                    other.type_str()
                )))
            }
            None => {
                return Err(Error::Config(format!(
                    "attribute '{name}': missing required field 'type'"
                )))
            }
        };

        let tolerance = match table.get("tolerance") {
            None => None,
            Some(toml::Value::Float(x)) => Some(*x),
            Some(toml::Value::Integer(i)) => Some(*i as f64),
            Some(other) => {
                return Err(Error::Config(format!(
                    "attribute '{name}': 'tolerance' must be a number, found {}",
                    other.type_str()
                )))
            }
        };
        if let Some(t) = tolerance {
            if !(t >= 0.0) {
                return Err(Error::Config(format!(
                    "attribute '{name}': 'tolerance' must be non-negative, found {t}"
                )));
            }
        }

        let ignore_case = bool_field(name, table, "ignore_case")?;
        let trim = bool_field(name, table, "trim")?;

        if tolerance.is_some() && rule_type != RuleType::Float {
            debug!(attribute = name, "tolerance set on non-float rule has no effect");
        }
        if (ignore_case || trim) && rule_type != RuleType::String {
            debug!(attribute = name, "ignore_case/trim set on non-string rule has no effect");
        }

        Ok(Self {
            name: name.to_string(),
            rule_type,
            tolerance,
            ignore_case,
            trim,
        })
    }
}

fn bool_field(name: &str, table: &toml::Table, field: &str) -> Result<bool> {
    match table.get(field) {
        None => Ok(false),
        Some(toml::Value::Boolean(b)) => Ok(*b),
        Some(other) => Err(Error::Config(format!(
            "attribute '{name}': '{field}' must be a boolean, found {}",
            other.type_str()
        ))),
    }
}

/// Read-only mapping from attribute name to rule
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleCatalog {
    rules: BTreeMap<String, AttributeRule>,
}

impl RuleCatalog {
    pub fn new(rules: impl IntoIterator<Item = AttributeRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    /// Build from the `attributes` table of an already-parsed document.
    ///
    /// Entries that are not tables are skipped with a warning; a table
    /// without `type` is rejected.
    pub fn from_attributes(attributes: &toml::Table) -> Result<Self> {
        let mut rules = BTreeMap::new();
        for (name, definition) in attributes {
            match definition {
                toml::Value::Table(table) => {
                    rules.insert(name.clone(), AttributeRule::from_table(name, table)?);
                }
                other => {
                    warn!(
                        attribute = %name,
                        "Ignoring rule definition of type {} (expected table)",
                        other.type_str()
                    );
                }
            }
        }
        Ok(Self { rules })
    }

    /// Parse a rule document. A document without an `attributes` table
    /// yields an empty catalog.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let doc: toml::Table = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse rule document failed: {}", e)))?;

        match doc.get("attributes") {
            Some(toml::Value::Table(attributes)) => Self::from_attributes(attributes),
            Some(other) => {
                warn!("'attributes' is a {} (expected table); no rules loaded", other.type_str());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load from a file. A missing file yields an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Rule document not found at {}; using empty rule catalog", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read rule document {} failed: {}", path.display(), e)))?;
        let catalog = Self::from_toml_str(&content)?;
        debug!(rules = catalog.len(), path = %path.display(), "Rule catalog loaded");
        Ok(catalog)
    }

    /// Rule for `name`, or `None` when the attribute has no rule
    pub fn get_rule(&self, name: &str) -> Option<&AttributeRule> {
        self.rules.get(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in attribute-name order
    pub fn iter(&self) -> impl Iterator<Item = &AttributeRule> {
        self.rules.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let catalog = RuleCatalog::from_toml_str(
            r#"
            [attributes.coupon]
            type = "float"
            tolerance = 0.01

            [attributes.cfi_code]
            type = "string"
            ignore_case = true
            trim = true

            [attributes.maturity_date]
            type = "date"

            [attributes.callable_flag]
            type = "boolean"
            "#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 4);
        let coupon = catalog.get_rule("coupon").unwrap();
        assert_eq!(coupon.rule_type, RuleType::Float);
        assert_eq!(coupon.tolerance, Some(0.01));
        assert!(!coupon.ignore_case);

        let cfi = catalog.get_rule("cfi_code").unwrap();
        assert!(cfi.ignore_case);
        assert!(cfi.trim);
        assert_eq!(cfi.tolerance, None);
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let err = RuleCatalog::from_toml_str(
            r#"
            [attributes.coupon]
            tolerance = 0.01
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("'type'")));
    }

    #[test]
    fn test_integer_tolerance_accepted() {
        let catalog = RuleCatalog::from_toml_str(
            "[attributes.field_b]\ntype = \"float\"\ntolerance = 2\n",
        )
        .unwrap();
        assert_eq!(catalog.get_rule("field_b").unwrap().tolerance, Some(2.0));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let result = RuleCatalog::from_toml_str(
            "[attributes.coupon]\ntype = \"float\"\ntolerance = -0.5\n",
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_type_is_passthrough() {
        let catalog =
            RuleCatalog::from_toml_str("[attributes.isin]\ntype = \"identifier\"\n").unwrap();
        assert_eq!(catalog.get_rule("isin").unwrap().rule_type, RuleType::Passthrough);
    }

    #[test]
    fn test_non_table_entries_are_skipped() {
        let catalog = RuleCatalog::from_toml_str(
            "[attributes]\nbogus = 3\n\n[attributes.coupon]\ntype = \"float\"\n",
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get_rule("bogus").is_none());
    }

    #[test]
    fn test_document_without_attributes_is_empty() {
        let catalog = RuleCatalog::from_toml_str("name = \"nothing here\"\n").unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_malformed_document_is_config_error() {
        let result = RuleCatalog::from_toml_str("[attributes.coupon\ntype = ");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_rule_is_none() {
        let catalog = RuleCatalog::new([AttributeRule::new("coupon", RuleType::Float)]);
        assert!(catalog.get_rule("coupon").is_some());
        assert!(catalog.get_rule("currency").is_none());
    }
}
