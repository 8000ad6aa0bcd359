//! # secrecon common library
//!
//! IO-free core of the security-master reconciliation service:
//! - Data model shared by the engine, adapters and the HTTP surface
//! - Rule catalog (per-attribute comparison policies)
//! - Reconciliation engine (outer join + rule-driven comparison)
//! - Metrics aggregation
//! - Application configuration loading

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod rules;
pub mod run_id;

pub use engine::{build_exceptions, value_equal, EngineOptions, MissingGranularity, ReconEngine};
pub use error::{Error, Result};
pub use model::{DifferenceType, ExceptionRecord, MetricsPayload, RecordKey, SecurityRecord, Value};
pub use rules::{AttributeRule, RuleCatalog, RuleType};
