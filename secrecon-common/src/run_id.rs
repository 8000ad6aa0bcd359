//! Run identifier generation

use uuid::Uuid;

/// Generate a new globally unique run identifier
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}
