//! Common error types for secrecon

use thiserror::Error;

/// Common result type for secrecon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the engine, the adapters and the coordinator
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing rule / connection configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data source unreachable, query failure or timeout
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A present value cannot be normalized under its rule's declared type
    #[error("Coercion error: attribute '{attribute}' value '{value}' is not a valid {expected}")]
    Coercion {
        attribute: String,
        value: String,
        expected: &'static str,
    },

    /// Exception or metrics sink write failure
    #[error("Sink error: {0}")]
    Sink(String),

    /// Upload failure (recorded, never fatal to a run)
    #[error("Publish error: {0}")]
    Publish(String),

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
