//! Database connection pools
//!
//! Every named connection gets its own pool; connections are checked out per
//! query and returned to the pool on drop, including on error paths.

use std::str::FromStr;
use std::time::Duration;

use secrecon_common::config::{sanitize_url, ConnectionConfig};
use secrecon_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// Open the pool for connection `name`.
///
/// `create_if_missing` is only set for the results store; data sources must
/// already exist.
pub async fn connect(name: &str, conn: &ConnectionConfig, create_if_missing: bool) -> Result<SqlitePool> {
    let url = conn.resolve_url(name)?;

    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| {
            Error::Config(format!(
                "connection '{name}': invalid url {}: {e}",
                sanitize_url(&url)
            ))
        })?
        .create_if_missing(create_if_missing)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(conn.max_connections)
        .acquire_timeout(Duration::from_secs(conn.query_timeout_secs))
        .connect_with(options)
        .await
        .map_err(|e| Error::Fetch(format!("connection '{name}' ({}) failed: {e}", sanitize_url(&url))))?;

    info!(
        connection = name,
        url = %sanitize_url(&url),
        max_connections = conn.max_connections,
        "✓ Connected"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_results_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        let conn = ConnectionConfig::from_url(format!("sqlite://{}", path.display()));

        let pool = connect("test_results", &conn, true).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_missing_source_database_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let conn = ConnectionConfig::from_url(format!("sqlite://{}", path.display()));

        let result = connect("test_absent", &conn, false).await;
        assert!(matches!(result, Err(Error::Fetch(_))));
        assert!(!path.exists());
    }
}
