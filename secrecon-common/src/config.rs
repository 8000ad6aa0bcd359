//! Application configuration
//!
//! A single TOML document, loaded once at startup and passed explicitly to
//! the components that need it. Location priority:
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`SECRECON_CONFIG`)
//! 3. `<config_dir>/secrecon/config.toml`
//! 4. Compiled defaults (no file)
//!
//! A missing file is not an error; defaults are used and a warning logged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{EngineOptions, MissingGranularity, DEFAULT_ATTRIBUTES};
use crate::rules::RuleCatalog;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SECRECON_CONFIG";

/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV_VAR: &str = "SECRECON_LOG_LEVEL";

/// Default exception file name pattern
pub const DEFAULT_FILENAME_PATTERN: &str = "exceptions.<runid>.<yyyymmdd>.csv";

// ============================================================================
// Sections
// ============================================================================

/// Top-level configuration document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Named database connections (`legacy`, `strategic`, `results`)
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,

    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Inline rule catalog (`[attributes.<name>]` tables)
    #[serde(default)]
    pub attributes: toml::Table,

    #[serde(default)]
    pub exception_file: ExceptionFileConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One database connection
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Full connection URL; takes precedence over the individual parts
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,

    /// Table holding the security master snapshot (data sources only)
    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound for a single fetch / write
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

/// Comparison settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Comparable attributes, in output order
    #[serde(default = "default_attributes")]
    pub attributes: Vec<String>,

    #[serde(default)]
    pub missing_granularity: MissingGranularity,

    #[serde(default = "default_source_system")]
    pub source_system: String,

    #[serde(default = "default_target_system")]
    pub target_system: String,

    /// External rule document; overrides the inline `[attributes]` tables
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
}

/// Exception file sink
#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionFileConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,

    /// Supports `<runid>`, `<yyyy-mm-dd>` and `<yyyymmdd>` tokens
    #[serde(default = "default_filename_pattern")]
    pub filename: String,
}

/// Whether metrics persistence failures fail the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsPolicy {
    /// Persist failure is fatal
    #[default]
    Required,
    /// Persist failure is logged; the run still succeeds
    BestEffort,
    /// Metrics are neither computed nor persisted
    Disabled,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub policy: MetricsPolicy,
}

/// Object-storage publishing. Missing `bucket` or `endpoint` means "not configured".
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default)]
    pub level: Option<String>,
    /// Shorthand for `level = "debug"` when no level is given
    #[serde(default)]
    pub debug: bool,
}

fn default_table() -> String {
    "security_master".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_attributes() -> Vec<String> {
    DEFAULT_ATTRIBUTES.iter().map(|a| a.to_string()).collect()
}

fn default_source_system() -> String {
    "legacy".to_string()
}

fn default_target_system() -> String {
    "strategic".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./output")
}

fn default_filename_pattern() -> String {
    DEFAULT_FILENAME_PATTERN.to_string()
}

fn default_prefix() -> String {
    "results".to_string()
}

fn default_publish_timeout_secs() -> u64 {
    30
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            attributes: default_attributes(),
            missing_granularity: MissingGranularity::default(),
            source_system: default_source_system(),
            target_system: default_target_system(),
            rules_path: None,
        }
    }
}

impl Default for ExceptionFileConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            filename: default_filename_pattern(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: None,
            prefix: default_prefix(),
            timeout_secs: default_publish_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ============================================================================
// Connections
// ============================================================================

impl ConnectionConfig {
    /// Connection for a bare URL with default pool settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            driver: None,
            user: None,
            password: None,
            host: None,
            port: None,
            database: None,
            table: default_table(),
            max_connections: default_max_connections(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }

    /// Resolve the connection URL for the connection called `name`.
    ///
    /// `<NAME>_DATABASE_URL` overrides the configured value.
    pub fn resolve_url(&self, name: &str) -> Result<String> {
        let env_var = format!("{}_DATABASE_URL", name.to_ascii_uppercase());
        if let Ok(url) = std::env::var(&env_var) {
            debug!("{}: using {} override ({})", name, env_var, sanitize_url(&url));
            return Ok(url);
        }

        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let driver = self
            .driver
            .as_deref()
            .ok_or_else(|| Error::Config(format!("connection '{name}': neither 'url' nor 'driver' configured")))?;
        let database = self.database.as_deref().unwrap_or("");

        if driver == "sqlite" {
            return Ok(format!("sqlite://{database}"));
        }

        let user = encode(self.user.as_deref().unwrap_or(""));
        let password = encode(self.password.as_deref().unwrap_or(""));
        let host = self.host.as_deref().unwrap_or("localhost");
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();

        Ok(format!("{driver}://{user}:{password}@{host}{port}/{database}"))
    }
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Hide the password component of a connection URL for logging
pub fn sanitize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "***".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// Parse a configuration document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        let mut config = Self::from_toml_str(&content)?;

        // Relative rule documents are resolved against the config file's folder
        if let (Some(rules_path), Some(parent)) = (&config.reconciliation.rules_path, path.parent()) {
            if rules_path.is_relative() {
                config.reconciliation.rules_path = Some(parent.join(rules_path));
            }
        }

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file location and load it
    pub fn resolve(cli_arg: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        match resolve_config_path(cli_arg) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => {
                warn!("No config file found; using compiled defaults");
                Ok((Self::default(), None))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.reconciliation.attributes.is_empty() {
            return Err(Error::Config("reconciliation.attributes must not be empty".to_string()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for attr in &self.reconciliation.attributes {
            if !seen.insert(attr.as_str()) {
                return Err(Error::Config(format!("reconciliation.attributes lists '{attr}' twice")));
            }
        }
        Ok(())
    }

    /// Named connection, or a configuration error naming the missing section
    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections
            .get(name)
            .ok_or_else(|| Error::Config(format!("missing [connections.{name}] section")))
    }

    /// Build the rule catalog from `rules_path` or the inline `[attributes]`
    pub fn rule_catalog(&self) -> Result<RuleCatalog> {
        match &self.reconciliation.rules_path {
            Some(path) => RuleCatalog::load(path),
            None => RuleCatalog::from_attributes(&self.attributes),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            attributes: self.reconciliation.attributes.clone(),
            granularity: self.reconciliation.missing_granularity,
            source_system: self.reconciliation.source_system.clone(),
            target_system: self.reconciliation.target_system.clone(),
        }
    }
}

/// Config file location following the documented priority order
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: User config directory
    dirs::config_dir()
        .map(|d| d.join("secrecon").join("config.toml"))
        .filter(|p| p.exists())
}

impl LoggingConfig {
    /// Effective tracing filter directive.
    ///
    /// `SECRECON_LOG_LEVEL` → `RUST_LOG` → `level` → `debug` flag → `info`
    pub fn effective_filter(&self) -> String {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV_VAR) {
            if !level.trim().is_empty() {
                return level.trim().to_ascii_lowercase();
            }
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                return filter;
            }
        }
        if let Some(level) = &self.level {
            return level.trim().to_ascii_lowercase();
        }
        if self.debug {
            return "debug".to_string();
        }
        "info".to_string()
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
