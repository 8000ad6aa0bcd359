//! Reconciliation control surface
//!
//! Trigger a run, list the runs recorded for a date, and look up the latest
//! published artifact for a run. Used by both the HTTP API and the CLI.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use secrecon_common::config::AppConfig;
use secrecon_common::{Error, ReconEngine, Result};
use tracing::info;

use crate::db;
use crate::pipeline::{ReconPipeline, RunFailure, RunOptions, RunResult};
use crate::publish::HttpObjectPublisher;
use crate::sink::CsvExceptionWriter;
use crate::sources::SqlSecuritySource;
use crate::store::{ArtifactLog, ArtifactRecord, ResultsStore, EXCEPTIONS_ARTIFACT};

/// Connection names in `[connections.*]`
pub const LEGACY_CONNECTION: &str = "legacy";
pub const STRATEGIC_CONNECTION: &str = "strategic";
pub const RESULTS_CONNECTION: &str = "results";

pub struct ReconService {
    pipeline: Arc<ReconPipeline>,
    store: ResultsStore,
}

impl ReconService {
    pub fn new(pipeline: ReconPipeline, store: ResultsStore) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            store,
        }
    }

    /// Connect every collaborator described by `config`
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog = config.rule_catalog()?;
        info!(rules = catalog.len(), "Rule catalog loaded");
        let engine = ReconEngine::new(catalog, config.engine_options());

        let source = connect_source(config, LEGACY_CONNECTION, &config.reconciliation.source_system).await?;
        let target = connect_source(config, STRATEGIC_CONNECTION, &config.reconciliation.target_system).await?;
        let store = connect_results(config).await?;
        let sink = CsvExceptionWriter::from_config(&config.exception_file)?;

        let mut pipeline = ReconPipeline::new(engine, Arc::new(source), Arc::new(target), Arc::new(sink))
            .with_metrics(Arc::new(store.clone()), config.metrics.policy)
            .with_artifact_log(Arc::new(store.clone()));

        match HttpObjectPublisher::from_config(&config.publish) {
            Ok(publisher) => pipeline = pipeline.with_publisher(Arc::new(publisher)),
            Err(e) if e.is_not_configured() => info!("{}; publish stage will be skipped", e),
            Err(e) => return Err(Error::Publish(e.to_string())),
        }

        Ok(Self::new(pipeline, store))
    }

    pub fn store(&self) -> &ResultsStore {
        &self.store
    }

    /// Run the full pipeline for `as_of_date`
    pub async fn trigger_run(&self, as_of_date: NaiveDate, options: RunOptions) -> std::result::Result<RunResult, RunFailure> {
        self.pipeline.run(as_of_date, options).await
    }

    pub async fn list_run_ids(&self, as_of_date: NaiveDate) -> Result<Vec<String>> {
        self.store.list_run_ids(as_of_date).await
    }

    /// Latest published exception file for `run_id`, if any
    pub async fn latest_artifact(&self, run_id: &str) -> Result<Option<ArtifactRecord>> {
        self.store.fetch_latest(run_id, EXCEPTIONS_ARTIFACT).await
    }
}

/// Pool plus source adapter for one side
pub async fn connect_source(config: &AppConfig, name: &str, system: &str) -> Result<SqlSecuritySource> {
    let conn = config.connection(name)?;
    let pool = db::connect(name, conn, false).await?;
    SqlSecuritySource::new(system, pool, &conn.table, Duration::from_secs(conn.query_timeout_secs))
}

/// Results store with its schema in place
pub async fn connect_results(config: &AppConfig) -> Result<ResultsStore> {
    let conn = config.connection(RESULTS_CONNECTION)?;
    let store = ResultsStore::new(db::connect(RESULTS_CONNECTION, conn, true).await?);
    store.init_schema().await?;
    Ok(store)
}
