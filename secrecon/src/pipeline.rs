//! Run coordinator
//!
//! One run reconciles one as-of-date and moves through
//! FETCHING → DIFFING → WRITING → METRICS → (PUBLISHING) → DONE,
//! or FAILED from any stage.
//!
//! Everything up to and including WRITING is all-or-nothing: the first error
//! fails the run. METRICS failures are fatal only under
//! [`MetricsPolicy::Required`]. PUBLISHING never fails a run; the outcome is
//! reported in [`RunResult::publish`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use secrecon_common::config::MetricsPolicy;
use secrecon_common::{metrics, run_id, Error, MetricsPayload, ReconEngine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::publish::Publisher;
use crate::sink::ExceptionSink;
use crate::sources::SecuritySource;
use crate::store::{ArtifactLog, MetricsSink, EXCEPTIONS_ARTIFACT, STATUS_UPLOADED};

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStage {
    /// Reading both snapshots
    Fetching,
    /// Engine comparison
    Diffing,
    /// Exception file output
    Writing,
    /// Summary computation and persistence
    Metrics,
    /// Upload of the exception file
    Publishing,
    /// Run finished successfully
    Done,
    /// Run failed with a fatal error
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStage::Fetching => "FETCHING",
            RunStage::Diffing => "DIFFING",
            RunStage::Writing => "WRITING",
            RunStage::Metrics => "METRICS",
            RunStage::Publishing => "PUBLISHING",
            RunStage::Done => "DONE",
            RunStage::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Per-invocation switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub metrics: bool,
    pub publish: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            metrics: true,
            publish: true,
        }
    }
}

/// What happened in the publish stage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published { uri: String },
    /// No publisher configured
    Skipped { reason: String },
    /// Upload attempted and failed; the exception file is still available locally
    Failed { error: String },
    /// Turned off for this run
    Disabled,
}

/// Successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub as_of_date: NaiveDate,
    pub status: RunStage,
    pub exception_count: usize,
    /// Local exception file (under `uploaded/` once published)
    pub exceptions_path: PathBuf,
    pub metrics: Option<MetricsPayload>,
    pub publish: PublishOutcome,
}

/// Run that reached FAILED
#[derive(Debug, Error)]
#[error("run {run_id} ({as_of_date}) failed during {stage}: {error}")]
pub struct RunFailure {
    pub run_id: String,
    pub as_of_date: NaiveDate,
    /// Stage in which the run failed
    pub stage: RunStage,
    #[source]
    pub error: Error,
}

/// In-flight run state
struct Run {
    run_id: String,
    as_of_date: NaiveDate,
    stage: RunStage,
}

impl Run {
    fn start(run_id: String, as_of_date: NaiveDate) -> Self {
        info!(run_id = %run_id, %as_of_date, "Run started");
        Self {
            run_id,
            as_of_date,
            stage: RunStage::Fetching,
        }
    }

    fn transition_to(&mut self, stage: RunStage) {
        debug!(run_id = %self.run_id, from = %self.stage, to = %stage, "Run stage transition");
        self.stage = stage;
    }

    fn fail(&self, error: Error) -> RunFailure {
        error!(
            run_id = %self.run_id,
            as_of_date = %self.as_of_date,
            stage = %self.stage,
            error = %error,
            "Run FAILED"
        );
        RunFailure {
            run_id: self.run_id.clone(),
            as_of_date: self.as_of_date,
            stage: self.stage,
            error,
        }
    }
}

/// Wires the engine to its collaborators. Holds no per-run state, so one
/// pipeline can serve concurrent runs.
pub struct ReconPipeline {
    engine: Arc<ReconEngine>,
    source: Arc<dyn SecuritySource>,
    target: Arc<dyn SecuritySource>,
    sink: Arc<dyn ExceptionSink>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    metrics_policy: MetricsPolicy,
    publisher: Option<Arc<dyn Publisher>>,
    artifact_log: Option<Arc<dyn ArtifactLog>>,
}

impl ReconPipeline {
    pub fn new(
        engine: ReconEngine,
        source: Arc<dyn SecuritySource>,
        target: Arc<dyn SecuritySource>,
        sink: Arc<dyn ExceptionSink>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            source,
            target,
            sink,
            metrics_sink: None,
            metrics_policy: MetricsPolicy::default(),
            publisher: None,
            artifact_log: None,
        }
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>, policy: MetricsPolicy) -> Self {
        self.metrics_sink = Some(sink);
        self.metrics_policy = policy;
        self
    }

    pub fn with_metrics_policy(mut self, policy: MetricsPolicy) -> Self {
        self.metrics_policy = policy;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_artifact_log(mut self, log: Arc<dyn ArtifactLog>) -> Self {
        self.artifact_log = Some(log);
        self
    }

    /// Execute a run under a freshly generated run id
    pub async fn run(&self, as_of_date: NaiveDate, options: RunOptions) -> Result<RunResult, RunFailure> {
        self.run_with_id(run_id::generate(), as_of_date, options).await
    }

    pub async fn run_with_id(
        &self,
        run_id: String,
        as_of_date: NaiveDate,
        options: RunOptions,
    ) -> Result<RunResult, RunFailure> {
        let mut run = Run::start(run_id, as_of_date);

        // FETCHING
        let source = self.source.fetch(as_of_date).await.map_err(|e| run.fail(e))?;
        let target = self.target.fetch(as_of_date).await.map_err(|e| run.fail(e))?;
        debug!(
            run_id = %run.run_id,
            source = self.source.system(),
            source_rows = source.len(),
            target = self.target.system(),
            target_rows = target.len(),
            "Snapshots fetched"
        );

        // DIFFING
        run.transition_to(RunStage::Diffing);
        let exceptions = self
            .engine
            .build_exceptions(&source, &target, &run.run_id, as_of_date)
            .map_err(|e| run.fail(e))?;

        // WRITING
        run.transition_to(RunStage::Writing);
        let path = self
            .sink
            .write(&exceptions, &run.run_id, as_of_date)
            .await
            .map_err(|e| run.fail(e))?;

        // METRICS
        run.transition_to(RunStage::Metrics);
        let metrics = if !options.metrics || self.metrics_policy == MetricsPolicy::Disabled {
            debug!(run_id = %run.run_id, "Metrics disabled for this run");
            None
        } else {
            let payload = metrics::compute(&exceptions, &run.run_id, as_of_date);
            self.persist_metrics(&run, &payload).await?;
            Some(payload)
        };

        // PUBLISHING
        let (publish, exceptions_path) = if options.publish {
            run.transition_to(RunStage::Publishing);
            self.publish(&run, path).await
        } else {
            (PublishOutcome::Disabled, path)
        };

        run.transition_to(RunStage::Done);
        info!(
            run_id = %run.run_id,
            %as_of_date,
            exceptions = exceptions.len(),
            path = %exceptions_path.display(),
            "Run DONE"
        );

        Ok(RunResult {
            run_id: run.run_id,
            as_of_date,
            status: RunStage::Done,
            exception_count: exceptions.len(),
            exceptions_path,
            metrics,
            publish,
        })
    }

    async fn persist_metrics(&self, run: &Run, payload: &MetricsPayload) -> Result<(), RunFailure> {
        let Some(sink) = &self.metrics_sink else {
            debug!(run_id = %run.run_id, "No metrics sink; summary not persisted");
            return Ok(());
        };

        match sink.persist(payload).await {
            Ok(()) => Ok(()),
            Err(e) if self.metrics_policy == MetricsPolicy::Required => Err(run.fail(e)),
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Metrics persistence failed (best effort)");
                Ok(())
            }
        }
    }

    async fn publish(&self, run: &Run, path: PathBuf) -> (PublishOutcome, PathBuf) {
        let Some(publisher) = &self.publisher else {
            info!(run_id = %run.run_id, "Publishing not configured; skipping upload");
            return (
                PublishOutcome::Skipped {
                    reason: "publishing not configured".to_string(),
                },
                path,
            );
        };

        match publisher.upload(&path).await {
            Ok(artifact) => {
                self.record_artifact(run, &artifact.uri).await;
                (PublishOutcome::Published { uri: artifact.uri }, artifact.local_path)
            }
            Err(e) if e.is_not_configured() => {
                info!(run_id = %run.run_id, "{}", e);
                (PublishOutcome::Skipped { reason: e.to_string() }, path)
            }
            Err(e) => {
                warn!(
                    run_id = %run.run_id,
                    error = %e,
                    path = %path.display(),
                    "Upload failed; exceptions remain available locally"
                );
                (PublishOutcome::Failed { error: e.to_string() }, path)
            }
        }
    }

    async fn record_artifact(&self, run: &Run, uri: &str) {
        let Some(log) = &self.artifact_log else {
            return;
        };
        if let Err(e) = log
            .record_upload(&run.run_id, run.as_of_date, EXCEPTIONS_ARTIFACT, uri, STATUS_UPLOADED)
            .await
        {
            warn!(run_id = %run.run_id, uri, error = %e, "Could not record upload in artifact log");
        }
    }
}
