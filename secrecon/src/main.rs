//! secrecon - security-master reconciliation service
//!
//! Compares the legacy and strategic security masters for an as-of-date,
//! writes the exception set, records run metrics, and optionally publishes
//! the exception file to object storage.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use secrecon::pipeline::RunOptions;
use secrecon::publish::HttpObjectPublisher;
use secrecon::service::{self, LEGACY_CONNECTION, STRATEGIC_CONNECTION};
use secrecon::{build_router, logging, AppState, ReconService, RunStage};
use secrecon_common::config::AppConfig;
use secrecon_common::RuleCatalog;
use serde_json::json;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::util::SubscriberInitExt;

/// Command-line arguments for secrecon
#[derive(Parser, Debug)]
#[command(name = "secrecon")]
#[command(about = "Security-master reconciliation between legacy and strategic systems")]
#[command(version)]
struct Args {
    /// Configuration file (default: $SECRECON_CONFIG, then <config_dir>/secrecon/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile one as-of-date
    Run {
        /// Business date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,

        /// Skip metrics computation and persistence
        #[arg(long)]
        no_metrics: bool,

        /// Skip publishing the exception file
        #[arg(long)]
        no_publish: bool,
    },

    /// Serve the HTTP control surface
    Serve,

    /// List run ids recorded for a date
    Runs {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
    },

    /// Show the latest published artifact for a run
    Artifact { run_id: String },

    /// Check connectivity and row counts for every configured connection
    Diagnose,

    /// Print the loaded rule catalog
    Rules,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Installed before the config is read so config loading is logged
    let (subscriber, filter_handle) = logging::subscriber(std::io::stdout);
    subscriber.init();

    let (config, config_path) = AppConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    logging::apply(&filter_handle, &config.logging).context("Failed to apply configured log level")?;

    // Build identification immediately after tracing init
    info!(
        "Starting secrecon v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    match args.command {
        Command::Run {
            date,
            no_metrics,
            no_publish,
        } => run(&config, date, RunOptions {
            metrics: !no_metrics,
            publish: !no_publish,
        })
        .await,
        Command::Serve => serve(&config).await,
        Command::Runs { date } => list_runs(&config, date).await,
        Command::Artifact { run_id } => show_artifact(&config, &run_id).await,
        Command::Diagnose => diagnose(&config).await,
        Command::Rules => show_rules(&config),
    }
}

async fn run(config: &AppConfig, date: NaiveDate, options: RunOptions) -> Result<()> {
    let service = ReconService::from_config(config)
        .await
        .context("Failed to initialize reconciliation service")?;

    match service.trigger_run(date, options).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(failure) => {
            let report = json!({
                "run_id": failure.run_id,
                "as_of_date": failure.as_of_date,
                "status": RunStage::Failed,
                "stage": failure.stage,
                "error": failure.error.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Err(failure.into())
        }
    }
}

async fn serve(config: &AppConfig) -> Result<()> {
    let service = ReconService::from_config(config)
        .await
        .context("Failed to initialize reconciliation service")?;
    let app = build_router(AppState::new(Arc::new(service)));

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("secrecon listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn list_runs(config: &AppConfig, date: NaiveDate) -> Result<()> {
    let store = service::connect_results(config).await?;
    for run_id in store.list_run_ids(date).await? {
        println!("{run_id}");
    }
    Ok(())
}

async fn show_artifact(config: &AppConfig, run_id: &str) -> Result<()> {
    use secrecon::store::{ArtifactLog, EXCEPTIONS_ARTIFACT};

    let store = service::connect_results(config).await?;
    match store.fetch_latest(run_id, EXCEPTIONS_ARTIFACT).await? {
        Some(artifact) => {
            println!("{}", serde_json::to_string_pretty(&artifact)?);
            Ok(())
        }
        None => bail!("No published artifact for run {}", run_id),
    }
}

async fn diagnose(config: &AppConfig) -> Result<()> {
    let mut failures = 0;

    let sides = [
        (LEGACY_CONNECTION, config.reconciliation.source_system.as_str()),
        (STRATEGIC_CONNECTION, config.reconciliation.target_system.as_str()),
    ];
    for (name, system) in sides {
        let counted = async {
            let source = service::connect_source(config, name, system).await?;
            let rows = source.row_count().await?;
            Ok::<_, secrecon_common::Error>((source.table().to_string(), rows))
        }
        .await;

        match counted {
            Ok((table, rows)) => println!("✓ {name}: {table} has {rows} rows"),
            Err(e) => {
                failures += 1;
                println!("✗ {name}: {e}");
            }
        }
    }

    match service::connect_results(config).await {
        Ok(_) => println!("✓ results: schema ready"),
        Err(e) => {
            failures += 1;
            println!("✗ results: {e}");
        }
    }

    match HttpObjectPublisher::from_config(&config.publish) {
        Ok(_) => println!("✓ publish: configured"),
        Err(e) if e.is_not_configured() => println!("- publish: {e}"),
        Err(e) => {
            failures += 1;
            println!("✗ publish: {e}");
        }
    }

    match config.rule_catalog() {
        Ok(catalog) => println!("✓ rules: {} attribute rule(s)", catalog.len()),
        Err(e) => {
            failures += 1;
            println!("✗ rules: {e}");
        }
    }

    if failures > 0 {
        bail!("{} check(s) failed", failures);
    }
    Ok(())
}

fn show_rules(config: &AppConfig) -> Result<()> {
    let catalog: RuleCatalog = config.rule_catalog()?;
    let rules: Vec<_> = catalog.iter().collect();
    println!("{}", serde_json::to_string_pretty(&rules)?);

    for attr in &config.reconciliation.attributes {
        if catalog.get_rule(attr).is_none() {
            println!("note: '{attr}' has no rule; compared by raw equality");
        }
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
