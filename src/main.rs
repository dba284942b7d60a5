//! Demo: one synthetic document-processing trace through the observability core

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use kms_observability::config::load_config;
use kms_observability::logging::init_logging;
use kms_observability::observability::metrics::install_prometheus_recorder;
use kms_observability::observability::{EventStatus, ObservabilityService, TraceMetrics, TraceStatus};
use kms_observability::services::database::{DatabaseProvider, SurrealDatabase};

#[derive(Parser)]
#[command(name = "kms-observability")]
#[command(author, version, about = "Run a traced document-processing pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/observability.toml)
    #[arg(short, long, env = "KMS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Make this pipeline stage fail
    #[arg(long, value_enum)]
    fail_stage: Option<Stage>,

    /// Print provider call metrics in Prometheus text format when done
    #[arg(long)]
    metrics: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Stage {
    Upload,
    Parse,
    Chunk,
    Embed,
    Index,
}

impl Stage {
    const PIPELINE: [Stage; 5] = [Stage::Upload, Stage::Parse, Stage::Chunk, Stage::Embed, Stage::Index];

    fn name(self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Parse => "parse",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Index => "index",
        }
    }

    fn event(self) -> &'static str {
        match self {
            Stage::Upload => "uploaded",
            Stage::Parse => "parsed",
            Stage::Chunk => "chunked",
            Stage::Embed => "embedded",
            Stage::Index => "indexed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {reason}")]
struct StageError {
    stage: &'static str,
    reason: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging)?;

    panic::set_hook(Box::new(|panic_info| {
        error!(?panic_info, "FATAL: Panic occurred");
    }));

    let metrics = if cli.metrics { Some(install_prometheus_recorder()?) } else { None };

    let store = SurrealDatabase::connect(&config.database)
        .await
        .context("Failed to open trace store")?;
    let store = Arc::new(DatabaseProvider::new(Arc::new(store)));
    let service = ObservabilityService::with_store(&config, store.clone())?;
    info!(providers = ?service.provider_names(), "Observability service ready");

    let document_id = "doc-demo-1";
    let ctx = service
        .start_trace(
            "document.processing",
            "ingestion",
            Some("demo-user"),
            None,
            Some("kb-demo"),
        )
        .await;

    let mut status = TraceStatus::Completed;
    for stage in Stage::PIPELINE {
        let result = service
            .span(&ctx, stage.name(), "pipeline", |scope| {
                let fail = cli.fail_stage == Some(stage);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    scope.set_attribute("document_id", document_id);
                    if fail {
                        return Err(StageError {
                            stage: stage.name(),
                            reason: "simulated failure".to_string(),
                        });
                    }
                    Ok(())
                }
            })
            .await;

        let event_status = if result.is_ok() { EventStatus::Completed } else { EventStatus::Failed };
        service
            .log_document_event(document_id, Some(&ctx), stage.event(), event_status, None)
            .await;

        if stage == Stage::Embed && result.is_ok() {
            service
                .log_llm_call(&ctx, "text-embedding-3-small", 512, 0, 35.0, Some(0.00001))
                .await;
        }

        if let Err(e) = result {
            error!(error = %e, "Pipeline stopped");
            status = TraceStatus::Failed;
            break;
        }
    }

    let totals = (status == TraceStatus::Completed).then(|| TraceMetrics::default().with_tokens(512, 0));
    service.end_trace(&ctx, status, totals).await;
    service.shutdown().await;

    let trace = store.fetch_trace(&ctx.trace_id).await?;
    let spans = store.fetch_spans(&ctx.trace_id).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "trace": trace, "spans": spans }))?
    );

    if let Some(handle) = metrics {
        println!("{}", handle.render());
    }

    Ok(())
}
