//! Global subscriber for the service's own diagnostics.
//!
//! Provider failures, dropped analytics batches and breaker transitions are
//! all reported through `tracing`; this is where they get a sink.

use anyhow::{Context, Result, bail};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer(format: &str) -> Result<BoxedLayer> {
    let layer: BoxedLayer = match format {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_thread_names(true)
            .boxed(),
        other => bail!("Unsupported log format: {other}. Use 'json' or 'pretty'"),
    };
    Ok(layer)
}

/// Install the process-wide subscriber. `RUST_LOG` wins over `config.level`.
/// A second call fails instead of replacing the first subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let output = output_layer(&config.format)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level directive '{}'", config.level))?;

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .context("A global tracing subscriber is already installed")
}
