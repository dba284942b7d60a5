use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use garde::Validate;
use std::path::Path;

use super::ObservabilityConfig;
use crate::error::ObservabilityError;

/// Default location of the optional configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/observability.toml";

/// Prefix for environment overrides, e.g. `KMS_ANALYTICS__PUBLIC_KEY`
pub const ENV_PREFIX: &str = "KMS_";

/// Layered figment: embedded defaults, then the TOML file, then `KMS_` env vars.
pub fn figment(path: Option<&Path>) -> Figment {
    let file = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());

    Figment::new()
        .merge(Serialized::defaults(ObservabilityConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate configuration.
pub fn load_config(path: Option<&Path>) -> Result<ObservabilityConfig, ObservabilityError> {
    let config: ObservabilityConfig = figment(path).extract()?;
    config.validate()?;

    if config.analytics.is_configured() && config.analytics.credentials().is_none() {
        tracing::warn!("Analytics credentials are incomplete or malformed; provider will stay disabled");
    }

    if config.analytics.credentials().is_some()
        && config.analytics.request_timeout_ms >= config.service.provider_timeout_ms
    {
        tracing::warn!(
            request_timeout_ms = config.analytics.request_timeout_ms,
            provider_timeout_ms = config.service.provider_timeout_ms,
            "Analytics requests can outlive the provider timeout; slow batches will be dropped"
        );
    }

    Ok(config)
}
