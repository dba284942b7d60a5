use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct ObservabilityConfig {
    #[garde(dive)]
    #[serde(default)]
    pub service: ServiceConfig,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub database: DatabaseSettings,

    #[garde(dive)]
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    #[garde(skip)]
    #[serde(default)]
    pub environment: Environment,
}

/// Coordinator tuning knobs.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServiceConfig {
    /// Upper bound for a single provider call inside a fan-out
    #[garde(range(min = 1, max = 60_000))]
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Error messages captured on failed spans are cut to this many characters
    #[garde(range(min = 16, max = 10_000))]
    #[serde(default = "default_error_message_max_chars")]
    pub error_message_max_chars: usize,

    /// Chat message content is summarised to this many characters
    #[garde(range(min = 16, max = 10_000))]
    #[serde(default = "default_chat_summary_max_chars")]
    pub chat_summary_max_chars: usize,

    /// Strip emails, tokens and similar from captured error messages
    #[garde(skip)]
    #[serde(default = "default_redact")]
    pub redact_error_messages: bool,
}

fn default_provider_timeout_ms() -> u64 {
    5_000
}

fn default_error_message_max_chars() -> usize {
    500
}

fn default_chat_summary_max_chars() -> usize {
    200
}

fn default_redact() -> bool {
    true
}

impl ServiceConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            error_message_max_chars: default_error_message_max_chars(),
            chat_summary_max_chars: default_chat_summary_max_chars(),
            redact_error_messages: default_redact(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Connection settings for the durable trace store.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseSettings {
    /// `mem://` for an embedded store, `ws://host:port` for a server
    #[garde(length(min = 1), custom(validate_store_endpoint))]
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[garde(length(min = 1))]
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[garde(length(min = 1))]
    #[serde(default = "default_database")]
    pub database: String,

    #[garde(skip)]
    #[serde(default)]
    pub username: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub password: Option<String>,
}

fn default_endpoint() -> String {
    "mem://".to_string()
}

fn default_namespace() -> String {
    "kms".to_string()
}

fn default_database() -> String {
    "observability".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            namespace: default_namespace(),
            database: default_database(),
            username: None,
            password: None,
        }
    }
}

/// External analytics provider settings.
///
/// Credentials are not validated here: anything missing or
/// malformed leaves the provider disabled.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AnalyticsConfig {
    #[garde(skip)]
    #[serde(default)]
    pub host: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub public_key: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Buffered events are sent once this many have accumulated
    #[garde(range(min = 1, max = 1_000))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[garde(range(min = 100, max = 60_000))]
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[garde(range(min = 1, max = 100))]
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[garde(range(min = 1, max = 3_600))]
    #[serde(default = "default_open_seconds")]
    pub open_seconds: u64,

    #[garde(skip)]
    #[serde(default)]
    pub release: Option<String>,
}

fn default_batch_size() -> usize {
    50
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_seconds() -> u64 {
    30
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            host: None,
            public_key: None,
            secret_key: None,
            batch_size: default_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            open_seconds: default_open_seconds(),
            release: None,
        }
    }
}

/// Well-formed analytics credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsCredentials {
    pub host: String,
    pub public_key: String,
    pub secret_key: String,
}

impl AnalyticsConfig {
    /// Returns credentials only when all three values are present and usable.
    pub fn credentials(&self) -> Option<AnalyticsCredentials> {
        let host = non_blank(self.host.as_deref())?;
        let public_key = non_blank(self.public_key.as_deref())?;
        let secret_key = non_blank(self.secret_key.as_deref())?;

        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return None;
        }
        if public_key.chars().any(char::is_whitespace) || secret_key.chars().any(char::is_whitespace) {
            return None;
        }

        Some(AnalyticsCredentials {
            host: host.trim_end_matches('/').to_string(),
            public_key: public_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// True when any credential field was supplied at all.
    pub fn is_configured(&self) -> bool {
        self.host.is_some() || self.public_key.is_some() || self.secret_key.is_some()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

fn validate_store_endpoint(value: &str, _: &()) -> garde::Result {
    const SCHEMES: [&str; 5] = ["mem://", "ws://", "wss://", "http://", "https://"];
    if SCHEMES.iter().any(|scheme| value.starts_with(scheme)) {
        Ok(())
    } else {
        Err(garde::Error::new("Unsupported store endpoint scheme"))
    }
}
