use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{AnalyticsConfig, AnalyticsCredentials};
use crate::error::ProviderError;
use crate::middleware::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

pub const INGESTION_PATH: &str = "/api/public/ingestion";

/// One entry of an ingestion batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub body: Value,
}

impl IngestionEvent {
    pub fn new(event_type: &'static str, body: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            body,
        }
    }
}

/// HTTP client for the batch ingestion endpoint, behind a circuit breaker.
pub struct IngestionClient {
    http: Client,
    endpoint: String,
    public_key: String,
    secret_key: String,
    breaker: CircuitBreaker,
}

impl IngestionClient {
    pub fn new(
        credentials: &AnalyticsCredentials,
        config: &AnalyticsConfig,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            call_timeout: config.request_timeout(),
            open_duration: Duration::from_secs(config.open_seconds),
        });

        Ok(Self {
            http,
            endpoint: format!("{}{}", credentials.host, INGESTION_PATH),
            public_key: credentials.public_key.clone(),
            secret_key: credentials.secret_key.clone(),
            breaker,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one batch. Any 2xx counts as accepted.
    pub async fn send_batch(&self, batch: &[IngestionEvent]) -> Result<(), ProviderError> {
        if batch.is_empty() {
            return Ok(());
        }

        let payload = json!({ "batch": batch });
        let result = self
            .breaker
            .call(|| async {
                let response = self
                    .http
                    .post(&self.endpoint)
                    .basic_auth(&self.public_key, Some(&self.secret_key))
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| ProviderError::Network(e.to_string()))?;

                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(ProviderError::Rejected {
                        status: status.as_u16(),
                    })
                }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(events = batch.len(), "Analytics batch accepted");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => Err(ProviderError::CircuitOpen),
            Err(CircuitBreakerError::Timeout) => {
                Err(ProviderError::Network("ingestion request timed out".to_string()))
            }
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }
}
