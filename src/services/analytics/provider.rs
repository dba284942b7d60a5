use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::client::{IngestionClient, IngestionEvent};
use crate::config::{AnalyticsConfig, Environment};
use crate::error::ProviderError;
use crate::observability::{
    ChatMessage, DocumentEvent, LlmCall, ObservabilityProvider, SpanEnd, SpanStart, SpanStatus,
    TraceEnd, TraceStart,
};

pub const PROVIDER_NAME: &str = "analytics";

/// Buffers telemetry as ingestion events and ships them in batches.
///
/// The buffer is flushed when it reaches `batch_size` and after every
/// `end_trace`. Events in a batch that fails to send are dropped and counted.
pub struct AnalyticsProvider {
    client: Option<IngestionClient>,
    buffer: Mutex<Vec<IngestionEvent>>,
    batch_size: usize,
    environment: String,
    release: Option<String>,
    dropped: AtomicU64,
}

impl AnalyticsProvider {
    /// Always returns a provider; it is disabled unless credentials are complete.
    pub fn new(config: &AnalyticsConfig, environment: &Environment) -> Self {
        let client = config.credentials().and_then(|credentials| {
            IngestionClient::new(&credentials, config)
                .inspect_err(|e| tracing::warn!(error = %e, "Analytics client unavailable; provider disabled"))
                .ok()
        });

        if let Some(client) = &client {
            tracing::info!(endpoint = client.endpoint(), "Analytics provider enabled");
        }

        Self {
            client,
            buffer: Mutex::new(Vec::new()),
            batch_size: config.batch_size.max(1),
            environment: environment.to_string(),
            release: config.release.clone(),
            dropped: AtomicU64::new(0),
        }
    }

    /// The provider only if it ended up enabled.
    pub fn from_config(config: &AnalyticsConfig, environment: &Environment) -> Option<Self> {
        let provider = Self::new(config, environment);
        provider.is_enabled().then_some(provider)
    }

    pub async fn buffered_events(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Events lost to failed sends since creation
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn enqueue(&self, event_type: &'static str, body: Value) -> Result<(), ProviderError> {
        if self.client.is_none() {
            return Ok(());
        }

        let full = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(IngestionEvent::new(event_type, body));
            buffer.len() >= self.batch_size
        };

        if full { self.send_buffered().await } else { Ok(()) }
    }

    async fn send_buffered(&self) -> Result<(), ProviderError> {
        let Some(client) = &self.client else {
            return Ok(());
        };

        let batch = std::mem::take(&mut *self.buffer.lock().await);
        if batch.is_empty() {
            return Ok(());
        }

        let in_flight = InFlightBatch {
            dropped: &self.dropped,
            events: batch.len(),
            settled: false,
        };
        let result = client.send_batch(&batch).await;
        in_flight.settle(&result);
        result
    }

    fn trace_metadata(&self, extra: Value) -> Value {
        let mut metadata = json!({ "environment": self.environment });
        if let (Value::Object(target), Value::Object(extra)) = (&mut metadata, extra) {
            target.extend(extra);
        }
        metadata
    }
}

/// A batch taken out of the buffer. It counts as dropped unless the send
/// succeeds, including when the sending future is cancelled mid-request.
struct InFlightBatch<'a> {
    dropped: &'a AtomicU64,
    events: usize,
    settled: bool,
}

impl InFlightBatch<'_> {
    fn settle(mut self, result: &Result<(), ProviderError>) {
        self.settled = true;
        if let Err(e) = result {
            let total = self.count_dropped();
            tracing::warn!(
                error = %e,
                events = self.events,
                dropped_total = total,
                "Analytics batch dropped"
            );
        }
    }

    fn count_dropped(&self) -> u64 {
        self.dropped.fetch_add(self.events as u64, Ordering::Relaxed) + self.events as u64
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let total = self.count_dropped();
            tracing::warn!(
                events = self.events,
                dropped_total = total,
                "Analytics batch abandoned mid-send"
            );
        }
    }
}

#[async_trait]
impl ObservabilityProvider for AnalyticsProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    async fn start_trace(&self, trace: &TraceStart) -> Result<Option<String>, ProviderError> {
        let body = json!({
            "id": trace.trace_id,
            "name": trace.name,
            "timestamp": trace.timestamp,
            "userId": trace.user_id,
            "sessionId": trace.session_id,
            "release": self.release,
            "metadata": self.trace_metadata(json!({
                "operation_type": trace.operation_type,
                "resource_id": trace.resource_id,
                "attributes": trace.metadata,
            })),
        });
        self.enqueue("trace-create", body).await?;
        Ok(None)
    }

    async fn end_trace(&self, trace: &TraceEnd) -> Result<(), ProviderError> {
        let body = json!({
            "id": trace.trace_id,
            "timestamp": trace.timestamp,
            "metadata": self.trace_metadata(json!({
                "status": trace.status,
                "metrics": trace.metrics,
            })),
        });
        self.enqueue("trace-create", body).await?;
        self.send_buffered().await
    }

    async fn start_span(&self, span: &SpanStart) -> Result<Option<String>, ProviderError> {
        let body = json!({
            "id": span.span_id,
            "traceId": span.trace_id,
            "parentObservationId": span.parent_span_id,
            "name": span.name,
            "startTime": span.timestamp,
            "metadata": { "span_type": span.span_type },
        });
        self.enqueue("span-create", body).await?;
        Ok(None)
    }

    async fn end_span(&self, span: &SpanEnd) -> Result<(), ProviderError> {
        let (level, status_message) = match (&span.status, &span.error) {
            (SpanStatus::Failed, Some(error)) => ("ERROR", Some(format!("{}: {}", error.error_type, error.message))),
            (SpanStatus::Failed, None) => ("ERROR", None),
            _ => ("DEFAULT", None),
        };
        let body = json!({
            "id": span.span_id,
            "traceId": span.trace_id,
            "endTime": span.timestamp,
            "level": level,
            "statusMessage": status_message,
            "metadata": {
                "duration_ms": span.duration_ms,
                "attributes": span.attributes,
            },
        });
        self.enqueue("span-update", body).await
    }

    async fn log_llm_call(&self, call: &LlmCall) -> Result<(), ProviderError> {
        let body = json!({
            "id": Uuid::new_v4().to_string(),
            "traceId": call.trace_id,
            "parentObservationId": call.span_id,
            "name": "llm_call",
            "model": call.model,
            "startTime": call.timestamp,
            "usage": {
                "input": call.prompt_tokens,
                "output": call.completion_tokens,
                "total": call.total_tokens(),
            },
            "metadata": { "latency_ms": call.latency_ms, "cost": call.cost },
        });
        self.enqueue("generation-create", body).await
    }

    async fn log_chat_message(&self, message: &ChatMessage) -> Result<(), ProviderError> {
        let body = json!({
            "id": Uuid::new_v4().to_string(),
            "traceId": message.trace_id,
            "parentObservationId": message.span_id,
            "name": "chat_message",
            "startTime": message.timestamp,
            "input": message.content_summary,
            "metadata": {
                "role": message.role,
                "content_chars": message.content_chars,
                "token_count": message.token_count,
            },
        });
        self.enqueue("event-create", body).await
    }

    async fn log_document_event(&self, event: &DocumentEvent) -> Result<(), ProviderError> {
        let body = json!({
            "id": Uuid::new_v4().to_string(),
            "traceId": event.trace_id,
            "parentObservationId": event.span_id,
            "name": format!("document.{}", event.event_type),
            "startTime": event.timestamp,
            "metadata": {
                "document_id": event.document_id,
                "resource_id": event.resource_id,
                "status": event.status,
                "metrics": event.metrics,
            },
        });
        self.enqueue("event-create", body).await
    }

    async fn flush(&self) -> Result<(), ProviderError> {
        self.send_buffered().await
    }
}
