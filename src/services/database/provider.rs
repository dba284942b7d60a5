//! Durable-store observability provider
//!
//! The system of record for traces. Ids it assigns become the primary ids
//! callers see as `db_trace_id` and `db_span_id`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::models::{
    ChatMessageRecord, DocumentEventRecord, LlmCallRecord, LlmTotals, SpanRecord, TraceRecord,
};
use super::{DatabaseError, DatabaseHealth, DatabaseService, Query, SortOrder};
use crate::error::ProviderError;
use crate::observability::{
    ChatMessage, DocumentEvent, LlmCall, ObservabilityProvider, SpanEnd, SpanStart, SpanStatus,
    TraceEnd, TraceStart, TraceStatus,
};

pub mod collections {
    pub const TRACES: &str = "traces";
    pub const SPANS: &str = "spans";
    pub const LLM_CALLS: &str = "llm_calls";
    pub const CHAT_MESSAGES: &str = "chat_messages";
    pub const DOCUMENT_EVENTS: &str = "document_events";
}

use collections::{CHAT_MESSAGES, DOCUMENT_EVENTS, LLM_CALLS, SPANS, TRACES};

pub const PROVIDER_NAME: &str = "database";

pub struct DatabaseProvider {
    db: Arc<dyn DatabaseService>,
}

impl DatabaseProvider {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn health_check(&self) -> DatabaseHealth {
        self.db.health_check().await
    }

    /// The earliest local trace recorded under `trace_id`.
    pub async fn fetch_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, ProviderError> {
        Ok(self.fetch_traces(trace_id).await?.into_iter().next())
    }

    /// Every local trace sharing `trace_id`, in start order. More than one
    /// exists when several requests continue the same remote trace.
    pub async fn fetch_traces(&self, trace_id: &str) -> Result<Vec<TraceRecord>, ProviderError> {
        self.fetch(
            TRACES,
            Query::new()
                .filter("trace_id", trace_id)
                .sort("started_at_us", SortOrder::Asc),
        )
        .await
    }

    /// The local trace rooted at `root_span_id`.
    pub async fn fetch_local_trace(
        &self,
        trace_id: &str,
        root_span_id: &str,
    ) -> Result<Option<TraceRecord>, ProviderError> {
        match self.db.read(TRACES, &row_key(trace_id, root_span_id)).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    /// Spans of a trace in start order.
    pub async fn fetch_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, ProviderError> {
        self.fetch(
            SPANS,
            Query::new()
                .filter("trace_id", trace_id)
                .sort("started_at_us", SortOrder::Asc),
        )
        .await
    }

    pub async fn fetch_llm_calls(&self, trace_id: &str) -> Result<Vec<LlmCallRecord>, ProviderError> {
        self.fetch(LLM_CALLS, by_trace_in_order(trace_id)).await
    }

    pub async fn fetch_chat_messages(
        &self,
        trace_id: &str,
    ) -> Result<Vec<ChatMessageRecord>, ProviderError> {
        self.fetch(CHAT_MESSAGES, by_trace_in_order(trace_id)).await
    }

    pub async fn fetch_document_events(
        &self,
        document_id: &str,
    ) -> Result<Vec<DocumentEventRecord>, ProviderError> {
        self.fetch(
            DOCUMENT_EVENTS,
            Query::new()
                .filter("document_id", document_id)
                .sort("recorded_at_us", SortOrder::Asc),
        )
        .await
    }

    /// LLM calls made under the span tree rooted at `root_span_id`.
    async fn local_llm_calls(
        &self,
        trace_id: &str,
        root_span_id: &str,
    ) -> Result<Vec<LlmCallRecord>, ProviderError> {
        let calls = self.fetch_llm_calls(trace_id).await?;
        let spans = self.fetch_spans(trace_id).await?;

        // Start order puts every parent before its children
        let mut local = HashSet::from([root_span_id.to_string()]);
        for span in &spans {
            if span.parent_span_id.as_ref().is_some_and(|parent| local.contains(parent)) {
                local.insert(span.span_id.clone());
            }
        }

        Ok(calls
            .into_iter()
            .filter(|call| call.span_id.as_ref().is_none_or(|span_id| local.contains(span_id)))
            .collect())
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: Query,
    ) -> Result<Vec<T>, ProviderError> {
        self.db
            .query(collection, query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(ProviderError::from))
            .collect()
    }

    async fn append<T: serde::Serialize>(&self, collection: &str, record: &T) -> Result<(), ProviderError> {
        self.db.create(collection, serde_json::to_value(record)?).await?;
        Ok(())
    }
}

fn by_trace_in_order(trace_id: &str) -> Query {
    Query::new()
        .filter("trace_id", trace_id)
        .sort("recorded_at_us", SortOrder::Asc)
}

// Traces are keyed by their local root span, spans by their own span id
fn row_key(trace_id: &str, span_id: &str) -> String {
    format!("{trace_id}-{span_id}")
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000.0
}

#[async_trait]
impl ObservabilityProvider for DatabaseProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn is_primary(&self) -> bool {
        true
    }

    async fn start_trace(&self, trace: &TraceStart) -> Result<Option<String>, ProviderError> {
        let record = TraceRecord {
            record_id: Uuid::new_v4().to_string(),
            trace_id: trace.trace_id.clone(),
            root_span_id: trace.root_span_id.clone(),
            name: trace.name.clone(),
            operation_type: trace.operation_type.clone(),
            user_id: trace.user_id.clone(),
            session_id: trace.session_id.clone(),
            resource_id: trace.resource_id.clone(),
            remote_parent_span_id: trace.remote_parent_span_id.clone(),
            status: TraceStatus::InProgress,
            started_at: trace.timestamp,
            started_at_us: trace.timestamp.timestamp_micros(),
            ended_at: None,
            duration_ms: None,
            total_tokens: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_cost: None,
            llm_call_count: None,
            metadata: trace.metadata.clone(),
        };

        self.db
            .insert(
                TRACES,
                &row_key(&trace.trace_id, &trace.root_span_id),
                serde_json::to_value(&record)?,
            )
            .await?;
        Ok(Some(record.record_id))
    }

    async fn end_trace(&self, trace: &TraceEnd) -> Result<(), ProviderError> {
        let key = row_key(&trace.trace_id, &trace.root_span_id);
        let existing = self
            .fetch_local_trace(&trace.trace_id, &trace.root_span_id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{TRACES}:{key}")))?;

        let mut patch = Map::new();
        patch.insert("status".to_string(), json!(trace.status));
        patch.insert("ended_at".to_string(), json!(trace.timestamp));
        patch.insert(
            "duration_ms".to_string(),
            json!(millis_between(existing.started_at, trace.timestamp).max(0.0)),
        );

        match &trace.metrics {
            Some(metrics) => {
                patch.insert("total_tokens".to_string(), json!(metrics.total_tokens));
                patch.insert("prompt_tokens".to_string(), json!(metrics.prompt_tokens));
                patch.insert("completion_tokens".to_string(), json!(metrics.completion_tokens));
                patch.insert("total_cost".to_string(), json!(metrics.total_cost));
                patch.insert("llm_call_count".to_string(), json!(metrics.llm_call_count));
                if !metrics.extra.is_empty() {
                    patch.insert("metadata".to_string(), json!({ "metrics": metrics.extra }));
                }
            }
            None => {
                let calls = self.local_llm_calls(&trace.trace_id, &trace.root_span_id).await?;
                if !calls.is_empty() {
                    let totals = LlmTotals::from_calls(&calls);
                    patch.insert("total_tokens".to_string(), json!(totals.total_tokens()));
                    patch.insert("prompt_tokens".to_string(), json!(totals.prompt_tokens));
                    patch.insert("completion_tokens".to_string(), json!(totals.completion_tokens));
                    patch.insert("total_cost".to_string(), json!(totals.total_cost));
                    patch.insert("llm_call_count".to_string(), json!(totals.calls));
                }
            }
        }

        self.db.merge(TRACES, &key, Value::Object(patch)).await?;
        Ok(())
    }

    async fn start_span(&self, span: &SpanStart) -> Result<Option<String>, ProviderError> {
        let record = SpanRecord {
            record_id: Uuid::new_v4().to_string(),
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            name: span.name.clone(),
            span_type: span.span_type.clone(),
            status: SpanStatus::InProgress,
            started_at: span.timestamp,
            started_at_us: span.timestamp.timestamp_micros(),
            ended_at: None,
            duration_ms: None,
            attributes: Map::new(),
            error_type: None,
            error_message: None,
        };

        self.db
            .insert(SPANS, &row_key(&span.trace_id, &span.span_id), serde_json::to_value(&record)?)
            .await?;
        Ok(Some(record.record_id))
    }

    async fn end_span(&self, span: &SpanEnd) -> Result<(), ProviderError> {
        let key = row_key(&span.trace_id, &span.span_id);
        let (error_type, error_message) = match &span.error {
            Some(error) => (Some(error.error_type.clone()), Some(error.message.clone())),
            None => (None, None),
        };

        let patch = json!({
            "status": span.status,
            "ended_at": span.timestamp,
            "duration_ms": span.duration_ms,
            "attributes": span.attributes,
            "error_type": error_type,
            "error_message": error_message,
        });

        match self.db.merge(SPANS, &key, patch).await {
            Ok(()) => Ok(()),
            Err(DatabaseError::NotFound(_)) => {
                // start_span never reached the store; record the span whole
                let micros = (span.duration_ms * 1_000.0) as i64;
                let started_at = span.timestamp - ChronoDuration::microseconds(micros);
                tracing::debug!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    "Span end without start row, inserting complete span"
                );
                let record = SpanRecord {
                    record_id: Uuid::new_v4().to_string(),
                    trace_id: span.trace_id.clone(),
                    span_id: span.span_id.clone(),
                    parent_span_id: span.parent_span_id.clone(),
                    name: span.name.clone(),
                    span_type: span.span_type.clone(),
                    status: span.status,
                    started_at,
                    started_at_us: started_at.timestamp_micros(),
                    ended_at: Some(span.timestamp),
                    duration_ms: Some(span.duration_ms),
                    attributes: span.attributes.clone(),
                    error_type,
                    error_message,
                };
                self.db.insert(SPANS, &key, serde_json::to_value(&record)?).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn log_llm_call(&self, call: &LlmCall) -> Result<(), ProviderError> {
        let record = LlmCallRecord {
            trace_id: call.trace_id.clone(),
            span_id: call.span_id.clone(),
            model: call.model.clone(),
            prompt_tokens: call.prompt_tokens,
            completion_tokens: call.completion_tokens,
            total_tokens: call.total_tokens(),
            latency_ms: call.latency_ms,
            cost: call.cost,
            recorded_at: call.timestamp,
            recorded_at_us: call.timestamp.timestamp_micros(),
        };
        self.append(LLM_CALLS, &record).await
    }

    async fn log_chat_message(&self, message: &ChatMessage) -> Result<(), ProviderError> {
        let record = ChatMessageRecord {
            trace_id: message.trace_id.clone(),
            span_id: message.span_id.clone(),
            session_id: message.session_id.clone(),
            user_id: message.user_id.clone(),
            role: message.role,
            content_summary: message.content_summary.clone(),
            content_chars: message.content_chars,
            token_count: message.token_count,
            recorded_at: message.timestamp,
            recorded_at_us: message.timestamp.timestamp_micros(),
        };
        self.append(CHAT_MESSAGES, &record).await
    }

    async fn log_document_event(&self, event: &DocumentEvent) -> Result<(), ProviderError> {
        let record = DocumentEventRecord {
            document_id: event.document_id.clone(),
            trace_id: event.trace_id.clone(),
            span_id: event.span_id.clone(),
            resource_id: event.resource_id.clone(),
            event_type: event.event_type.clone(),
            status: event.status,
            metrics: event.metrics.clone(),
            recorded_at: event.timestamp,
            recorded_at_us: event.timestamp.timestamp_micros(),
        };
        self.append(DOCUMENT_EVENTS, &record).await
    }
}
