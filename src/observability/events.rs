//! Canonical payloads handed to every provider
//!
//! The coordinator builds each payload once per call and lends the same value
//! to all providers in the fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle of a trace row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Pending => "pending",
            TraceStatus::InProgress => "in_progress",
            TraceStatus::Completed => "completed",
            TraceStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TraceStatus::Completed | TraceStatus::Failed)
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a span row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    InProgress,
    Completed,
    Failed,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::InProgress => "in_progress",
            SpanStatus::Completed => "completed",
            SpanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStart {
    pub trace_id: String,
    /// Span id of the root context
    pub root_span_id: String,
    pub name: String,
    pub operation_type: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_id: Option<String>,
    /// Remote span this trace continues, when started from a `traceparent`
    pub remote_parent_span_id: Option<String>,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters supplied when a trace ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMetrics {
    pub total_tokens: Option<u64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_cost: Option<f64>,
    pub llm_call_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl TraceMetrics {
    pub fn with_tokens(mut self, prompt: u64, completion: u64) -> Self {
        self.prompt_tokens = Some(prompt);
        self.completion_tokens = Some(completion);
        self.total_tokens = Some(prompt + completion);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.total_cost = Some(cost);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEnd {
    pub trace_id: String,
    /// Root span of the local trace being ended; several local traces can
    /// continue the same remote trace id
    pub root_span_id: String,
    pub status: TraceStatus,
    pub metrics: Option<TraceMetrics>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanStart {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub span_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Failure details captured from a span body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanError {
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEnd {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub span_type: String,
    pub status: SpanStatus,
    pub duration_ms: f64,
    pub attributes: Map<String, Value>,
    pub error: Option<SpanError>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCall {
    pub trace_id: String,
    pub span_id: Option<String>,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: f64,
    pub cost: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LlmCall {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub trace_id: String,
    pub span_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub role: ChatRole,
    /// Bounded, redacted summary; full content is never stored here
    pub content_summary: String,
    pub content_chars: usize,
    pub token_count: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Started => "started",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEvent {
    pub document_id: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub resource_id: Option<String>,
    /// e.g. `uploaded`, `parsed`, `chunked`, `embedded`, `indexed`
    pub event_type: String,
    pub status: EventStatus,
    pub metrics: Option<Value>,
    pub timestamp: DateTime<Utc>,
}
