//! Row shapes of the durable trace store
//!
//! Timestamps are stored as RFC 3339 strings. Traces and spans also carry
//! `started_at_us`, microseconds since the epoch, so they can be ordered
//! without parsing dates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::observability::{ChatRole, EventStatus, SpanStatus, TraceStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Primary id handed back to callers as `db_trace_id`
    pub record_id: String,
    pub trace_id: String,
    pub root_span_id: String,
    pub name: String,
    pub operation_type: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_id: Option<String>,
    pub remote_parent_span_id: Option<String>,
    pub status: TraceStatus,
    pub started_at: DateTime<Utc>,
    pub started_at_us: i64,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub total_tokens: Option<u64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_cost: Option<f64>,
    pub llm_call_count: Option<u32>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Primary id handed back to callers as `db_span_id`
    pub record_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub span_type: String,
    pub status: SpanStatus,
    pub started_at: DateTime<Utc>,
    pub started_at_us: i64,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub trace_id: String,
    pub span_id: Option<String>,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: f64,
    pub cost: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    pub recorded_at_us: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    pub trace_id: String,
    pub span_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub role: ChatRole,
    pub content_summary: String,
    pub content_chars: usize,
    pub token_count: Option<u64>,
    pub recorded_at: DateTime<Utc>,
    pub recorded_at_us: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEventRecord {
    pub document_id: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub resource_id: Option<String>,
    pub event_type: String,
    pub status: EventStatus,
    pub metrics: Option<Value>,
    pub recorded_at: DateTime<Utc>,
    pub recorded_at_us: i64,
}

/// Aggregates of a trace's LLM calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LlmTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: Option<f64>,
    pub calls: u32,
}

impl LlmTotals {
    pub fn from_calls(calls: &[LlmCallRecord]) -> Self {
        calls.iter().fold(Self::default(), |mut totals, call| {
            totals.prompt_tokens += call.prompt_tokens;
            totals.completion_tokens += call.completion_tokens;
            if let Some(cost) = call.cost {
                totals.total_cost = Some(totals.total_cost.unwrap_or(0.0) + cost);
            }
            totals.calls += 1;
            totals
        })
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(prompt: u64, completion: u64, cost: Option<f64>) -> LlmCallRecord {
        let now = Utc::now();
        LlmCallRecord {
            trace_id: "t".to_string(),
            span_id: None,
            model: "gpt-4o-mini".to_string(),
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            latency_ms: 10.0,
            cost,
            recorded_at: now,
            recorded_at_us: now.timestamp_micros(),
        }
    }

    #[test]
    fn test_llm_totals() {
        let totals = LlmTotals::from_calls(&[call(100, 20, Some(0.5)), call(50, 5, None)]);
        assert_eq!(totals.prompt_tokens, 150);
        assert_eq!(totals.completion_tokens, 25);
        assert_eq!(totals.total_tokens(), 175);
        assert_eq!(totals.total_cost, Some(0.5));
        assert_eq!(totals.calls, 2);

        assert_eq!(LlmTotals::from_calls(&[]).total_cost, None);
    }

    #[test]
    fn test_span_record_defaults_attributes() {
        let json = serde_json::json!({
            "record_id": "r",
            "trace_id": "t",
            "span_id": "s",
            "parent_span_id": null,
            "name": "parse",
            "span_type": "pipeline",
            "status": "in_progress",
            "started_at": "2026-01-01T00:00:00Z",
            "started_at_us": 1_767_225_600_000_000_i64,
            "ended_at": null,
            "duration_ms": null,
            "error_type": null,
            "error_message": null
        });
        let record: SpanRecord = serde_json::from_value(json).unwrap();
        assert!(record.attributes.is_empty());
        assert_eq!(record.status, SpanStatus::InProgress);
    }
}
