//! Tracing core
//!
//! Identifier generation, context propagation, the provider contract and the
//! coordinator that fans telemetry out to every registered provider.

pub mod context;
pub mod events;
pub mod fanout;
pub mod ids;
pub mod metrics;
pub mod provider;
pub mod redaction;
pub mod service;
pub mod span;

pub use context::TraceContext;
pub use events::{
    ChatMessage, ChatRole, DocumentEvent, EventStatus, LlmCall, SpanEnd, SpanError, SpanStart,
    SpanStatus, TraceEnd, TraceMetrics, TraceStart, TraceStatus,
};
pub use ids::{generate_span_id, generate_trace_id};
pub use provider::ObservabilityProvider;
pub use service::{ObservabilityService, ObservabilityServiceBuilder, TraceOptions};
pub use span::{ActiveSpan, SpanOutcome, SpanScope};
