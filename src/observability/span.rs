//! Span scopes
//!
//! An [`ActiveSpan`] is the in-flight state of one span: the derived child
//! context, the monotonic start instant and the attributes gathered so far.
//! It must be finished with [`ActiveSpan::end`]. If it is dropped instead,
//! because the owning task was cancelled or a panic is unwinding through it,
//! the span is still recorded as failed.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::context::TraceContext;
use super::events::{SpanEnd, SpanError, SpanStatus};
use super::fanout::{CallTarget, ProviderList, fan_out};
use super::redaction::scrub_error_message;
use crate::config::ServiceConfig;

pub const CANCELLED_ERROR_TYPE: &str = "Cancelled";
pub const PANIC_ERROR_TYPE: &str = "Panic";

/// Handle given to the body of a span.
#[derive(Debug, Clone)]
pub struct SpanScope {
    context: TraceContext,
    attributes: Arc<Mutex<Map<String, Value>>>,
}

impl SpanScope {
    fn new(context: TraceContext) -> Self {
        Self {
            context,
            attributes: Arc::new(Mutex::new(Map::new())),
        }
    }

    /// Context of this span. Pass it down to create nested spans.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Id assigned by the durable store, or the hex span id when none was.
    pub fn primary_span_id(&self) -> &str {
        self.context.primary_span_id()
    }

    /// Attach a key/value pair recorded when the span ends.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock_attributes().insert(key.into(), value.into());
    }

    fn lock_attributes(&self) -> MutexGuard<'_, Map<String, Value>> {
        // A poisoned map still holds valid attributes
        self.attributes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_attributes(&self) -> Map<String, Value> {
        std::mem::take(&mut *self.lock_attributes())
    }
}

/// How a span finished.
#[derive(Debug, Clone, PartialEq)]
pub enum SpanOutcome {
    Completed,
    Failed(SpanError),
}

impl SpanOutcome {
    /// Failure outcome carrying the short type name of `E` and its message.
    pub fn from_error<E: std::fmt::Display + 'static>(error: &E) -> Self {
        SpanOutcome::Failed(SpanError {
            error_type: error_type_name::<E>(),
            message: error.to_string(),
        })
    }
}

/// A started span that has not been ended yet.
#[must_use = "an ActiveSpan records a cancelled span when dropped without `end`"]
pub struct ActiveSpan {
    providers: ProviderList,
    settings: Arc<ServiceConfig>,
    scope: SpanScope,
    name: String,
    span_type: String,
    started: Instant,
    finished: bool,
}

impl ActiveSpan {
    pub(crate) fn new(
        providers: ProviderList,
        settings: Arc<ServiceConfig>,
        context: TraceContext,
        name: &str,
        span_type: &str,
    ) -> Self {
        Self {
            providers,
            settings,
            scope: SpanScope::new(context),
            name: name.to_string(),
            span_type: span_type.to_string(),
            started: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn set_db_span_id(&mut self, id: Option<String>) {
        self.scope.context = self.scope.context.clone().with_db_span_id(id);
    }

    pub fn context(&self) -> &TraceContext {
        self.scope.context()
    }

    /// A cloneable handle onto this span for the code it wraps.
    pub fn scope(&self) -> SpanScope {
        self.scope.clone()
    }

    pub fn primary_span_id(&self) -> &str {
        self.scope.primary_span_id()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.scope.set_attribute(key, value);
    }

    /// Milliseconds since the span started, from the monotonic clock.
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1_000.0
    }

    /// Finish the span and fan the result out to every provider.
    pub async fn end(mut self, outcome: SpanOutcome) {
        self.finished = true;

        let (status, error) = match outcome {
            SpanOutcome::Completed => (SpanStatus::Completed, None),
            SpanOutcome::Failed(error) => (SpanStatus::Failed, Some(self.scrub(error))),
        };
        let payload = self.payload(status, error);
        let providers = self.providers.clone();
        let timeout = self.settings.provider_timeout();

        fan_out(
            &providers,
            timeout,
            "end_span",
            CallTarget::span(&payload.trace_id, &payload.span_id),
            |provider| provider.end_span(&payload),
        )
        .await;
    }

    /// Finish the span as failed with `error`.
    pub async fn end_with_error<E: std::fmt::Display + 'static>(self, error: &E) {
        self.end(SpanOutcome::from_error(error)).await;
    }

    fn scrub(&self, error: SpanError) -> SpanError {
        SpanError {
            error_type: error.error_type,
            message: scrub_error_message(
                &error.message,
                self.settings.error_message_max_chars,
                self.settings.redact_error_messages,
            ),
        }
    }

    fn payload(&self, status: SpanStatus, error: Option<SpanError>) -> SpanEnd {
        let context = self.scope.context();
        SpanEnd {
            trace_id: context.trace_id.clone(),
            span_id: context.span_id.clone(),
            parent_span_id: context.parent_span_id.clone(),
            name: self.name.clone(),
            span_type: self.span_type.clone(),
            status,
            duration_ms: self.elapsed_ms(),
            attributes: self.scope.take_attributes(),
            error,
            timestamp: Utc::now(),
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let error_type = if std::thread::panicking() {
            PANIC_ERROR_TYPE
        } else {
            CANCELLED_ERROR_TYPE
        };
        let payload = self.payload(
            SpanStatus::Failed,
            Some(SpanError {
                error_type: error_type.to_string(),
                message: format!("span '{}' ended without completing", self.name),
            }),
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                trace_id = %payload.trace_id,
                span_id = %payload.span_id,
                span = %payload.name,
                "Span dropped outside a tokio runtime; end not recorded"
            );
            return;
        };

        let providers = self.providers.clone();
        let timeout = self.settings.provider_timeout();
        handle.spawn(async move {
            fan_out(
                &providers,
                timeout,
                "end_span",
                CallTarget::span(&payload.trace_id, &payload.span_id),
                |provider| provider.end_span(&payload),
            )
            .await;
        });
    }
}

/// Short type name of `E`: generics and module path dropped.
///
/// `my_app::pipeline::EmbedError` becomes `EmbedError`,
/// `anyhow::Error` becomes `Error`.
pub fn error_type_name<E: ?Sized + 'static>() -> String {
    let full = std::any::type_name::<E>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod pipeline {
        #[derive(Debug)]
        pub struct EmbedError;

        impl std::fmt::Display for EmbedError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "embedding backend unavailable")
            }
        }
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(error_type_name::<pipeline::EmbedError>(), "EmbedError");
        assert_eq!(error_type_name::<std::io::Error>(), "Error");
        assert_eq!(error_type_name::<Vec<String>>(), "Vec");
    }

    #[test]
    fn test_outcome_from_error() {
        let outcome = SpanOutcome::from_error(&pipeline::EmbedError);
        assert_eq!(
            outcome,
            SpanOutcome::Failed(SpanError {
                error_type: "EmbedError".to_string(),
                message: "embedding backend unavailable".to_string(),
            })
        );
    }

    #[test]
    fn test_scope_attributes_shared_between_clones() {
        let root = TraceContext::root("t", None, None, None);
        let scope = SpanScope::new(root.child_context(Some("parse")));
        let clone = scope.clone();

        clone.set_attribute("pages", 12);
        scope.set_attribute("format", "pdf");

        let attributes = scope.take_attributes();
        assert_eq!(attributes.get("pages"), Some(&Value::from(12)));
        assert_eq!(attributes.get("format"), Some(&Value::from("pdf")));
        assert!(clone.take_attributes().is_empty());
    }

    #[test]
    fn test_primary_span_id_falls_back_to_hex() {
        let root = TraceContext::root("t", None, None, None);
        let child = root.child_context(Some("chunk"));
        let providers: ProviderList = Arc::new([]);
        let settings = Arc::new(ServiceConfig::default());
        let mut span = ActiveSpan::new(providers, settings, child.clone(), "chunk", "pipeline");

        assert_eq!(span.primary_span_id(), child.span_id);
        span.set_db_span_id(Some("span-record-1".to_string()));
        assert_eq!(span.primary_span_id(), "span-record-1");
        assert_eq!(span.scope().context().span_id, child.span_id);
        span.finished = true;
    }
}
