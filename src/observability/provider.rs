use async_trait::async_trait;

use super::events::{ChatMessage, DocumentEvent, LlmCall, SpanEnd, SpanStart, TraceEnd, TraceStart};
use crate::error::ProviderError;

/// A telemetry backend the coordinator fans out to.
///
/// Implementations own their storage and their internal synchronisation.
/// A provider that is missing required configuration must report
/// `is_enabled() == false` and perform no I/O at all.
///
/// # Example
/// ```no_run
/// # use async_trait::async_trait;
/// # use kms_observability::error::ProviderError;
/// # use kms_observability::observability::*;
/// struct StdoutProvider;
///
/// #[async_trait]
/// impl ObservabilityProvider for StdoutProvider {
///     fn name(&self) -> &str { "stdout" }
///     fn is_enabled(&self) -> bool { true }
///
///     async fn start_trace(&self, trace: &TraceStart) -> Result<Option<String>, ProviderError> {
///         println!("trace {} started", trace.trace_id);
///         Ok(None)
///     }
///     async fn end_trace(&self, _: &TraceEnd) -> Result<(), ProviderError> { Ok(()) }
///     async fn start_span(&self, _: &SpanStart) -> Result<Option<String>, ProviderError> { Ok(None) }
///     async fn end_span(&self, _: &SpanEnd) -> Result<(), ProviderError> { Ok(()) }
///     async fn log_llm_call(&self, _: &LlmCall) -> Result<(), ProviderError> { Ok(()) }
///     async fn log_chat_message(&self, _: &ChatMessage) -> Result<(), ProviderError> { Ok(()) }
///     async fn log_document_event(&self, _: &DocumentEvent) -> Result<(), ProviderError> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait ObservabilityProvider: Send + Sync {
    /// Stable identifier used in logs and metrics
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// The durable system of record. Its returned ids become the primary ids.
    fn is_primary(&self) -> bool {
        false
    }

    /// Returns a provider-specific trace handle, if the provider assigns one
    async fn start_trace(&self, trace: &TraceStart) -> Result<Option<String>, ProviderError>;

    async fn end_trace(&self, trace: &TraceEnd) -> Result<(), ProviderError>;

    /// Returns a provider-specific span handle, if the provider assigns one
    async fn start_span(&self, span: &SpanStart) -> Result<Option<String>, ProviderError>;

    async fn end_span(&self, span: &SpanEnd) -> Result<(), ProviderError>;

    async fn log_llm_call(&self, call: &LlmCall) -> Result<(), ProviderError>;

    async fn log_chat_message(&self, message: &ChatMessage) -> Result<(), ProviderError>;

    async fn log_document_event(&self, event: &DocumentEvent) -> Result<(), ProviderError>;

    /// Push out anything buffered
    async fn flush(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        self.flush().await
    }
}
