//! The observability coordinator
//!
//! `ObservabilityService` owns an immutable list of providers and fans every
//! tracing call out to all enabled ones. Tracing calls never fail: provider
//! errors, panics and timeouts are absorbed at the fan-out boundary.

use chrono::Utc;
use futures::Future;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::context::TraceContext;
use super::events::{
    ChatMessage, ChatRole, DocumentEvent, EventStatus, LlmCall, SpanStart, TraceEnd, TraceMetrics,
    TraceStart, TraceStatus,
};
use super::fanout::{CallTarget, ProviderList, fan_out, primary_handle};
use super::ids::ensure_entropy_available;
use super::provider::ObservabilityProvider;
use super::redaction::summarize_content;
use super::span::{ActiveSpan, SpanOutcome, SpanScope};
use crate::config::{ObservabilityConfig, ServiceConfig, load_config};
use crate::error::ObservabilityError;
use crate::services::analytics::AnalyticsProvider;
use crate::services::database::{DatabaseProvider, SurrealDatabase};

static INSTANCE: OnceCell<Arc<ObservabilityService>> = OnceCell::const_new();

/// Parameters for [`ObservabilityService::start_trace_with`].
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub name: String,
    pub operation_type: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_id: Option<String>,
    pub metadata: Option<Value>,
    /// W3C `traceparent` of a remote caller to continue
    pub traceparent: Option<String>,
}

impl TraceOptions {
    pub fn new(name: impl Into<String>, operation_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation_type: operation_type.into(),
            ..Default::default()
        }
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn traceparent(mut self, header: impl Into<String>) -> Self {
        self.traceparent = Some(header.into());
        self
    }
}

pub struct ObservabilityService {
    providers: ProviderList,
    settings: Arc<ServiceConfig>,
}

impl std::fmt::Debug for ObservabilityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityService")
            .field("providers", &self.provider_names())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ObservabilityService {
    /// The process-wide instance, built from layered configuration on first use.
    ///
    /// Concurrent first callers wait on the same initialisation and all get
    /// the same `Arc`.
    pub async fn get_instance() -> Result<Arc<Self>, ObservabilityError> {
        INSTANCE
            .get_or_try_init(|| async {
                let config = load_config(None)?;
                Self::from_config(&config).await.map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Initialise the process-wide instance from `config`.
    ///
    /// If the instance already exists it is returned as is and `config` is ignored.
    pub async fn init_instance(config: &ObservabilityConfig) -> Result<Arc<Self>, ObservabilityError> {
        INSTANCE
            .get_or_try_init(|| async { Self::from_config(config).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Same as [`get_instance`](Self::get_instance) but with an explicit config file.
    pub async fn init_from_file(path: &Path) -> Result<Arc<Self>, ObservabilityError> {
        let config = load_config(Some(path))?;
        Self::init_instance(&config).await
    }

    /// The process-wide instance if it has been initialised.
    pub fn try_get_instance() -> Option<Arc<Self>> {
        INSTANCE.get().cloned()
    }

    /// Build a service with the durable store and, if configured, analytics.
    pub async fn from_config(config: &ObservabilityConfig) -> Result<Self, ObservabilityError> {
        let store = SurrealDatabase::connect(&config.database).await?;
        Self::with_store(config, Arc::new(DatabaseProvider::new(Arc::new(store))))
    }

    /// Build a service around an existing durable provider.
    ///
    /// Callers keep their `Arc` to read stored traces back.
    pub fn with_store(
        config: &ObservabilityConfig,
        store: Arc<DatabaseProvider>,
    ) -> Result<Self, ObservabilityError> {
        let mut builder = Self::builder()
            .service_config(config.service.clone())
            .provider(store);

        match AnalyticsProvider::from_config(&config.analytics, &config.environment) {
            Some(analytics) => builder = builder.provider(Arc::new(analytics)),
            None => debug!("Analytics provider not configured"),
        }

        builder.build()
    }

    pub fn builder() -> ObservabilityServiceBuilder {
        ObservabilityServiceBuilder::default()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn settings(&self) -> &ServiceConfig {
        &self.settings
    }

    /// Start a new trace and return its root context.
    pub async fn start_trace(
        &self,
        name: &str,
        operation_type: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        resource_id: Option<&str>,
    ) -> TraceContext {
        self.start_trace_with(TraceOptions {
            name: name.to_string(),
            operation_type: operation_type.to_string(),
            user_id: user_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
            resource_id: resource_id.map(str::to_string),
            ..Default::default()
        })
        .await
    }

    /// Start a trace, optionally continuing a remote `traceparent`.
    ///
    /// A malformed `traceparent` is logged and a fresh trace is started.
    pub async fn start_trace_with(&self, options: TraceOptions) -> TraceContext {
        let remote = options
            .traceparent
            .as_deref()
            .and_then(|header| match TraceContext::from_traceparent(header) {
                Ok(context) => Some(context),
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid traceparent");
                    None
                }
            });

        let context = match remote {
            Some(mut context) => {
                context.name = Some(options.name.clone());
                context.user_id = options.user_id;
                context.session_id = options.session_id;
                context.resource_id = options.resource_id;
                context
            }
            None => TraceContext::root(
                options.name.clone(),
                options.user_id,
                options.session_id,
                options.resource_id,
            ),
        };

        let payload = TraceStart {
            trace_id: context.trace_id.clone(),
            root_span_id: context.span_id.clone(),
            name: options.name,
            operation_type: options.operation_type,
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            resource_id: context.resource_id.clone(),
            remote_parent_span_id: context.parent_span_id.clone(),
            metadata: options.metadata,
            timestamp: Utc::now(),
        };

        let outcomes = fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "start_trace",
            CallTarget::trace(&payload.trace_id),
            |provider| provider.start_trace(&payload),
        )
        .await;

        let db_trace_id = primary_handle(outcomes);
        debug!(
            trace_id = %context.trace_id,
            db_trace_id = db_trace_id.as_deref().unwrap_or("-"),
            name = %payload.name,
            "Trace started"
        );
        context.with_db_trace_id(db_trace_id)
    }

    /// Finish the trace started as `context`. Calling it twice overwrites the
    /// first result.
    ///
    /// Only `Completed` and `Failed` end a trace; any other status is logged
    /// and recorded as `Failed`.
    pub async fn end_trace(
        &self,
        context: &TraceContext,
        status: TraceStatus,
        metrics: Option<TraceMetrics>,
    ) {
        let status = if status.is_terminal() {
            status
        } else {
            warn!(
                trace_id = %context.trace_id,
                requested = %status,
                "end_trace needs a terminal status; recording as failed"
            );
            TraceStatus::Failed
        };

        let payload = TraceEnd {
            trace_id: context.trace_id.clone(),
            root_span_id: context.span_id.clone(),
            status,
            metrics,
            timestamp: Utc::now(),
        };

        fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "end_trace",
            CallTarget::trace(&payload.trace_id),
            |provider| provider.end_trace(&payload),
        )
        .await;

        debug!(trace_id = %context.trace_id, status = %status, "Trace ended");
    }

    /// Start a child span of `parent` that the caller ends explicitly.
    pub async fn start_span(&self, parent: &TraceContext, name: &str, span_type: &str) -> ActiveSpan {
        let child = parent.child_context(Some(name));
        // The guard exists before any provider is called, so cancellation
        // during the fan-out still records the span.
        let mut span = ActiveSpan::new(
            self.providers.clone(),
            self.settings.clone(),
            child,
            name,
            span_type,
        );

        let context = span.context();
        let payload = SpanStart {
            trace_id: context.trace_id.clone(),
            span_id: context.span_id.clone(),
            parent_span_id: context.parent_span_id.clone(),
            name: name.to_string(),
            span_type: span_type.to_string(),
            timestamp: Utc::now(),
        };

        let outcomes = fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "start_span",
            CallTarget::span(&payload.trace_id, &payload.span_id),
            |provider| provider.start_span(&payload),
        )
        .await;

        span.set_db_span_id(primary_handle(outcomes));
        span
    }

    /// Run `body` inside a child span of `parent`.
    ///
    /// The span records the body's wall time and, on `Err`, the error's type
    /// name and a scrubbed message. The body's result is returned unchanged.
    pub async fn span<T, E, F, Fut>(
        &self,
        parent: &TraceContext,
        name: &str,
        span_type: &str,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(SpanScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display + 'static,
    {
        let span = self.start_span(parent, name, span_type).await;
        let result = body(span.scope()).await;

        match &result {
            Ok(_) => span.end(SpanOutcome::Completed).await,
            Err(error) => span.end_with_error(error).await,
        }

        result
    }

    pub async fn log_llm_call(
        &self,
        context: &TraceContext,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        latency_ms: f64,
        cost: Option<f64>,
    ) {
        let payload = LlmCall {
            trace_id: context.trace_id.clone(),
            span_id: Some(context.span_id.clone()),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            latency_ms,
            cost,
            timestamp: Utc::now(),
        };

        fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "log_llm_call",
            CallTarget::span(&payload.trace_id, &context.span_id),
            |provider| provider.log_llm_call(&payload),
        )
        .await;
    }

    /// Record a chat message. Only a bounded, redacted summary of `content` is kept.
    pub async fn log_chat_message(
        &self,
        context: &TraceContext,
        role: ChatRole,
        content: &str,
        token_count: Option<u64>,
    ) {
        let payload = ChatMessage {
            trace_id: context.trace_id.clone(),
            span_id: Some(context.span_id.clone()),
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            role,
            content_summary: summarize_content(content, self.settings.chat_summary_max_chars),
            content_chars: content.chars().count(),
            token_count,
            timestamp: Utc::now(),
        };

        fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "log_chat_message",
            CallTarget::span(&payload.trace_id, &context.span_id),
            |provider| provider.log_chat_message(&payload),
        )
        .await;
    }

    pub async fn log_document_event(
        &self,
        document_id: &str,
        context: Option<&TraceContext>,
        event_type: &str,
        status: EventStatus,
        metrics: Option<Value>,
    ) {
        let payload = DocumentEvent {
            document_id: document_id.to_string(),
            trace_id: context.map(|c| c.trace_id.clone()),
            span_id: context.map(|c| c.span_id.clone()),
            resource_id: context.and_then(|c| c.resource_id.clone()),
            event_type: event_type.to_string(),
            status,
            metrics,
            timestamp: Utc::now(),
        };

        let target = CallTarget {
            trace_id: payload.trace_id.as_deref(),
            span_id: payload.span_id.as_deref(),
        };
        fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "log_document_event",
            target,
            |provider| provider.log_document_event(&payload),
        )
        .await;
    }

    /// Push out anything providers have buffered.
    pub async fn flush(&self) {
        fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "flush",
            CallTarget::default(),
            |provider| provider.flush(),
        )
        .await;
    }

    pub async fn shutdown(&self) {
        info!(providers = self.provider_count(), "Shutting down observability providers");
        fan_out(
            &self.providers,
            self.settings.provider_timeout(),
            "shutdown",
            CallTarget::default(),
            |provider| provider.shutdown(),
        )
        .await;
    }
}

/// Explicit construction with a fixed provider list.
#[derive(Default)]
pub struct ObservabilityServiceBuilder {
    providers: Vec<Arc<dyn ObservabilityProvider>>,
    settings: ServiceConfig,
}

impl ObservabilityServiceBuilder {
    pub fn provider(mut self, provider: Arc<dyn ObservabilityProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn service_config(mut self, settings: ServiceConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Fails when more than one provider claims to be primary, when two
    /// share a name, or when the OS random source is unusable.
    pub fn build(self) -> Result<ObservabilityService, ObservabilityError> {
        ensure_entropy_available()?;
        debug!("Secure random source available");

        let primaries = self.providers.iter().filter(|p| p.is_primary()).count();
        if primaries > 1 {
            return Err(ObservabilityError::Config(format!(
                "expected at most one primary provider, found {primaries}"
            )));
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = self.providers.iter().find(|p| !seen.insert(p.name().to_string())) {
            return Err(ObservabilityError::Config(format!(
                "provider '{}' registered twice",
                duplicate.name()
            )));
        }

        info!(
            providers = ?self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            enabled = self.providers.iter().filter(|p| p.is_enabled()).count(),
            "Observability service built"
        );

        Ok(ObservabilityService {
            providers: self.providers.into(),
            settings: Arc::new(self.settings),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::observability::events::{SpanEnd, SpanStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingProvider {
        name: &'static str,
        primary: bool,
        fail_end_span: bool,
        trace_starts: Mutex<Vec<TraceStart>>,
        trace_ends: Mutex<Vec<TraceEnd>>,
        span_starts: Mutex<Vec<SpanStart>>,
        span_ends: Mutex<Vec<SpanEnd>>,
        chat: Mutex<Vec<ChatMessage>>,
    }

    impl RecordingProvider {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                ..Default::default()
            }
        }

        fn primary(mut self) -> Self {
            self.primary = true;
            self
        }

        fn failing_end_span(mut self) -> Self {
            self.fail_end_span = true;
            self
        }

        fn span_ends(&self) -> Vec<SpanEnd> {
            self.span_ends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObservabilityProvider for RecordingProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            true
        }

        fn is_primary(&self) -> bool {
            self.primary
        }

        async fn start_trace(&self, trace: &TraceStart) -> Result<Option<String>, ProviderError> {
            self.trace_starts.lock().unwrap().push(trace.clone());
            Ok(self.primary.then(|| "trace-record-1".to_string()))
        }

        async fn end_trace(&self, trace: &TraceEnd) -> Result<(), ProviderError> {
            self.trace_ends.lock().unwrap().push(trace.clone());
            Ok(())
        }

        async fn start_span(&self, span: &SpanStart) -> Result<Option<String>, ProviderError> {
            self.span_starts.lock().unwrap().push(span.clone());
            Ok(self.primary.then(|| format!("span-record-{}", span.name)))
        }

        async fn end_span(&self, span: &SpanEnd) -> Result<(), ProviderError> {
            if self.fail_end_span {
                return Err(ProviderError::Network("connection refused".to_string()));
            }
            self.span_ends.lock().unwrap().push(span.clone());
            Ok(())
        }

        async fn log_llm_call(&self, _: &LlmCall) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn log_chat_message(&self, message: &ChatMessage) -> Result<(), ProviderError> {
            self.chat.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn log_document_event(&self, _: &DocumentEvent) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct ParseError(String);

    impl std::fmt::Display for ParseError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "parse failed: {}", self.0)
        }
    }

    fn service_with(store: Arc<RecordingProvider>) -> ObservabilityService {
        ObservabilityService::builder().provider(store).build().unwrap()
    }

    #[tokio::test]
    async fn test_start_trace_uses_primary_handle() {
        let primary = Arc::new(RecordingProvider::new("store").primary());
        let secondary = Arc::new(RecordingProvider::new("analytics"));
        let service = ObservabilityService::builder()
            .provider(primary.clone())
            .provider(secondary.clone())
            .build()
            .unwrap();

        let ctx = service
            .start_trace("chat.generate", "chat", Some("user-1"), None, Some("kb-1"))
            .await;

        assert!(ctx.is_root());
        assert_eq!(ctx.db_trace_id.as_deref(), Some("trace-record-1"));
        assert_eq!(ctx.resource_id.as_deref(), Some("kb-1"));

        let starts = secondary.trace_starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].trace_id, ctx.trace_id);
        assert_eq!(starts[0].root_span_id, ctx.span_id);
    }

    #[tokio::test]
    async fn test_span_records_completion_and_attributes() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = service_with(store.clone());
        let ctx = service.start_trace("t", "test", None, None, None).await;
        let root_span_id = ctx.span_id.clone();

        let value = service
            .span(&ctx, "parse", "pipeline", |scope| async move {
                assert_eq!(scope.primary_span_id(), "span-record-parse");
                assert_eq!(scope.context().parent_span_id, Some(root_span_id));
                scope.set_attribute("pages", 3);
                Ok::<_, ParseError>(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let ends = store.span_ends();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].status, SpanStatus::Completed);
        assert_eq!(ends[0].attributes.get("pages"), Some(&Value::from(3)));
        assert!(ends[0].error.is_none());
    }

    #[tokio::test]
    async fn test_span_error_is_returned_unchanged_and_recorded() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = ObservabilityService::builder()
            .provider(store.clone())
            .service_config(ServiceConfig {
                error_message_max_chars: 64,
                ..Default::default()
            })
            .build()
            .unwrap();
        let ctx = service.start_trace("t", "test", None, None, None).await;

        let long = "z".repeat(1_000);
        let result: Result<(), ParseError> = service
            .span(&ctx, "parse", "pipeline", |_| async move { Err(ParseError(long)) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.0.len(), 1_000);

        let ends = store.span_ends();
        assert_eq!(ends[0].status, SpanStatus::Failed);
        let error = ends[0].error.clone().unwrap();
        assert_eq!(error.error_type, "ParseError");
        assert!(error.message.chars().count() <= 64);
        assert!(error.message.starts_with("parse failed: zzz"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_provider_does_not_block_others() {
        let broken = Arc::new(RecordingProvider::new("broken").failing_end_span());
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = ObservabilityService::builder()
            .provider(broken)
            .provider(store.clone())
            .build()
            .unwrap();
        let ctx = service.start_trace("t", "test", None, None, None).await;

        let result = service
            .span(&ctx, "chunk", "pipeline", |_| async { Ok::<_, ParseError>("done") })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(store.span_ends().len(), 1);
        assert!(logs_contain("Observability provider call failed"));
        assert!(logs_contain("broken"));
    }

    #[tokio::test]
    async fn test_nested_spans_link_parents() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = service_with(store.clone());
        let ctx = service.start_trace("t", "test", None, None, None).await;

        service
            .span(&ctx, "outer", "pipeline", |outer| {
                let service = &service;
                async move {
                    service
                        .span(outer.context(), "inner", "pipeline", |_| async { Ok::<_, ParseError>(()) })
                        .await
                }
            })
            .await
            .unwrap();

        let starts = store.span_starts.lock().unwrap().clone();
        let outer = starts.iter().find(|s| s.name == "outer").unwrap();
        let inner = starts.iter().find(|s| s.name == "inner").unwrap();
        assert_eq!(outer.parent_span_id.as_deref(), Some(ctx.span_id.as_str()));
        assert_eq!(inner.parent_span_id.as_deref(), Some(outer.span_id.as_str()));
        assert_eq!(inner.trace_id, ctx.trace_id);
    }

    #[tokio::test]
    async fn test_dropped_span_is_recorded_as_cancelled() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = service_with(store.clone());
        let ctx = service.start_trace("t", "test", None, None, None).await;

        let span = service.start_span(&ctx, "embed", "pipeline").await;
        drop(span);

        for _ in 0..50 {
            if !store.span_ends().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let ends = store.span_ends();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].status, SpanStatus::Failed);
        assert_eq!(ends[0].error.as_ref().unwrap().error_type, "Cancelled");
    }

    #[tokio::test]
    async fn test_chat_message_is_summarised() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = service_with(store.clone());
        let ctx = service.start_trace("chat", "chat", Some("u"), Some("s"), None).await;

        let content = format!("contact me at jane@example.com {}", "word ".repeat(200));
        service.log_chat_message(&ctx, ChatRole::User, &content, Some(250)).await;

        let messages = store.chat.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].session_id.as_deref(), Some("s"));
        assert_eq!(messages[0].content_chars, content.chars().count());
        assert!(messages[0].content_summary.chars().count() <= 200);
        assert!(!messages[0].content_summary.contains("jane@"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_end_trace_records_non_terminal_status_as_failed() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = service_with(store.clone());
        let ctx = service.start_trace("t", "test", None, None, None).await;

        service.end_trace(&ctx, TraceStatus::Pending, None).await;
        service.end_trace(&ctx, TraceStatus::Completed, None).await;

        let ends = store.trace_ends.lock().unwrap().clone();
        assert_eq!(ends.len(), 2);
        assert_eq!(ends[0].status, TraceStatus::Failed);
        assert_eq!(ends[0].root_span_id, ctx.span_id);
        assert_eq!(ends[1].status, TraceStatus::Completed);
        assert!(logs_contain("end_trace needs a terminal status"));
    }

    #[tokio::test]
    async fn test_span_end_carries_parent_and_type() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = service_with(store.clone());
        let ctx = service.start_trace("t", "test", None, None, None).await;

        let span = service.start_span(&ctx, "embed", "pipeline").await;
        span.end(SpanOutcome::Completed).await;

        let ends = store.span_ends();
        assert_eq!(ends[0].parent_span_id.as_deref(), Some(ctx.span_id.as_str()));
        assert_eq!(ends[0].span_type, "pipeline");
    }

    #[test]
    #[traced_test]
    fn test_build_checks_random_source() {
        ObservabilityService::builder().build().unwrap();
        assert!(logs_contain("Secure random source available"));
    }

    #[tokio::test]
    async fn test_traceparent_continues_remote_trace() {
        let store = Arc::new(RecordingProvider::new("store").primary());
        let service = service_with(store.clone());
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

        let ctx = service
            .start_trace_with(TraceOptions::new("api.request", "http").traceparent(header))
            .await;
        assert_eq!(ctx.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));

        let fresh = service
            .start_trace_with(TraceOptions::new("api.request", "http").traceparent("garbage"))
            .await;
        assert!(fresh.is_root());
        assert_ne!(fresh.trace_id, ctx.trace_id);
    }

    #[test]
    fn test_builder_rejects_two_primaries() {
        let result = ObservabilityService::builder()
            .provider(Arc::new(RecordingProvider::new("a").primary()))
            .provider(Arc::new(RecordingProvider::new("b").primary()))
            .build();
        assert!(matches!(result, Err(ObservabilityError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_duplicate_names() {
        let result = ObservabilityService::builder()
            .provider(Arc::new(RecordingProvider::new("a")))
            .provider(Arc::new(RecordingProvider::new("a")))
            .build();
        assert!(matches!(result, Err(ObservabilityError::Config(_))));
    }

    #[test]
    fn test_provider_introspection() {
        let service = ObservabilityService::builder()
            .provider(Arc::new(RecordingProvider::new("store").primary()))
            .provider(Arc::new(RecordingProvider::new("analytics")))
            .build()
            .unwrap();
        assert_eq!(service.provider_count(), 2);
        assert_eq!(service.provider_names(), vec!["store", "analytics"]);
    }
}
