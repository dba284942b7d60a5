//! Provider failures never reach the instrumented code

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

use kms_observability::config::ServiceConfig;
use kms_observability::error::ProviderError;
use kms_observability::observability::*;
use kms_observability::services::database::{DatabaseProvider, InMemoryDatabase};

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Fail,
    Panic,
    Hang,
}

/// A provider that misbehaves the same way on every call.
struct BrokenProvider {
    name: &'static str,
    behaviour: Behaviour,
}

impl BrokenProvider {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self { name, behaviour })
    }

    async fn misbehave<T>(&self) -> Result<T, ProviderError> {
        match self.behaviour {
            Behaviour::Fail => Err(ProviderError::Network("connection reset".to_string())),
            Behaviour::Panic => panic!("provider {} exploded", self.name),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(ProviderError::Network("unreachable".to_string()))
            }
        }
    }
}

#[async_trait]
impl ObservabilityProvider for BrokenProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn start_trace(&self, _: &TraceStart) -> Result<Option<String>, ProviderError> {
        self.misbehave().await
    }

    async fn end_trace(&self, _: &TraceEnd) -> Result<(), ProviderError> {
        self.misbehave().await
    }

    async fn start_span(&self, _: &SpanStart) -> Result<Option<String>, ProviderError> {
        self.misbehave().await
    }

    async fn end_span(&self, _: &SpanEnd) -> Result<(), ProviderError> {
        self.misbehave().await
    }

    async fn log_llm_call(&self, _: &LlmCall) -> Result<(), ProviderError> {
        self.misbehave().await
    }

    async fn log_chat_message(&self, _: &ChatMessage) -> Result<(), ProviderError> {
        self.misbehave().await
    }

    async fn log_document_event(&self, _: &DocumentEvent) -> Result<(), ProviderError> {
        self.misbehave().await
    }
}

/// A provider that reports itself disabled and must never be called.
struct DisabledProvider;

#[async_trait]
impl ObservabilityProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn start_trace(&self, _: &TraceStart) -> Result<Option<String>, ProviderError> {
        panic!("disabled provider called")
    }

    async fn end_trace(&self, _: &TraceEnd) -> Result<(), ProviderError> {
        panic!("disabled provider called")
    }

    async fn start_span(&self, _: &SpanStart) -> Result<Option<String>, ProviderError> {
        panic!("disabled provider called")
    }

    async fn end_span(&self, _: &SpanEnd) -> Result<(), ProviderError> {
        panic!("disabled provider called")
    }

    async fn log_llm_call(&self, _: &LlmCall) -> Result<(), ProviderError> {
        panic!("disabled provider called")
    }

    async fn log_chat_message(&self, _: &ChatMessage) -> Result<(), ProviderError> {
        panic!("disabled provider called")
    }

    async fn log_document_event(&self, _: &DocumentEvent) -> Result<(), ProviderError> {
        panic!("disabled provider called")
    }
}

#[derive(Debug)]
struct WorkError;

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work failed")
    }
}

fn fast_timeout() -> ServiceConfig {
    ServiceConfig {
        provider_timeout_ms: 50,
        ..Default::default()
    }
}

fn store() -> (Arc<InMemoryDatabase>, Arc<DatabaseProvider>) {
    let db = Arc::new(InMemoryDatabase::new());
    (db.clone(), Arc::new(DatabaseProvider::new(db)))
}

async fn exercise(service: &ObservabilityService) -> (TraceContext, Result<u32, WorkError>) {
    let ctx = service.start_trace("fail.safe", "test", Some("u"), Some("s"), None).await;
    let result = service
        .span(&ctx, "work", "test", |scope| async move {
            scope.set_attribute("ok", true);
            Ok::<_, WorkError>(7)
        })
        .await;
    service.log_llm_call(&ctx, "m", 1, 1, 1.0, None).await;
    service.log_chat_message(&ctx, ChatRole::User, "hello", None).await;
    service
        .log_document_event("doc", Some(&ctx), "parsed", EventStatus::Completed, None)
        .await;
    service.end_trace(&ctx, TraceStatus::Completed, None).await;
    service.flush().await;
    (ctx, result)
}

#[tokio::test]
#[traced_test]
async fn test_erroring_provider_is_absorbed() {
    let (_, store) = store();
    let service = ObservabilityService::builder()
        .provider(BrokenProvider::new("flaky", Behaviour::Fail))
        .provider(store.clone())
        .build()
        .unwrap();

    let (ctx, result) = exercise(&service).await;

    assert_eq!(result.unwrap(), 7);
    assert!(ctx.db_trace_id.is_some());
    let trace = store.fetch_trace(&ctx.trace_id).await.unwrap().unwrap();
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(store.fetch_spans(&ctx.trace_id).await.unwrap().len(), 1);
    assert!(logs_contain("Observability provider call failed"));
    assert!(logs_contain("connection reset"));
}

#[tokio::test]
#[traced_test]
async fn test_panicking_provider_is_absorbed() {
    let (_, store) = store();
    let service = ObservabilityService::builder()
        .provider(store.clone())
        .provider(BrokenProvider::new("explosive", Behaviour::Panic))
        .build()
        .unwrap();

    let (ctx, result) = exercise(&service).await;

    assert_eq!(result.unwrap(), 7);
    let spans = store.fetch_spans(&ctx.trace_id).await.unwrap();
    assert_eq!(spans[0].status, SpanStatus::Completed);
    assert!(logs_contain("Observability provider panicked"));
}

#[tokio::test]
#[traced_test]
async fn test_hanging_provider_times_out() {
    let (_, store) = store();
    let service = ObservabilityService::builder()
        .provider(store.clone())
        .provider(BrokenProvider::new("slow", Behaviour::Hang))
        .service_config(fast_timeout())
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let (ctx, result) = exercise(&service).await;

    assert_eq!(result.unwrap(), 7);
    // eight fan-outs, each bounded by the 50 ms timeout
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(store.fetch_trace(&ctx.trace_id).await.unwrap().is_some());
    assert!(logs_contain("Observability provider call timed out"));
}

#[tokio::test]
async fn test_application_error_still_propagates_when_providers_fail() {
    let service = ObservabilityService::builder()
        .provider(BrokenProvider::new("flaky", Behaviour::Fail))
        .build()
        .unwrap();

    let ctx = service.start_trace("t", "test", None, None, None).await;
    assert!(ctx.db_trace_id.is_none());
    assert_eq!(ctx.primary_trace_id(), ctx.trace_id);

    let result: Result<(), WorkError> = service
        .span(&ctx, "work", "test", |scope| async move {
            assert_eq!(scope.primary_span_id(), scope.context().span_id);
            Err(WorkError)
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_store_outage_does_not_affect_caller() {
    let (db, store) = store();
    db.set_unavailable(true);
    let service = ObservabilityService::builder().provider(store).build().unwrap();

    let (ctx, result) = exercise(&service).await;
    assert_eq!(result.unwrap(), 7);
    assert!(ctx.db_trace_id.is_none());
    assert_eq!(ctx.trace_id.len(), 32);
}

#[tokio::test]
async fn test_disabled_provider_is_never_called() {
    let (_, store) = store();
    let service = ObservabilityService::builder()
        .provider(store.clone())
        .provider(Arc::new(DisabledProvider))
        .build()
        .unwrap();

    let (ctx, result) = exercise(&service).await;
    assert_eq!(result.unwrap(), 7);
    assert!(store.fetch_trace(&ctx.trace_id).await.unwrap().is_some());
    service.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_span_is_recorded() {
    let (_, store) = store();
    let service = Arc::new(ObservabilityService::builder().provider(store.clone()).build().unwrap());
    let ctx = service.start_trace("cancel", "test", None, None, None).await;

    let task = {
        let service = service.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            service
                .span(&ctx, "slow", "test", |_| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, WorkError>(())
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let mut spans = Vec::new();
    for _ in 0..50 {
        spans = store.fetch_spans(&ctx.trace_id).await.unwrap();
        if spans.first().is_some_and(|s| s.status != SpanStatus::InProgress) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, SpanStatus::Failed);
    assert_eq!(spans[0].error_type.as_deref(), Some("Cancelled"));
    assert!(spans[0].duration_ms.unwrap() >= 40.0);
}
