//! Concurrent fan-out with a per-provider fail-safe boundary
//!
//! Each provider call is wrapped on its own: errors, panics and timeouts are
//! logged and turned into an empty outcome. Nothing escapes to the caller and
//! one provider's failure never cancels another provider's call.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::metrics::{CallOutcome, record_provider_call};
use super::provider::ObservabilityProvider;
use crate::error::ProviderError;

pub type ProviderList = Arc<[Arc<dyn ObservabilityProvider>]>;

/// Identifiers attached to every log line a fan-out emits.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallTarget<'a> {
    pub trace_id: Option<&'a str>,
    pub span_id: Option<&'a str>,
}

impl<'a> CallTarget<'a> {
    pub fn trace(trace_id: &'a str) -> Self {
        Self {
            trace_id: Some(trace_id),
            span_id: None,
        }
    }

    pub fn span(trace_id: &'a str, span_id: &'a str) -> Self {
        Self {
            trace_id: Some(trace_id),
            span_id: Some(span_id),
        }
    }
}

/// Result of one provider's call inside a fan-out.
#[derive(Debug)]
pub struct ProviderOutcome<'a, T> {
    pub provider: &'a str,
    pub primary: bool,
    /// `None` when the call failed, panicked or timed out
    pub value: Option<T>,
}

/// Run `call` against every enabled provider concurrently.
///
/// Total latency is bounded by the slowest provider, and each call by
/// `timeout`. Disabled providers are skipped without being touched.
pub async fn fan_out<'a, T, F>(
    providers: &'a [Arc<dyn ObservabilityProvider>],
    timeout: Duration,
    operation: &'static str,
    target: CallTarget<'_>,
    call: F,
) -> Vec<ProviderOutcome<'a, T>>
where
    F: Fn(&'a dyn ObservabilityProvider) -> BoxFuture<'a, Result<T, ProviderError>>,
{
    let trace_id = target.trace_id.unwrap_or("-");
    let span_id = target.span_id.unwrap_or("-");

    let calls = providers
        .iter()
        .filter(|provider| provider.is_enabled())
        .map(|provider| {
            let name = provider.name();
            let guarded = AssertUnwindSafe(call(&**provider)).catch_unwind();

            async move {
                let started = Instant::now();
                let (value, outcome) = match tokio::time::timeout(timeout, guarded).await {
                    Ok(Ok(Ok(value))) => (Some(value), CallOutcome::Ok),
                    Ok(Ok(Err(error))) => {
                        tracing::warn!(
                            provider = name,
                            operation,
                            trace_id,
                            span_id,
                            error = %error,
                            "Observability provider call failed"
                        );
                        (None, CallOutcome::Error)
                    }
                    Ok(Err(panic)) => {
                        tracing::error!(
                            provider = name,
                            operation,
                            trace_id,
                            span_id,
                            panic = panic_message(panic.as_ref()),
                            "Observability provider panicked"
                        );
                        (None, CallOutcome::Panic)
                    }
                    Err(_) => {
                        tracing::warn!(
                            provider = name,
                            operation,
                            trace_id,
                            span_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Observability provider call timed out"
                        );
                        (None, CallOutcome::Timeout)
                    }
                };

                record_provider_call(name, operation, outcome, started.elapsed());

                ProviderOutcome {
                    provider: name,
                    primary: provider.is_primary(),
                    value,
                }
            }
        });

    join_all(calls).await
}

/// The handle returned by the primary provider, if it returned one.
pub fn primary_handle(outcomes: Vec<ProviderOutcome<'_, Option<String>>>) -> Option<String> {
    outcomes
        .into_iter()
        .find(|outcome| outcome.primary)
        .and_then(|outcome| outcome.value.flatten())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
