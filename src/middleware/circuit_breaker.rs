//! Circuit breaker for outbound telemetry calls
//!
//! Guards the analytics ingestion client so that an unreachable endpoint is
//! not hit on every span while it is down.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted
//! - **Open**: calls are rejected immediately until `open_duration` elapses
//! - **HalfOpen**: one trial call at a time decides between Closed and Open;
//!   other callers are rejected while it runs
//!
//! # Usage
//!
//! ```rust
//! use kms_observability::middleware::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let result = breaker.call(|| async { Ok::<_, String>("sent") }).await;
//! assert_eq!(result.unwrap(), "sent");
//! # }
//! ```

use futures::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Upper bound for a single guarded call
    pub call_timeout: Duration,
    /// How long the circuit stays open before a trial call
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            call_timeout: Duration::from_secs(3),
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Start of the HalfOpen trial. A trial older than `call_timeout` was
    /// abandoned by its caller and no longer blocks a new one.
    trial_started: Option<Instant>,
    rejected: u64,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started: None,
            rejected: 0,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        debug!(
            failure_threshold = config.failure_threshold,
            call_timeout_ms = config.call_timeout.as_millis() as u64,
            open_duration_ms = config.open_duration.as_millis() as u64,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: RwLock::new(BreakerState::default()),
        }
    }

    /// Run `f` unless the circuit is open.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.admit().await {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Circuit breaker: guarded call failed");
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
            Err(_) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Timeout)
            }
        }
    }

    async fn admit(&self) -> bool {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let trial_running = state
                    .trial_started
                    .is_some_and(|started| started.elapsed() < self.config.call_timeout);
                if trial_running {
                    state.rejected += 1;
                    false
                } else {
                    state.trial_started = Some(Instant::now());
                    true
                }
            }
            CircuitState::Open => {
                let cooled_down = state
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.open_duration);
                if cooled_down {
                    info!("Circuit breaker: transitioning to HALF-OPEN");
                    state.state = CircuitState::HalfOpen;
                    state.trial_started = Some(Instant::now());
                    true
                } else {
                    state.rejected += 1;
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        if state.state != CircuitState::Closed {
            info!(previous_state = %state.state, "Circuit breaker: transitioning to CLOSED");
        }
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_started = None;
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.consecutive_failures += 1;
        state.trial_started = None;

        let should_open = match state.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            warn!(
                previous_state = %state.state,
                failures = state.consecutive_failures,
                "Circuit breaker: transitioning to OPEN"
            );
            state.state = CircuitState::Open;
            state.opened_at = Some(Instant::now());
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    /// Calls rejected while open since creation
    pub async fn rejected_calls(&self) -> u64 {
        self.state.read().await.rejected
    }
}
