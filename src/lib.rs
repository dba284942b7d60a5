pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod observability;
pub mod services;

pub use config::{ObservabilityConfig, load_config};
pub use error::{ObservabilityError, ProviderError};
pub use observability::{
    ObservabilityProvider, ObservabilityService, SpanScope, TraceContext, TraceStatus,
};
