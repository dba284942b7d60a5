//! External analytics provider
//!
//! Optional. Without complete credentials the provider is disabled and never
//! builds an HTTP client.

pub mod client;
pub mod provider;

pub use client::{INGESTION_PATH, IngestionClient, IngestionEvent};
pub use provider::AnalyticsProvider;
