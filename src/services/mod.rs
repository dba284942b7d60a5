pub mod analytics;
pub mod database;

pub use analytics::AnalyticsProvider;
pub use database::{DatabaseError, DatabaseHealth, DatabaseProvider, DatabaseService};
