use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub mod adapter;
pub mod memory;
pub mod models;
pub mod provider;

pub use adapter::SurrealDatabase;
pub use memory::InMemoryDatabase;
pub use models::{ChatMessageRecord, DocumentEventRecord, LlmCallRecord, SpanRecord, TraceRecord};
pub use provider::{DatabaseProvider, collections};

/// Database health status
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseHealth {
    Healthy,
    Unhealthy(String),
}

/// Query structure for collection reads
///
/// Filters are equality matches on top-level fields, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Vec<(String, Value)>,
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push((field.into(), value.into()));
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Field names end up in query text, so only plain identifiers are accepted.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        self.filter
            .iter()
            .map(|(field, _)| field)
            .chain(self.sort.iter().map(|(field, _)| field))
            .find(|field| !is_identifier(field))
            .map_or(Ok(()), |field| {
                Err(DatabaseError::QueryFailed(format!("Invalid field name: {field}")))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database service unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

/// Storage backend behind the durable provider
///
/// # Example
/// ```no_run
/// # use kms_observability::services::database::{DatabaseService, InMemoryDatabase, Query};
/// # use serde_json::json;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = InMemoryDatabase::new();
///
/// db.insert("traces", "4bf92f35", json!({"name": "chat.generate"})).await?;
/// let row = db.read("traces", "4bf92f35").await?;
///
/// let rows = db.query("traces", Query::new().filter("name", "chat.generate")).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Check database health
    async fn health_check(&self) -> DatabaseHealth;

    /// Insert a record under an explicit key
    async fn insert(&self, collection: &str, id: &str, data: Value) -> Result<(), DatabaseError>;

    /// Insert a record under a generated key and return the key
    async fn create(&self, collection: &str, data: Value) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        self.insert(collection, &id, data).await?;
        Ok(id)
    }

    /// Read a record by key
    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, DatabaseError>;

    /// Merge `data` into an existing record; `NotFound` if there is none
    async fn merge(&self, collection: &str, id: &str, data: Value) -> Result<(), DatabaseError>;

    /// Query records in a collection
    async fn query(&self, collection: &str, query: Query) -> Result<Vec<Value>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let query = Query::new()
            .filter("trace_id", "abc")
            .sort("started_at_us", SortOrder::Asc)
            .limit(10)
            .offset(5);

        assert_eq!(query.filter, vec![("trace_id".to_string(), Value::from("abc"))]);
        assert_eq!(query.sort, vec![("started_at_us".to_string(), SortOrder::Asc)]);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_query_rejects_non_identifier_fields() {
        let query = Query::new().filter("name = 'x' OR true", 1);
        assert!(matches!(query.validate(), Err(DatabaseError::QueryFailed(_))));

        let query = Query::new().sort("1st", SortOrder::Desc);
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_database_error_types() {
        let error = DatabaseError::ConnectionFailed("test".to_string());
        assert!(error.to_string().contains("Connection failed"));

        let error = DatabaseError::QueryFailed("test".to_string());
        assert!(error.to_string().contains("Query execution failed"));

        let error = DatabaseError::NotFound("spans:1".to_string());
        assert!(error.to_string().contains("Record not found"));
    }
}
