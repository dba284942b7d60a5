use async_trait::async_trait;
use serde_json::{Map, Value};
use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;

use crate::config::DatabaseSettings;
use crate::services::database::{DatabaseError, DatabaseHealth, DatabaseService, Query};

/// SurrealDB implementation of DatabaseService
///
/// Connects through the `any` engine so the same code serves an embedded
/// `mem://` store and a remote `ws://` server.
pub struct SurrealDatabase {
    client: Surreal<Any>,
    endpoint: String,
}

impl SurrealDatabase {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DatabaseError> {
        let client = any::connect(settings.endpoint.as_str())
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to create client: {}", e)))?;

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            client
                .signin(Root {
                    username: username.as_str(),
                    password: password.as_str(),
                })
                .await
                .map_err(|e| DatabaseError::ConnectionFailed(format!("Sign-in failed: {}", e)))?;
        }

        client
            .use_ns(&settings.namespace)
            .use_db(&settings.database)
            .await
            .map_err(|e| {
                DatabaseError::ConnectionFailed(format!("Failed to use namespace/database: {}", e))
            })?;

        tracing::info!(
            endpoint = %settings.endpoint,
            namespace = %settings.namespace,
            database = %settings.database,
            "Connected to SurrealDB"
        );

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn query_failed(operation: &str, e: surrealdb::Error) -> DatabaseError {
    DatabaseError::QueryFailed(format!("{} operation failed: {}", operation, e))
}

#[async_trait]
impl DatabaseService for SurrealDatabase {
    async fn health_check(&self) -> DatabaseHealth {
        match self.client.health().await {
            Ok(()) => DatabaseHealth::Healthy,
            Err(e) => DatabaseHealth::Unhealthy(e.to_string()),
        }
    }

    async fn insert(&self, collection: &str, id: &str, data: Value) -> Result<(), DatabaseError> {
        self.client
            .query("CREATE type::thing($tb, $id) CONTENT $data RETURN NONE")
            .bind(("tb", collection.to_string()))
            .bind(("id", id.to_string()))
            .bind(("data", data))
            .await
            .and_then(|response| response.check())
            .map_err(|e| query_failed("Create", e))?;
        Ok(())
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, DatabaseError> {
        let mut response = self
            .client
            .query("SELECT * OMIT id FROM type::thing($tb, $id)")
            .bind(("tb", collection.to_string()))
            .bind(("id", id.to_string()))
            .await
            .map_err(|e| query_failed("Read", e))?;

        let rows: Vec<Value> = response
            .take(0)
            .map_err(|e| DatabaseError::Serialization(format!("Failed to parse read response: {}", e)))?;

        Ok(rows.into_iter().next())
    }

    async fn merge(&self, collection: &str, id: &str, data: Value) -> Result<(), DatabaseError> {
        // UPDATE never creates, so an empty result means the record is missing
        let mut response = self
            .client
            .query("UPDATE type::thing($tb, $id) MERGE $data RETURN VALUE meta::id(id)")
            .bind(("tb", collection.to_string()))
            .bind(("id", id.to_string()))
            .bind(("data", data))
            .await
            .map_err(|e| query_failed("Update", e))?;

        let updated: Vec<Value> = response
            .take(0)
            .map_err(|e| DatabaseError::Serialization(format!("Failed to parse update response: {}", e)))?;

        if updated.is_empty() {
            return Err(DatabaseError::NotFound(format!("{}:{}", collection, id)));
        }
        Ok(())
    }

    async fn query(&self, collection: &str, query: Query) -> Result<Vec<Value>, DatabaseError> {
        query.validate()?;

        let mut statement = String::from("SELECT * OMIT id FROM type::table($tb)");
        let mut vars = Map::new();
        vars.insert("tb".to_string(), Value::String(collection.to_string()));

        if !query.filter.is_empty() {
            let conditions: Vec<String> = query
                .filter
                .into_iter()
                .enumerate()
                .map(|(i, (field, value))| {
                    let var = format!("f{}", i);
                    let condition = format!("{} = ${}", field, var);
                    vars.insert(var, value);
                    condition
                })
                .collect();
            statement.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }

        if !query.sort.is_empty() {
            let order: Vec<String> = query
                .sort
                .iter()
                .map(|(field, order)| format!("{} {}", field, order.as_sql()))
                .collect();
            statement.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }

        if let Some(limit) = query.limit {
            statement.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = query.offset {
            statement.push_str(&format!(" START {}", offset));
        }

        let mut response = self
            .client
            .query(statement)
            .bind(vars)
            .await
            .map_err(|e| query_failed("Query", e))?;

        response
            .take(0)
            .map_err(|e| DatabaseError::Serialization(format!("Failed to parse query response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::SortOrder;
    use serde_json::json;

    async fn memory_db() -> SurrealDatabase {
        SurrealDatabase::connect(&DatabaseSettings::default())
            .await
            .expect("in-memory SurrealDB should start")
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let db = memory_db().await;
        assert_eq!(db.endpoint(), "mem://");
        assert_eq!(db.health_check().await, DatabaseHealth::Healthy);
    }

    #[tokio::test]
    async fn test_insert_read_merge() {
        let db = memory_db().await;
        db.insert("spans", "t1-s1", json!({"name": "parse", "status": "in_progress"}))
            .await
            .unwrap();

        let row = db.read("spans", "t1-s1").await.unwrap().unwrap();
        assert_eq!(row["name"], "parse");

        db.merge("spans", "t1-s1", json!({"status": "completed", "duration_ms": 12.5}))
            .await
            .unwrap();
        let row = db.read("spans", "t1-s1").await.unwrap().unwrap();
        assert_eq!(row["status"], "completed");
        assert_eq!(row["name"], "parse");

        assert!(db.read("spans", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_missing_is_not_found() {
        let db = memory_db().await;
        let result = db.merge("traces", "nope", json!({"status": "failed"})).await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_query_filter_and_sort() {
        let db = memory_db().await;
        for (i, trace) in ["a", "b", "a"].iter().enumerate() {
            db.create("llm_calls", json!({"trace_id": trace, "seq": i}))
                .await
                .unwrap();
        }

        let rows = db
            .query(
                "llm_calls",
                Query::new().filter("trace_id", "a").sort("seq", SortOrder::Desc),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["seq"], 2);
        assert_eq!(rows[1]["seq"], 0);
    }
}
