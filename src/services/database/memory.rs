use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

use crate::services::database::{DatabaseError, DatabaseHealth, DatabaseService, Query, SortOrder};

/// In-process store for tests and embedding without SurrealDB
///
/// Records are kept per collection in key order. `set_unavailable(true)`
/// makes every call fail, which is how tests simulate an outage.
#[derive(Default)]
pub struct InMemoryDatabase {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    unavailable: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn check_available(&self) -> Result<(), DatabaseError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            Err(DatabaseError::Unavailable("in-memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

fn merge_into(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge_into(target.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn health_check(&self) -> DatabaseHealth {
        match self.check_available() {
            Ok(()) => DatabaseHealth::Healthy,
            Err(e) => DatabaseHealth::Unhealthy(e.to_string()),
        }
    }

    async fn insert(&self, collection: &str, id: &str, data: Value) -> Result<(), DatabaseError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        if records.contains_key(id) {
            return Err(DatabaseError::QueryFailed(format!(
                "Record {}:{} already exists",
                collection, id
            )));
        }
        records.insert(id.to_string(), data);
        Ok(())
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, DatabaseError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|records| records.get(id)).cloned())
    }

    async fn merge(&self, collection: &str, id: &str, data: Value) -> Result<(), DatabaseError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| DatabaseError::NotFound(format!("{}:{}", collection, id)))?;
        merge_into(record, data);
        Ok(())
    }

    async fn query(&self, collection: &str, query: Query) -> Result<Vec<Value>, DatabaseError> {
        self.check_available()?;
        query.validate()?;

        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<Value> = records
            .values()
            .filter(|row| {
                query
                    .filter
                    .iter()
                    .all(|(field, expected)| row.get(field) == Some(expected))
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|(field, order)| {
                    let ordering = compare_values(a.get(field), b.get(field));
                    match order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}
