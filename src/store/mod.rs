//! Collection-scoped document persistence.
//!
//! Every entity is stored as a JSON document addressed by `(collection, id)`.
//! Queries are AND-only equality filters with at most one sort field, which
//! is all the API and the background loops need.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn filter_opt<V: Into<Value>>(self, field: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.filter(field, value),
            None => self,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    /// The filters as a single object, suitable for jsonb containment.
    pub fn containment(&self) -> Value {
        let map: Map<String, Value> = self.filters.iter().cloned().collect();
        Value::Object(map)
    }

    /// Sorts and paginates documents that already passed the filters.
    pub fn finish(&self, mut docs: Vec<Value>) -> Vec<Value> {
        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let ordering = compare_values(a.get(field), b.get(field));
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let iter = docs.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Creates or replaces a document.
    async fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;

    /// Stores the document only when no document with this id exists.
    /// Returns whether a write happened.
    async fn create_if_absent(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool>;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    async fn list(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>>;

    /// Counts documents matching the query filters; ordering and paging are ignored.
    async fn count(&self, collection: &str, query: &Query) -> StoreResult<usize>;

    /// Shallow-merges `patch` into an existing document. `None` when absent.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>>;

    /// Like `update`, but only while the stored document still matches the
    /// query filters. `None` when absent or when another writer got there first.
    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Query,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>>;

    /// Shallow-merges `patch`, creating the document when it does not exist.
    async fn merge(&self, collection: &str, id: &str, patch: Map<String, Value>)
        -> StoreResult<Value>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;
}

pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

pub async fn fetch<T: Record>(store: &dyn DocumentStore, id: &str) -> StoreResult<Option<T>> {
    match store.get(T::COLLECTION, id).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

pub async fn save<T: Record>(store: &dyn DocumentStore, record: &T) -> StoreResult<()> {
    let doc = serde_json::to_value(record)?;
    store.put(T::COLLECTION, record.id(), doc).await
}

pub async fn save_if_absent<T: Record>(store: &dyn DocumentStore, record: &T) -> StoreResult<bool> {
    let doc = serde_json::to_value(record)?;
    store.create_if_absent(T::COLLECTION, record.id(), doc).await
}

pub async fn list_as<T: Record>(store: &dyn DocumentStore, query: &Query) -> StoreResult<Vec<T>> {
    store
        .list(T::COLLECTION, query)
        .await?
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
        .collect()
}

pub async fn update_as<T: Record>(
    store: &dyn DocumentStore,
    id: &str,
    patch: Map<String, Value>,
) -> StoreResult<Option<T>> {
    match store.update(T::COLLECTION, id, patch).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

/// Turns a `json!({...})` literal into a patch map. Non-objects yield an empty patch.
pub fn patch(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) fn merge_into(doc: &mut Value, patch: Map<String, Value>) {
    match doc {
        Value::Object(map) => map.extend(patch),
        other => *other = Value::Object(patch),
    }
}

/// Orders JSON values: missing/null first, numbers numerically, RFC 3339
/// timestamps as instants, remaining strings lexically.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
