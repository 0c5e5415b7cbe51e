use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{merge_into, DocumentStore, Query, StoreResult};

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        let mut guard = self.collections.write().await;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn create_if_absent(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool> {
        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(id.to_string(), doc);
        Ok(true)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let guard = self.collections.read().await;
        Ok(guard.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn list(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let guard = self.collections.read().await;
        let matching: Vec<Value> = guard
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| query.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(query.finish(matching))
    }

    async fn count(&self, collection: &str, query: &Query) -> StoreResult<usize> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| docs.values().filter(|doc| query.matches(doc)).count())
            .unwrap_or(0))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>> {
        let mut guard = self.collections.write().await;
        let Some(doc) = guard.get_mut(collection).and_then(|docs| docs.get_mut(id)) else {
            return Ok(None);
        };
        merge_into(doc, patch);
        Ok(Some(doc.clone()))
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Query,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>> {
        let mut guard = self.collections.write().await;
        let Some(doc) = guard.get_mut(collection).and_then(|docs| docs.get_mut(id)) else {
            return Ok(None);
        };
        if !expected.matches(doc) {
            return Ok(None);
        }
        merge_into(doc, patch);
        Ok(Some(doc.clone()))
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<Value> {
        let mut guard = self.collections.write().await;
        let doc = guard
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        merge_into(doc, patch);
        Ok(doc.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let mut guard = self.collections.write().await;
        Ok(guard
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{patch, SortDirection};
    use serde_json::json;

    #[tokio::test]
    async fn create_if_absent_never_rewrites() {
        let store = MemoryDocumentStore::new();
        assert!(store
            .create_if_absent("messages", "m1", json!({"body": "first"}))
            .await
            .unwrap());
        assert!(!store
            .create_if_absent("messages", "m1", json!({"body": "second"}))
            .await
            .unwrap());

        let stored = store.get("messages", "m1").await.unwrap().unwrap();
        assert_eq!(stored["body"], "first");
        assert_eq!(store.count("messages", &Query::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let store = MemoryDocumentStore::new();
        for (id, source, at) in [
            ("1", "a", "2024-01-01T10:00:00Z"),
            ("2", "b", "2024-01-01T11:00:00Z"),
            ("3", "a", "2024-01-01T12:00:00Z"),
        ] {
            store
                .put("messages", id, json!({"id": id, "source_id": source, "send_time": at}))
                .await
                .unwrap();
        }

        let query = Query::new()
            .filter("source_id", "a")
            .order_by("send_time", SortDirection::Desc);
        let ids: Vec<String> = store
            .list("messages", &query)
            .await
            .unwrap()
            .into_iter()
            .map(|doc| doc["id"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(ids, vec!["3", "1"]);
    }

    #[tokio::test]
    async fn update_only_touches_existing_documents() {
        let store = MemoryDocumentStore::new();
        let missing = store
            .update("sources", "nope", patch(json!({"label": "x"})))
            .await
            .unwrap();
        assert!(missing.is_none());

        store
            .put("sources", "s1", json!({"label": "old", "color": "#fff"}))
            .await
            .unwrap();
        let updated = store
            .update("sources", "s1", patch(json!({"label": "new"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated, json!({"label": "new", "color": "#fff"}));
    }

    #[tokio::test]
    async fn conditional_update_skips_changed_documents() {
        let store = MemoryDocumentStore::new();
        store
            .put("jobs", "j1", json!({"status": "queued", "attempts": 0}))
            .await
            .unwrap();
        let queued = Query::new().filter("status", "queued");

        let claimed = store
            .update_if("jobs", "j1", &queued, patch(json!({"status": "processing"})))
            .await
            .unwrap();
        assert_eq!(claimed.unwrap()["status"], "processing");

        let again = store
            .update_if("jobs", "j1", &queued, patch(json!({"attempts": 9})))
            .await
            .unwrap();
        assert!(again.is_none());
        let stored = store.get("jobs", "j1").await.unwrap().unwrap();
        assert_eq!(stored["attempts"], 0);

        assert!(store
            .update_if("jobs", "missing", &queued, patch(json!({})))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn merge_creates_missing_documents() {
        let store = MemoryDocumentStore::new();
        let created = store
            .merge("sync_status", "s1", patch(json!({"is_syncing": true})))
            .await
            .unwrap();
        assert_eq!(created, json!({"is_syncing": true}));
        assert!(store.delete("sync_status", "s1").await.unwrap());
        assert!(!store.delete("sync_status", "s1").await.unwrap());
    }
}
