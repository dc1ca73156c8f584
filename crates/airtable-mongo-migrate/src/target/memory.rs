//! In-memory document store.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::DocumentStore;
use crate::core::{DestId, TransformedDocument, SOURCE_ID_FIELD};
use crate::error::{MigrateError, Result};
use crate::resolve::IdTranslationEntry;

type Key = (String, String);

#[derive(Debug, Clone)]
struct Stored {
    id: DestId,
    body: Value,
}

/// Ordered in-memory collections keyed by `(source_table, source_id)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, BTreeMap<Key, Stored>>>,
    failing_ids: HashSet<String>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upsert of these source ids.
    pub fn with_failing_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Make `ping` fail, as if the server could not be reached.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.lock().get(collection).map_or(0, BTreeMap::len)
    }

    /// Stored body (including `_id`) of the document for `source_id`.
    pub fn get(&self, collection: &str, source_id: &str) -> Option<Value> {
        self.lock().get(collection).and_then(|docs| {
            docs.iter()
                .find(|((_, id), _)| id == source_id)
                .map(|(_, stored)| with_id(stored))
        })
    }

    /// All documents of a collection in key order.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .get(collection)
            .map(|docs| docs.values().map(with_id).collect())
            .unwrap_or_default()
    }

    /// Names of the collections that hold at least one document.
    pub fn collection_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<Key, Stored>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn with_id(stored: &Stored) -> Value {
    let mut body = stored.body.clone();
    if let Value::Object(map) = &mut body {
        map.insert("_id".to_string(), Value::String(stored.id.to_string()));
    }
    body
}

fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MigrateError::store("memory store is offline"));
        }
        Ok(())
    }

    async fn ensure_collection(&self, _collection: &str) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, collection: &str, doc: &TransformedDocument) -> Result<DestId> {
        if self.failing_ids.contains(&doc.source_id) {
            return Err(MigrateError::store(format!(
                "duplicate key error for {}",
                doc.source_id
            )));
        }

        let mut collections = self.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        let key = (doc.table.clone(), doc.source_id.clone());
        let id = docs
            .get(&key)
            .map(|existing| existing.id.clone())
            .unwrap_or_else(|| DestId::new(uuid::Uuid::new_v4().simple().to_string()));

        docs.insert(
            key,
            Stored {
                id: id.clone(),
                body: doc.to_json(),
            },
        );
        Ok(id)
    }

    async fn load_translations(
        &self,
        collection: &str,
        table: &str,
        label_field: Option<&str>,
    ) -> Result<Vec<IdTranslationEntry>> {
        let collections = self.lock();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(docs
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|((_, source_id), stored)| IdTranslationEntry {
                source_id: stored
                    .body
                    .get(SOURCE_ID_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or(source_id)
                    .to_string(),
                dest_id: stored.id.clone(),
                table: table.to_string(),
                label: label_field
                    .and_then(|f| stored.body.get(f))
                    .and_then(label_of),
            })
            .collect())
    }

    fn store_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldValue, SourceRecord};
    use chrono::Utc;
    use serde_json::json;

    fn doc(table: &str, source_id: &str, name: &str) -> TransformedDocument {
        let rec = SourceRecord::from_json(table, source_id, json!({}), Utc::now());
        let mut doc = TransformedDocument::new(&rec, "shared");
        doc.fields.insert("name".into(), FieldValue::Text(name.into()));
        doc
    }

    #[tokio::test]
    async fn test_upsert_replaces_not_merges() {
        let store = MemoryStore::new();
        let mut first = doc("t", "rec1", "a");
        first.fields.insert("extra".into(), FieldValue::Number(1.0));
        let id1 = store.upsert("shared", &first).await.unwrap();
        let id2 = store.upsert("shared", &doc("t", "rec1", "b")).await.unwrap();

        assert_eq!(id1, id2);
        let stored = store.get("shared", "rec1").unwrap();
        assert_eq!(stored["name"], "b");
        assert!(stored.get("extra").is_none());
        assert_eq!(stored["_id"], id1.as_str());
    }

    #[tokio::test]
    async fn test_same_source_id_in_different_tables_are_distinct() {
        let store = MemoryStore::new();
        store.upsert("shared", &doc("t1", "rec1", "a")).await.unwrap();
        store.upsert("shared", &doc("t2", "rec1", "b")).await.unwrap();
        assert_eq!(store.len("shared"), 2);
    }

    #[tokio::test]
    async fn test_load_translations_filters_by_table() {
        let store = MemoryStore::new();
        let id = store.upsert("shared", &doc("t1", "rec1", "大豆")).await.unwrap();
        store.upsert("shared", &doc("t2", "rec2", "x")).await.unwrap();

        let entries = store
            .load_translations("shared", "t1", Some("name"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_id, "rec1");
        assert_eq!(entries[0].dest_id, id);
        assert_eq!(entries[0].label.as_deref(), Some("大豆"));

        assert!(store
            .load_translations("missing", "t1", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_offline_ping_fails() {
        let store = MemoryStore::new();
        assert!(store.ping().await.is_ok());
        store.set_offline(true);
        assert!(store.ping().await.is_err());
    }
}
