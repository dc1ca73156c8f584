//! Destination document store and the idempotent writer.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::core::{DestId, TransformedDocument};
use crate::error::Result;
use crate::report::{Anomaly, AnomalyKind};
use crate::resolve::{IdTranslationEntry, InsertOutcome, SharedTranslations};

/// Trait for destination store operations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Prepare a collection: create the unique `(source_table, source_id)` index.
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    /// Insert or fully replace the document keyed by `(source_table, source_id)`.
    ///
    /// Returns the persisted document id. Replacing keeps the existing id.
    async fn upsert(&self, collection: &str, doc: &TransformedDocument) -> Result<DestId>;

    /// Read back the translation entries for every document of `table`.
    ///
    /// `label_field` names the destination field holding each record's label.
    async fn load_translations(
        &self,
        collection: &str,
        table: &str,
        label_field: Option<&str>,
    ) -> Result<Vec<IdTranslationEntry>>;

    /// Get the store type.
    fn store_type(&self) -> &str;
}

/// Outcome of writing one document.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Written {
        dest_id: DestId,
        /// Set when the store returned an id that disagrees with the
        /// translation already registered for this source id.
        conflict: Option<Anomaly>,
    },
    Failed(Anomaly),
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Idempotent writer: upserts documents and registers their translations.
#[derive(Clone)]
pub struct Writer {
    store: Arc<dyn DocumentStore>,
    translations: SharedTranslations,
}

impl Writer {
    pub fn new(store: Arc<dyn DocumentStore>, translations: SharedTranslations) -> Self {
        Self {
            store,
            translations,
        }
    }

    /// Stamp `migrated_at`, upsert and register the translation entry.
    ///
    /// Store errors never escape; they come back as a `write_failure` anomaly.
    pub async fn write(
        &self,
        doc: &mut TransformedDocument,
        display_field: Option<&str>,
    ) -> WriteOutcome {
        doc.migrated_at = Some(Utc::now());

        let dest_id = match self.store.upsert(&doc.collection, doc).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "{}/{}: write to {} failed: {}",
                    doc.table, doc.source_id, doc.collection, e
                );
                return WriteOutcome::Failed(Anomaly::new(
                    AnomalyKind::WriteFailure,
                    &doc.table,
                    &doc.source_id,
                    None,
                    e.to_string(),
                ));
            }
        };

        let entry = IdTranslationEntry {
            source_id: doc.source_id.clone(),
            dest_id: dest_id.clone(),
            table: doc.table.clone(),
            label: doc.label(display_field),
        };

        let conflict = match self.translations.write().await.insert(entry) {
            InsertOutcome::Inserted | InsertOutcome::AlreadyPresent => None,
            InsertOutcome::Conflict { existing } => {
                debug!(
                    "{}/{}: store returned {} but {} is registered",
                    doc.table, doc.source_id, dest_id, existing
                );
                Some(Anomaly::new(
                    AnomalyKind::TranslationConflict,
                    &doc.table,
                    &doc.source_id,
                    None,
                    format!("kept {}, store returned {}", existing, dest_id),
                ))
            }
        };

        WriteOutcome::Written { dest_id, conflict }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldValue, SourceRecord};
    use crate::resolve::IdTranslationTable;
    use serde_json::json;

    fn doc(source_id: &str, name: &str) -> TransformedDocument {
        let rec = SourceRecord::from_json("作物マスター", source_id, json!({}), Utc::now());
        let mut doc = TransformedDocument::new(&rec, "crop_master");
        doc.fields.insert("name".into(), FieldValue::Text(name.into()));
        doc
    }

    #[tokio::test]
    async fn test_write_registers_translation() {
        let store = Arc::new(MemoryStore::new());
        let translations = IdTranslationTable::shared();
        let writer = Writer::new(store.clone(), translations.clone());

        let mut d = doc("recA", "大豆");
        let outcome = writer.write(&mut d, Some("name")).await;

        let WriteOutcome::Written { dest_id, conflict } = outcome else {
            panic!("expected a write");
        };
        assert!(conflict.is_none());
        assert!(d.migrated_at.is_some());

        let table = translations.read().await;
        let entry = table.get("recA").unwrap();
        assert_eq!(entry.dest_id, dest_id);
        assert_eq!(entry.label.as_deref(), Some("大豆"));
        assert_eq!(store.len("crop_master"), 1);
    }

    #[tokio::test]
    async fn test_rewrite_keeps_id() {
        let store = Arc::new(MemoryStore::new());
        let writer = Writer::new(store.clone(), IdTranslationTable::shared());

        let first = writer.write(&mut doc("recA", "大豆"), None).await;
        let second = writer.write(&mut doc("recA", "黒大豆"), None).await;

        match (first, second) {
            (
                WriteOutcome::Written { dest_id: a, .. },
                WriteOutcome::Written {
                    dest_id: b,
                    conflict,
                },
            ) => {
                assert_eq!(a, b);
                assert!(conflict.is_none());
            }
            other => panic!("unexpected outcomes: {:?}", other),
        }
        assert_eq!(store.len("crop_master"), 1);
        assert_eq!(store.get("crop_master", "recA").unwrap()["name"], "黒大豆");
    }

    #[tokio::test]
    async fn test_store_failure_becomes_anomaly() {
        let store = Arc::new(MemoryStore::new().with_failing_ids(["recBad"]));
        let translations = IdTranslationTable::shared();
        let writer = Writer::new(store, translations.clone());

        let outcome = writer.write(&mut doc("recBad", "x"), None).await;
        let WriteOutcome::Failed(anomaly) = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(anomaly.kind, AnomalyKind::WriteFailure);
        assert_eq!(anomaly.source_id, "recBad");
        assert!(translations.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_id_reported() {
        let store = Arc::new(MemoryStore::new());
        let translations = IdTranslationTable::shared();
        translations.write().await.insert(IdTranslationEntry {
            source_id: "recA".into(),
            dest_id: DestId::from("stale"),
            table: "作物マスター".into(),
            label: None,
        });
        let writer = Writer::new(store, translations.clone());

        let outcome = writer.write(&mut doc("recA", "大豆"), None).await;
        let WriteOutcome::Written { conflict, .. } = outcome else {
            panic!("expected a write");
        };
        assert_eq!(conflict.unwrap().kind, AnomalyKind::TranslationConflict);
        assert_eq!(
            translations.read().await.dest_id("recA"),
            Some(&DestId::from("stale"))
        );
    }
}
