//! Link resolution over the run-scoped id-translation table.
//!
//! Resolution happens in two passes. Pass one runs as each record is written
//! and substitutes every link whose target is already known, leaving
//! placeholders for the rest. Pass two runs once every table has finished and
//! turns the remaining placeholders into destination ids or nulls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::core::{DestId, FieldValue, LinkSlot, TransformedDocument};
use crate::report::{Anomaly, AnomalyKind};

/// One source id's destination identity. Never mutated once inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTranslationEntry {
    pub source_id: String,
    pub dest_id: DestId,
    /// Source table the record belongs to.
    pub table: String,
    /// Display label used by `linked_display` fields in other tables.
    pub label: Option<String>,
}

/// Result of offering an entry to the translation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Same destination id already registered.
    AlreadyPresent,
    /// A different destination id is registered; the existing one is kept.
    Conflict { existing: DestId },
}

/// Append-only map from source id to destination identity.
#[derive(Debug, Default)]
pub struct IdTranslationTable {
    entries: HashMap<String, IdTranslationEntry>,
}

/// Translation table shared by every table migration in one run.
pub type SharedTranslations = Arc<RwLock<IdTranslationTable>>;

impl IdTranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTranslations {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Insert an entry. The first writer for a source id wins.
    pub fn insert(&mut self, entry: IdTranslationEntry) -> InsertOutcome {
        match self.entries.get(&entry.source_id) {
            Some(existing) if existing.dest_id == entry.dest_id => InsertOutcome::AlreadyPresent,
            Some(existing) => InsertOutcome::Conflict {
                existing: existing.dest_id.clone(),
            },
            None => {
                self.entries.insert(entry.source_id.clone(), entry);
                InsertOutcome::Inserted
            }
        }
    }

    pub fn get(&self, source_id: &str) -> Option<&IdTranslationEntry> {
        self.entries.get(source_id)
    }

    pub fn dest_id(&self, source_id: &str) -> Option<&DestId> {
        self.entries.get(source_id).map(|e| &e.dest_id)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.entries.contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve the link fields of a document in place.
///
/// Placeholders still unknown are reported as `unresolved_link` on the first
/// pass; on the final pass they become `Missing` and are reported as
/// `permanently_unresolved_link`.
fn resolve_slots(
    doc: &mut TransformedDocument,
    translations: &IdTranslationTable,
    final_pass: bool,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let (table, source_id) = (&doc.table, &doc.source_id);

    for (field, value) in doc.fields.iter_mut() {
        let FieldValue::Links(slots) = value else {
            continue;
        };
        for slot in slots.iter_mut() {
            let LinkSlot::Pending {
                table: target,
                source_id: target_id,
            } = slot
            else {
                continue;
            };

            if let Some(dest) = translations.dest_id(target_id) {
                *slot = LinkSlot::Resolved(dest.clone());
                continue;
            }

            let (kind, reason) = if final_pass {
                (
                    AnomalyKind::PermanentlyUnresolvedLink,
                    format!("{} in {} was never migrated", target_id, target),
                )
            } else {
                (
                    AnomalyKind::UnresolvedLink,
                    format!("{} in {} not migrated yet", target_id, target),
                )
            };
            anomalies.push(Anomaly::new(kind, table, source_id, Some(field.as_str()), reason));

            if final_pass {
                *slot = LinkSlot::Missing;
            }
        }
    }

    anomalies
}

/// Evaluate pending `linked_display` fields from the linked records' labels.
///
/// A field is filled once every linked id is known. On the final pass it is
/// filled from whatever labels are available (null when none are).
pub fn resolve_computed(
    doc: &mut TransformedDocument,
    translations: &IdTranslationTable,
    final_pass: bool,
) {
    let pending = std::mem::take(&mut doc.pending);
    for computed in pending {
        let complete = computed
            .source_ids
            .iter()
            .all(|id| translations.contains(id));
        if !complete && !final_pass {
            doc.pending.push(computed);
            continue;
        }

        let labels: Vec<&str> = computed
            .source_ids
            .iter()
            .filter_map(|id| translations.get(id))
            .filter_map(|e| e.label.as_deref())
            .collect();
        let value = if labels.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(labels.join(", "))
        };
        doc.fields.insert(computed.dest_field, value);
    }
}

/// Link resolver bound to one run's translation table.
#[derive(Clone)]
pub struct LinkResolver {
    translations: SharedTranslations,
}

impl LinkResolver {
    pub fn new(translations: SharedTranslations) -> Self {
        Self { translations }
    }

    pub fn translations(&self) -> &SharedTranslations {
        &self.translations
    }

    /// Pass one: substitute known links, keep placeholders for the rest.
    pub async fn resolve_links(&self, doc: &mut TransformedDocument) -> Vec<Anomaly> {
        let translations = self.translations.read().await;
        let anomalies = resolve_slots(doc, &translations, false);
        resolve_computed(doc, &translations, false);
        anomalies
    }

    /// Pass two: resolve against the complete table; leftovers become null.
    pub async fn finalize(&self, doc: &mut TransformedDocument) -> Vec<Anomaly> {
        let translations = self.translations.read().await;
        let anomalies = resolve_slots(doc, &translations, true);
        resolve_computed(doc, &translations, true);
        if !anomalies.is_empty() {
            debug!(
                "{}/{}: {} links permanently unresolved",
                doc.table,
                doc.source_id,
                anomalies.len()
            );
        }
        anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PendingComputed, SourceRecord};
    use chrono::Utc;
    use serde_json::json;

    fn entry(source_id: &str, dest: &str, label: Option<&str>) -> IdTranslationEntry {
        IdTranslationEntry {
            source_id: source_id.into(),
            dest_id: DestId::from(dest),
            table: "作物マスター".into(),
            label: label.map(str::to_string),
        }
    }

    fn doc_with_links(ids: &[&str]) -> TransformedDocument {
        let rec = SourceRecord::from_json("作付計画", "recP1", json!({}), Utc::now());
        let mut doc = TransformedDocument::new(&rec, "planting_plans");
        doc.fields.insert(
            "crop".into(),
            FieldValue::Links(
                ids.iter()
                    .map(|id| LinkSlot::pending("作物マスター", *id))
                    .collect(),
            ),
        );
        doc.pending.push(PendingComputed {
            dest_field: "crop_name".into(),
            source_ids: ids.iter().map(|s| s.to_string()).collect(),
        });
        doc
    }

    #[test]
    fn test_first_writer_wins() {
        let mut table = IdTranslationTable::new();
        assert_eq!(table.insert(entry("recA", "d1", None)), InsertOutcome::Inserted);
        assert_eq!(
            table.insert(entry("recA", "d1", None)),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(
            table.insert(entry("recA", "d2", None)),
            InsertOutcome::Conflict {
                existing: DestId::from("d1")
            }
        );
        assert_eq!(table.dest_id("recA"), Some(&DestId::from("d1")));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_first_pass_reports_unresolved() {
        let shared = IdTranslationTable::shared();
        shared.write().await.insert(entry("recA", "d1", Some("大豆")));
        let resolver = LinkResolver::new(shared);

        let mut doc = doc_with_links(&["recA", "recB"]);
        let anomalies = resolver.resolve_links(&mut doc).await;

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::UnresolvedLink);
        assert_eq!(anomalies[0].field.as_deref(), Some("crop"));
        assert_eq!(doc.fields["crop"].pending_links(), 1);
        assert_eq!(doc.pending.len(), 1, "label waits for every link");
        assert!(doc.has_placeholders());
    }

    #[tokio::test]
    async fn test_second_pass_resolves_late_arrivals() {
        let shared = IdTranslationTable::shared();
        let resolver = LinkResolver::new(shared.clone());
        let mut doc = doc_with_links(&["recA", "recB"]);
        resolver.resolve_links(&mut doc).await;

        {
            let mut table = shared.write().await;
            table.insert(entry("recA", "d1", Some("大豆")));
            table.insert(entry("recB", "d2", Some("小麦")));
        }

        let anomalies = resolver.finalize(&mut doc).await;
        assert!(anomalies.is_empty());
        assert_eq!(
            doc.fields["crop"],
            FieldValue::Links(vec![
                LinkSlot::Resolved(DestId::from("d1")),
                LinkSlot::Resolved(DestId::from("d2")),
            ])
        );
        assert_eq!(doc.fields["crop_name"], FieldValue::Text("大豆, 小麦".into()));
        assert!(!doc.has_placeholders());
    }

    #[tokio::test]
    async fn test_second_pass_nulls_missing_targets() {
        let shared = IdTranslationTable::shared();
        shared.write().await.insert(entry("recA", "d1", Some("大豆")));
        let resolver = LinkResolver::new(shared);

        let mut doc = doc_with_links(&["recA", "recGone"]);
        let anomalies = resolver.finalize(&mut doc).await;

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::PermanentlyUnresolvedLink);
        assert!(anomalies[0].reason.contains("recGone"));
        assert_eq!(
            doc.fields["crop"],
            FieldValue::Links(vec![LinkSlot::Resolved(DestId::from("d1")), LinkSlot::Missing])
        );
        assert_eq!(doc.fields["crop_name"], FieldValue::Text("大豆".into()));
        assert!(!doc.has_placeholders());
    }
}
