//! MongoDB document store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::debug;

use super::DocumentStore;
use crate::config::TargetConfig;
use crate::core::{
    DestId, FieldValue, LinkSlot, TransformedDocument, CREATED_TIME_FIELD, MIGRATED_AT_FIELD,
    SOURCE_ID_FIELD, SOURCE_TABLE_FIELD, UNMAPPED_FIELD,
};
use crate::error::{MigrateError, Result};
use crate::resolve::IdTranslationEntry;

const SOURCE_KEY_INDEX: &str = "source_table_source_id";

/// MongoDB store backed by the official driver.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Create a client. The driver connects lazily, so nothing is verified yet.
    pub async fn new(config: &TargetConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri)
            .await
            .map_err(|e| MigrateError::Setup(format!("Failed to create MongoDB client: {}", e)))?;
        debug!("MongoDB client for {}", config.redacted_uri());
        Ok(Self {
            db: client.database(&config.database),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

/// Convert a document to its persisted BSON form. `_id` is never set here so
/// a replace keeps the existing id.
fn to_bson_document(doc: &TransformedDocument) -> Result<Document> {
    let mut body = Document::new();
    for (name, value) in &doc.fields {
        body.insert(name.clone(), field_to_bson(value)?);
    }
    if !doc.unmapped.is_empty() {
        let mut bucket = Document::new();
        for (name, value) in &doc.unmapped {
            bucket.insert(name.clone(), json_to_bson(value)?);
        }
        body.insert(UNMAPPED_FIELD, bucket);
    }
    body.insert(SOURCE_ID_FIELD, doc.source_id.clone());
    body.insert(SOURCE_TABLE_FIELD, doc.table.clone());
    body.insert(
        CREATED_TIME_FIELD,
        bson::DateTime::from_millis(doc.created_time.timestamp_millis()),
    );
    if let Some(ts) = doc.migrated_at {
        body.insert(
            MIGRATED_AT_FIELD,
            bson::DateTime::from_millis(ts.timestamp_millis()),
        );
    }
    Ok(body)
}

fn field_to_bson(value: &FieldValue) -> Result<Bson> {
    Ok(match value {
        FieldValue::Null => Bson::Null,
        FieldValue::Text(s) => Bson::String(s.clone()),
        FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Bson::Int64(*n as i64),
        FieldValue::Number(n) => Bson::Double(*n),
        FieldValue::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .map(|dt| Bson::DateTime(bson::DateTime::from_millis(dt.and_utc().timestamp_millis())))
            .unwrap_or(Bson::Null),
        FieldValue::Timestamp(ts) => {
            Bson::DateTime(bson::DateTime::from_millis(ts.timestamp_millis()))
        }
        FieldValue::Ids(ids) => Bson::Array(ids.iter().cloned().map(Bson::String).collect()),
        FieldValue::Links(slots) => Bson::Array(slots.iter().map(link_to_bson).collect()),
        FieldValue::TextList(items) => {
            Bson::Array(items.iter().cloned().map(Bson::String).collect())
        }
        FieldValue::Raw(v) => json_to_bson(v)?,
    })
}

fn link_to_bson(slot: &LinkSlot) -> Bson {
    match slot {
        LinkSlot::Resolved(id) => match ObjectId::parse_str(id.as_str()) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => Bson::String(id.to_string()),
        },
        LinkSlot::Pending { table, source_id } => Bson::Document(doc! {
            "pending_table": table.as_str(),
            "pending_source_id": source_id.as_str(),
        }),
        LinkSlot::Missing => Bson::Null,
    }
}

fn json_to_bson(value: &serde_json::Value) -> Result<Bson> {
    bson::to_bson(value).map_err(|e| MigrateError::store(format!("BSON conversion failed: {}", e)))
}

fn dest_id_of(id: &Bson) -> Option<DestId> {
    match id {
        Bson::ObjectId(oid) => Some(DestId::new(oid.to_hex())),
        Bson::String(s) => Some(DestId::new(s.clone())),
        _ => None,
    }
}

/// Label of a stored display value, rendered like [`FieldValue::as_label`].
///
/// Dates are stored as midnight UTC, so a midnight timestamp reads back as a date.
fn label_of(value: &Bson) -> Option<String> {
    let value = match value {
        Bson::String(s) => FieldValue::Text(s.clone()),
        Bson::Int32(n) => return Some(n.to_string()),
        Bson::Int64(n) => return Some(n.to_string()),
        Bson::Double(n) => FieldValue::Number(*n),
        Bson::DateTime(dt) => {
            let ts = DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())?;
            if ts.time() == NaiveTime::MIN {
                FieldValue::Date(ts.date_naive())
            } else {
                FieldValue::Timestamp(ts)
            }
        }
        Bson::Array(items) => FieldValue::TextList(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => return None,
    };
    value.as_label()
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { SOURCE_TABLE_FIELD: 1, SOURCE_ID_FIELD: 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name(SOURCE_KEY_INDEX.to_string())
                    .build(),
            )
            .build();
        self.collection(collection).create_index(index).await?;
        debug!("Ensured unique source key index on {}", collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, doc: &TransformedDocument) -> Result<DestId> {
        let filter = doc! {
            SOURCE_TABLE_FIELD: doc.table.as_str(),
            SOURCE_ID_FIELD: doc.source_id.as_str(),
        };
        let body = to_bson_document(doc)?;

        let persisted = self
            .collection(collection)
            .find_one_and_replace(filter, body)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .projection(doc! { "_id": 1 })
            .await?;

        persisted
            .as_ref()
            .and_then(|d| d.get("_id"))
            .and_then(dest_id_of)
            .ok_or_else(|| {
                MigrateError::store(format!(
                    "upsert of {} into {} returned no document id",
                    doc.source_id, collection
                ))
            })
    }

    async fn load_translations(
        &self,
        collection: &str,
        table: &str,
        label_field: Option<&str>,
    ) -> Result<Vec<IdTranslationEntry>> {
        let mut projection = doc! { "_id": 1, SOURCE_ID_FIELD: 1 };
        if let Some(field) = label_field {
            projection.insert(field, 1);
        }

        let mut cursor = self
            .collection(collection)
            .find(doc! { SOURCE_TABLE_FIELD: table })
            .projection(projection)
            .await?;

        let mut entries = Vec::new();
        while let Some(found) = cursor.try_next().await? {
            let (Ok(source_id), Some(dest_id)) = (
                found.get_str(SOURCE_ID_FIELD),
                found.get("_id").and_then(dest_id_of),
            ) else {
                continue;
            };
            entries.push(IdTranslationEntry {
                source_id: source_id.to_string(),
                dest_id,
                table: table.to_string(),
                label: label_field.and_then(|f| found.get(f)).and_then(label_of),
            });
        }

        debug!(
            "Loaded {} translations for {} from {}",
            entries.len(),
            table,
            collection
        );
        Ok(entries)
    }

    fn store_type(&self) -> &str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceRecord;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    #[test]
    fn test_label_of_matches_pass_one_labels() {
        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2025, 7, 8).unwrap());
        let ts = FieldValue::Timestamp(Utc.with_ymd_and_hms(2025, 7, 8, 9, 30, 0).unwrap());
        let list = FieldValue::TextList(vec!["田中".into(), "佐藤".into()]);

        for value in [&date, &ts, &list, &FieldValue::Number(1.5), &FieldValue::Number(12.0)] {
            assert_eq!(label_of(&field_to_bson(value).unwrap()), value.as_label());
        }
        assert_eq!(label_of(&field_to_bson(&date).unwrap()).as_deref(), Some("2025-07-08"));
        assert_eq!(
            label_of(&field_to_bson(&ts).unwrap()).as_deref(),
            Some("2025-07-08T09:30:00Z")
        );
        assert_eq!(label_of(&field_to_bson(&list).unwrap()).as_deref(), Some("田中, 佐藤"));
        assert_eq!(label_of(&Bson::Array(vec![])), None);
        assert_eq!(label_of(&Bson::String(String::new())), None);
        assert_eq!(label_of(&Bson::Null), None);
    }

    #[test]
    fn test_bson_document_shape() {
        let rec = SourceRecord::from_json("作業履歴", "recW1", json!({}), Utc::now());
        let mut d = TransformedDocument::new(&rec, "work_history");
        d.fields.insert("area".into(), FieldValue::Number(12.0));
        d.fields.insert("ratio".into(), FieldValue::Number(0.5));
        d.fields.insert(
            "date".into(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2025, 7, 8).unwrap()),
        );
        d.fields.insert(
            "crops".into(),
            FieldValue::Links(vec![
                LinkSlot::Resolved(DestId::from("65f1a2b3c4d5e6f708091a2b")),
                LinkSlot::Resolved(DestId::from("not-an-oid")),
                LinkSlot::Missing,
            ]),
        );
        d.unmapped.insert("謎2".into(), json!({"a": [1, "b"]}));
        d.migrated_at = Some(Utc::now());

        let body = to_bson_document(&d).unwrap();
        assert!(body.get("_id").is_none());
        assert_eq!(body.get_i64("area").unwrap(), 12);
        assert_eq!(body.get_f64("ratio").unwrap(), 0.5);
        assert!(body.get_datetime("date").is_ok());
        assert!(body.get_datetime(MIGRATED_AT_FIELD).is_ok());
        assert_eq!(body.get_str(SOURCE_TABLE_FIELD).unwrap(), "作業履歴");

        let crops = body.get_array("crops").unwrap();
        assert!(matches!(crops[0], Bson::ObjectId(_)));
        assert_eq!(crops[1], Bson::String("not-an-oid".into()));
        assert_eq!(crops[2], Bson::Null);

        let bucket = body.get_document(UNMAPPED_FIELD).unwrap();
        assert!(bucket.get_document("謎2").is_ok());
    }

    #[test]
    fn test_dest_id_from_object_id() {
        let oid = ObjectId::new();
        assert_eq!(dest_id_of(&Bson::ObjectId(oid)), Some(DestId::new(oid.to_hex())));
        assert_eq!(dest_id_of(&Bson::Null), None);
    }
}
