//! Source records and destination documents.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::value::FieldValue;
use super::{
    CREATED_TIME_FIELD, MIGRATED_AT_FIELD, SOURCE_ID_FIELD, SOURCE_TABLE_FIELD, UNMAPPED_FIELD,
};

/// A record as extracted from the source. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Stable source record id (e.g. `recXXXXXXXXXXXXXX`).
    pub source_id: String,
    /// Source table name.
    pub table: String,
    /// Raw field values keyed by source field name.
    pub fields: BTreeMap<String, Value>,
    /// Source creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(
        table: impl Into<String>,
        source_id: impl Into<String>,
        fields: BTreeMap<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            table: table.into(),
            fields,
            created_at,
        }
    }

    /// Build a record from a JSON object literal. Non-object values yield no fields.
    pub fn from_json(
        table: impl Into<String>,
        source_id: impl Into<String>,
        fields: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let fields = match fields {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Self::new(table, source_id, fields, created_at)
    }
}

/// A computed field that needs link translation before it can be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingComputed {
    /// Destination field to fill.
    pub dest_field: String,
    /// Source ids whose labels make up the value.
    pub source_ids: Vec<String>,
}

/// Destination-shaped record ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedDocument {
    pub source_id: String,
    /// Source table this document came from.
    pub table: String,
    /// Destination collection.
    pub collection: String,
    pub created_time: DateTime<Utc>,
    /// Mapped fields, ordered by name so repeated runs serialize identically.
    pub fields: BTreeMap<String, FieldValue>,
    /// Source fields not covered by any rule, kept verbatim.
    pub unmapped: BTreeMap<String, Value>,
    /// Computed fields waiting on link translation.
    pub pending: Vec<PendingComputed>,
    /// Set by the writer.
    pub migrated_at: Option<DateTime<Utc>>,
}

impl TransformedDocument {
    pub fn new(record: &SourceRecord, collection: impl Into<String>) -> Self {
        Self {
            source_id: record.source_id.clone(),
            table: record.table.clone(),
            collection: collection.into(),
            created_time: record.created_at,
            fields: BTreeMap::new(),
            unmapped: BTreeMap::new(),
            pending: Vec::new(),
            migrated_at: None,
        }
    }

    /// Whether any link slot or computed field still needs the second pass.
    pub fn has_placeholders(&self) -> bool {
        !self.pending.is_empty() || self.fields.values().any(|v| v.pending_links() > 0)
    }

    /// Label of this document for linked display fields.
    pub fn label(&self, display_field: Option<&str>) -> Option<String> {
        display_field
            .and_then(|field| self.fields.get(field))
            .and_then(FieldValue::as_label)
    }

    /// Full JSON body as persisted. Mapped fields, then the bookkeeping fields.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        for (name, value) in &self.fields {
            body.insert(name.clone(), value.to_json());
        }
        if !self.unmapped.is_empty() {
            let bucket: Map<String, Value> = self
                .unmapped
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            body.insert(UNMAPPED_FIELD.to_string(), Value::Object(bucket));
        }
        body.insert(
            SOURCE_ID_FIELD.to_string(),
            Value::String(self.source_id.clone()),
        );
        body.insert(
            SOURCE_TABLE_FIELD.to_string(),
            Value::String(self.table.clone()),
        );
        body.insert(
            CREATED_TIME_FIELD.to_string(),
            Value::String(
                self.created_time
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );
        if let Some(ts) = self.migrated_at {
            body.insert(
                MIGRATED_AT_FIELD.to_string(),
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }
        Value::Object(body)
    }
}
