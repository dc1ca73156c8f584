//! Field value types for source-to-document transformation.
//!
//! Source values arrive as arbitrary JSON. At the coercion boundary they become
//! a [`FieldValue`], a closed union of the shapes the destination understands.
//! Anything that does not fit stays [`FieldValue::Raw`] and is carried losslessly.

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Opaque destination document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestId(String);

impl DestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One entry of a link array.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkSlot {
    /// Translated to the linked document's destination id.
    Resolved(DestId),

    /// Not yet translated. `table` is the table the link points into
    /// (or the owning table when the rule does not declare one).
    Pending { table: String, source_id: String },

    /// Still unresolved after the second pass.
    Missing,
}

impl LinkSlot {
    pub fn pending(table: impl Into<String>, source_id: impl Into<String>) -> Self {
        LinkSlot::Pending {
            table: table.into(),
            source_id: source_id.into(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, LinkSlot::Pending { .. })
    }

    pub fn dest_id(&self) -> Option<&DestId> {
        match self {
            LinkSlot::Resolved(id) => Some(id),
            _ => None,
        }
    }
}

/// Destination-native field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent, empty, or failed coercion.
    Null,

    Text(String),

    Number(f64),

    /// Calendar date without time of day.
    Date(NaiveDate),

    /// Instant in time.
    Timestamp(DateTime<Utc>),

    /// Source record ids as coerced, before the mapper attaches link context.
    Ids(Vec<String>),

    /// Link array after the mapper attached table context.
    Links(Vec<LinkSlot>),

    TextList(Vec<String>),

    /// Value kept verbatim (passthrough without coercion).
    Raw(Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Number of link slots still waiting for translation.
    pub fn pending_links(&self) -> usize {
        match self {
            FieldValue::Links(slots) => slots.iter().filter(|s| s.is_pending()).count(),
            _ => 0,
        }
    }

    /// Human-readable label used when other tables display a link to this record.
    pub fn as_label(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) if !s.is_empty() => Some(s.clone()),
            FieldValue::Number(n) => Some(format_number(*n)),
            FieldValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            FieldValue::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            FieldValue::TextList(items) if !items.is_empty() => Some(items.join(", ")),
            FieldValue::Raw(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            FieldValue::Raw(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// JSON rendering used by the in-memory store and reports.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => number_to_json(*n),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            FieldValue::Ids(ids) => json!(ids),
            FieldValue::Links(slots) => Value::Array(
                slots
                    .iter()
                    .map(|slot| match slot {
                        LinkSlot::Resolved(id) => Value::String(id.to_string()),
                        LinkSlot::Pending { table, source_id } => json!({
                            "pending_table": table,
                            "pending_source_id": source_id,
                        }),
                        LinkSlot::Missing => Value::Null,
                    })
                    .collect(),
            ),
            FieldValue::TextList(items) => json!(items),
            FieldValue::Raw(v) => v.clone(),
        }
    }
}

/// Integral values render without a fractional part.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
