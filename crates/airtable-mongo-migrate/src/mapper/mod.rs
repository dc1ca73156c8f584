//! Field mapper: applies a [`TableMapping`] to one [`SourceRecord`].
//!
//! Mapping is a pure function. Link fields leave the mapper as pending link
//! slots and `linked_display` computed fields as [`PendingComputed`] entries;
//! both are filled in by the link resolver.

use serde_json::Value;
use tracing::debug;

use crate::coerce::{self, CoercionFailure};
use crate::core::{
    Coercion, ComputedRule, FieldRule, FieldValue, LinkSlot, PendingComputed, RuleKind,
    SourceRecord, TableMapping, TransformedDocument,
};
use crate::report::{Anomaly, AnomalyKind};

/// Mapper output for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedDocument {
    pub document: TransformedDocument,
    pub anomalies: Vec<Anomaly>,
}

/// Map a source record into a partial destination document.
pub fn map_record(mapping: &TableMapping, record: &SourceRecord) -> MappedDocument {
    let mut document = TransformedDocument::new(record, mapping.collection_name());
    let mut anomalies = Vec::new();

    for rule in &mapping.rules {
        match rule.kind {
            RuleKind::Drop => {}
            RuleKind::Passthrough | RuleKind::Rename => {
                let value = map_direct(mapping, rule, record, &mut anomalies);
                document.fields.insert(rule.dest_field().to_string(), value);
            }
            RuleKind::Computed => {
                let Some(computed) = &rule.computed else {
                    continue;
                };
                let dest = rule.dest_field().to_string();
                match computed {
                    ComputedRule::Concat { fields, separator } => {
                        document
                            .fields
                            .insert(dest, concat(record, fields, separator));
                    }
                    ComputedRule::FirstOf { fields } => {
                        let value = first_of(rule, record, fields, &mut anomalies);
                        document.fields.insert(dest, into_links(mapping, rule, value));
                    }
                    ComputedRule::LinkedDisplay { link_field } => {
                        let ids = match coerce::coerce(
                            record.fields.get(link_field),
                            Coercion::ArrayOfIds,
                        ) {
                            Ok(FieldValue::Ids(ids)) => ids,
                            _ => Vec::new(),
                        };
                        if !ids.is_empty() {
                            document.pending.push(PendingComputed {
                                dest_field: dest.clone(),
                                source_ids: ids,
                            });
                        }
                        document.fields.insert(dest, FieldValue::Null);
                    }
                }
            }
        }
    }

    for (name, value) in &record.fields {
        if !mapping.covers(name) {
            document.unmapped.insert(name.clone(), value.clone());
            anomalies.push(Anomaly::new(
                AnomalyKind::UnmappedField,
                &record.table,
                &record.source_id,
                Some(name.as_str()),
                "no mapping rule; kept in catch-all bucket",
            ));
        }
    }

    if !anomalies.is_empty() {
        debug!(
            "{}/{}: {} mapping anomalies",
            record.table,
            record.source_id,
            anomalies.len()
        );
    }

    MappedDocument {
        document,
        anomalies,
    }
}

fn map_direct(
    mapping: &TableMapping,
    rule: &FieldRule,
    record: &SourceRecord,
    anomalies: &mut Vec<Anomaly>,
) -> FieldValue {
    let raw = record.fields.get(&rule.source);
    let Some(tag) = rule.coerce else {
        return raw.cloned().map_or(FieldValue::Null, FieldValue::Raw);
    };

    let value = coerced_or_fallback(coerce::coerce(raw, tag), record, &rule.source, anomalies);
    into_links(mapping, rule, value)
}

/// Attach link context to coerced ids. The target table defaults to the
/// owning table.
fn into_links(mapping: &TableMapping, rule: &FieldRule, value: FieldValue) -> FieldValue {
    match value {
        FieldValue::Ids(ids) => {
            let table = rule.link_table.as_deref().unwrap_or(&mapping.table);
            FieldValue::Links(ids.into_iter().map(|id| LinkSlot::pending(table, id)).collect())
        }
        other => other,
    }
}

fn coerced_or_fallback(
    result: Result<FieldValue, CoercionFailure>,
    record: &SourceRecord,
    field: &str,
    anomalies: &mut Vec<Anomaly>,
) -> FieldValue {
    match result {
        Ok(value) => value,
        Err(failure) => {
            anomalies.push(Anomaly::new(
                AnomalyKind::CoercionFailure,
                &record.table,
                &record.source_id,
                Some(field),
                failure.reason,
            ));
            failure.fallback
        }
    }
}

fn concat(record: &SourceRecord, fields: &[String], separator: &str) -> FieldValue {
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|f| coerce::coerce(record.fields.get(f), Coercion::Text).ok())
        .filter_map(|v| v.as_label())
        .collect();
    if parts.is_empty() {
        FieldValue::Null
    } else {
        FieldValue::Text(parts.join(separator))
    }
}

fn first_of(
    rule: &FieldRule,
    record: &SourceRecord,
    fields: &[String],
    anomalies: &mut Vec<Anomaly>,
) -> FieldValue {
    let Some((name, raw)) = fields
        .iter()
        .filter_map(|f| record.fields.get(f).map(|v| (f, v)))
        .find(|(_, v)| !is_empty(v))
    else {
        return rule.coerce.map_or(FieldValue::Null, coerce::empty_value);
    };

    match rule.coerce {
        Some(tag) => coerced_or_fallback(coerce::coerce(Some(raw), tag), record, name, anomalies),
        None => FieldValue::Raw(raw.clone()),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
