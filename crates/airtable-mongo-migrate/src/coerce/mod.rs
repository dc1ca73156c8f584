//! Type coercion from raw source JSON into destination-native values.
//!
//! Coercion never fails the caller. A malformed value produces a
//! [`CoercionFailure`] carrying the fallback value the document should hold,
//! and the mapper turns it into a report anomaly.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::core::{Coercion, FieldValue};

/// Accepted calendar date layouts, tried in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日"];

/// A value that could not be coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionFailure {
    /// Value to store in its place.
    pub fallback: FieldValue,
    pub reason: String,
}

impl CoercionFailure {
    fn new(tag: Coercion, reason: impl Into<String>) -> Self {
        Self {
            fallback: empty_value(tag),
            reason: reason.into(),
        }
    }
}

/// Value used for a missing field of the given type.
pub fn empty_value(tag: Coercion) -> FieldValue {
    match tag {
        Coercion::ArrayOfIds => FieldValue::Ids(Vec::new()),
        Coercion::ArrayOfText => FieldValue::TextList(Vec::new()),
        _ => FieldValue::Null,
    }
}

/// Coerce a raw value. `None`, JSON null and the empty string count as missing.
pub fn coerce(raw: Option<&Value>, tag: Coercion) -> Result<FieldValue, CoercionFailure> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(empty_value(tag)),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(empty_value(tag)),
        Some(v) => v,
    };

    match tag {
        Coercion::Text => Ok(coerce_text(raw)),
        Coercion::Number => coerce_number(scalar(raw)),
        Coercion::Date => coerce_date(scalar(raw)),
        Coercion::ArrayOfIds => coerce_ids(raw),
        Coercion::ArrayOfText => Ok(coerce_text_list(raw)),
    }
}

/// Lookup fields arrive as one-element arrays; scalar tags look through them.
fn scalar(raw: &Value) -> &Value {
    match raw {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

fn coerce_text(raw: &Value) -> FieldValue {
    match raw {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(text_of).collect();
            if parts.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(parts.join(", "))
            }
        }
        other => text_of(other).map_or(FieldValue::Null, FieldValue::Text),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn coerce_number(raw: &Value) -> Result<FieldValue, CoercionFailure> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(n) if n.is_finite() => Ok(FieldValue::Number(n)),
        _ => Err(CoercionFailure::new(
            Coercion::Number,
            format!("not a number: {}", raw),
        )),
    }
}

fn coerce_date(raw: &Value) -> Result<FieldValue, CoercionFailure> {
    let Value::String(s) = raw else {
        return Err(CoercionFailure::new(
            Coercion::Date,
            format!("not a date: {}", raw),
        ));
    };
    parse_date(s.trim()).ok_or_else(|| {
        CoercionFailure::new(Coercion::Date, format!("unrecognised date: {:?}", s))
    })
}

/// Parse a date or timestamp string in any accepted layout.
pub fn parse_date(s: &str) -> Option<FieldValue> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(FieldValue::Timestamp(ts.with_timezone(&Utc)));
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(FieldValue::Date)
}

fn coerce_ids(raw: &Value) -> Result<FieldValue, CoercionFailure> {
    match raw {
        Value::String(id) => Ok(FieldValue::Ids(vec![id.trim().to_string()])),
        Value::Array(items) => {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(id) if !id.trim().is_empty() => ids.push(id.trim().to_string()),
                    Value::String(_) | Value::Null => {}
                    other => {
                        return Err(CoercionFailure::new(
                            Coercion::ArrayOfIds,
                            format!("link entry is not a record id: {}", other),
                        ))
                    }
                }
            }
            Ok(FieldValue::Ids(ids))
        }
        other => Err(CoercionFailure::new(
            Coercion::ArrayOfIds,
            format!("not a record id list: {}", other),
        )),
    }
}

fn coerce_text_list(raw: &Value) -> FieldValue {
    let items = match raw {
        Value::Array(items) => items.iter().filter_map(text_of).collect(),
        other => text_of(other).into_iter().collect(),
    };
    FieldValue::TextList(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(raw: Value, tag: Coercion) -> FieldValue {
        coerce(Some(&raw), tag).unwrap()
    }

    #[test]
    fn test_missing_values_are_empty_without_failure() {
        assert_eq!(coerce(None, Coercion::Date), Ok(FieldValue::Null));
        assert_eq!(coerce(None, Coercion::ArrayOfIds), Ok(FieldValue::Ids(vec![])));
        assert_eq!(
            coerce(Some(&json!("")), Coercion::ArrayOfText),
            Ok(FieldValue::TextList(vec![]))
        );
        assert_eq!(coerce(Some(&Value::Null), Coercion::Number), Ok(FieldValue::Null));
    }

    #[test]
    fn test_date_layouts() {
        let expected = FieldValue::Date(NaiveDate::from_ymd_opt(2025, 7, 8).unwrap());
        assert_eq!(ok(json!("2025-07-08"), Coercion::Date), expected);
        assert_eq!(ok(json!("2025/07/08"), Coercion::Date), expected);
        assert_eq!(ok(json!("2025年07月08日"), Coercion::Date), expected);
        assert!(matches!(
            ok(json!("2025-07-08T10:00:00.000Z"), Coercion::Date),
            FieldValue::Timestamp(_)
        ));
    }

    #[test]
    fn test_malformed_date_falls_back_to_null() {
        let failure = coerce(Some(&json!("来週の火曜")), Coercion::Date).unwrap_err();
        assert_eq!(failure.fallback, FieldValue::Null);
        assert!(failure.reason.contains("来週の火曜"));

        let failure = coerce(Some(&json!(20250708)), Coercion::Date).unwrap_err();
        assert_eq!(failure.fallback, FieldValue::Null);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(ok(json!(12.5), Coercion::Number), FieldValue::Number(12.5));
        assert_eq!(ok(json!("1,200"), Coercion::Number), FieldValue::Number(1200.0));
        assert_eq!(ok(json!([" 3 "]), Coercion::Number), FieldValue::Number(3.0));
    }

    #[test]
    fn test_number_with_unit_is_a_failure() {
        let failure = coerce(Some(&json!("10a")), Coercion::Number).unwrap_err();
        assert_eq!(failure.fallback, FieldValue::Null);
        assert!(coerce(Some(&json!("NaN")), Coercion::Number).is_err());
        assert!(coerce(Some(&json!(true)), Coercion::Number).is_err());
    }

    #[test]
    fn test_scalar_id_becomes_single_element_array() {
        assert_eq!(
            ok(json!("recA1"), Coercion::ArrayOfIds),
            FieldValue::Ids(vec!["recA1".into()])
        );
        assert_eq!(
            ok(json!(["recA1", "recA2"]), Coercion::ArrayOfIds),
            FieldValue::Ids(vec!["recA1".into(), "recA2".into()])
        );
    }

    #[test]
    fn test_non_string_id_is_a_failure() {
        let failure = coerce(Some(&json!(["recA1", 7])), Coercion::ArrayOfIds).unwrap_err();
        assert_eq!(failure.fallback, FieldValue::Ids(vec![]));
        assert!(coerce(Some(&json!({"id": "recA1"})), Coercion::ArrayOfIds).is_err());
    }

    #[test]
    fn test_text_forms() {
        assert_eq!(ok(json!(true), Coercion::Text), FieldValue::Text("true".into()));
        assert_eq!(ok(json!(42), Coercion::Text), FieldValue::Text("42".into()));
        assert_eq!(
            ok(json!(["大豆", "小麦"]), Coercion::Text),
            FieldValue::Text("大豆, 小麦".into())
        );
    }

    #[test]
    fn test_text_list_wraps_scalars() {
        assert_eq!(
            ok(json!("有機"), Coercion::ArrayOfText),
            FieldValue::TextList(vec!["有機".into()])
        );
        assert_eq!(
            ok(json!(["a", 1, null]), Coercion::ArrayOfText),
            FieldValue::TextList(vec!["a".into(), "1".into()])
        );
    }
}
