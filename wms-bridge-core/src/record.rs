//! Typed access to loosely-typed source records.
//!
//! Source systems hand back JSON whose field types drift (numbers as strings,
//! OData date literals, nested `{"results": [...]}` wrappers). [`Record`] keeps the
//! raw shape in a tagged [`FieldValue`] union and exposes total coercions that fall
//! back to a default instead of failing, so mapping code never scatters casts.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    /// Nested detail collection (order lines and the like).
    List(Vec<Record>),
}

impl FieldValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Decimal(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(Record::from_json).collect()),
            Value::Object(map) => match map.get("results") {
                // OData v2 wraps expanded collections
                Some(Value::Array(items)) => {
                    FieldValue::List(items.iter().map(Record::from_json).collect())
                }
                _ => FieldValue::List(vec![Record::from_json(value)]),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::Number((*i).into()),
            FieldValue::Decimal(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            FieldValue::List(items) => Value::Array(items.iter().map(Record::to_json).collect()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(d: f64) -> Self {
        FieldValue::Decimal(d)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(dt: DateTime<Utc>) -> Self {
        FieldValue::DateTime(dt)
    }
}

impl From<Vec<Record>> for FieldValue {
    fn from(items: Vec<Record>) -> Self {
        FieldValue::List(items)
    }
}

/// A source record: field name to tagged value, kept in sorted key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a JSON object. Non-object input yields an empty record.
    pub fn from_json(value: &Value) -> Self {
        let fields = match value {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Record { fields }
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// True when the field exists, is not null and is not blank text.
    pub fn is_present(&self, name: &str) -> bool {
        match self.fields.get(name) {
            None | Some(FieldValue::Null) => false,
            Some(FieldValue::Text(s)) => !s.trim().is_empty(),
            Some(FieldValue::List(items)) => !items.is_empty(),
            Some(_) => true,
        }
    }

    pub fn as_text(&self, name: &str) -> String {
        match self.fields.get(name) {
            Some(FieldValue::Text(s)) => s.trim().to_string(),
            Some(FieldValue::Int(i)) => i.to_string(),
            Some(FieldValue::Decimal(d)) => d.to_string(),
            Some(FieldValue::Bool(b)) => b.to_string(),
            Some(FieldValue::DateTime(dt)) => dt.to_rfc3339(),
            _ => String::new(),
        }
    }

    pub fn as_int(&self, name: &str) -> i64 {
        match self.fields.get(name) {
            Some(FieldValue::Int(i)) => *i,
            Some(FieldValue::Decimal(d)) if d.is_finite() => d.trunc() as i64,
            Some(FieldValue::Bool(b)) => i64::from(*b),
            Some(FieldValue::Text(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| parse_decimal(s).map(|d| d.trunc() as i64))
                    .unwrap_or_default()
            }
            _ => 0,
        }
    }

    pub fn as_decimal(&self, name: &str) -> f64 {
        match self.fields.get(name) {
            Some(FieldValue::Int(i)) => *i as f64,
            Some(FieldValue::Decimal(d)) if d.is_finite() => *d,
            Some(FieldValue::Bool(b)) => f64::from(u8::from(*b)),
            Some(FieldValue::Text(s)) => parse_decimal(s.trim()).unwrap_or_default(),
            _ => 0.0,
        }
    }

    pub fn as_bool(&self, name: &str) -> bool {
        match self.fields.get(name) {
            Some(FieldValue::Bool(b)) => *b,
            Some(FieldValue::Int(i)) => *i != 0,
            Some(FieldValue::Decimal(d)) => *d != 0.0,
            Some(FieldValue::Text(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "y"
            ),
            _ => false,
        }
    }

    pub fn as_date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(name) {
            Some(FieldValue::DateTime(dt)) => Some(*dt),
            Some(FieldValue::Text(s)) => parse_date(s),
            _ => None,
        }
    }

    /// Nested detail rows, or an empty slice when the field is absent or scalar.
    pub fn lines(&self, name: &str) -> &[Record] {
        match self.fields.get(name) {
            Some(FieldValue::List(items)) => items,
            _ => &[],
        }
    }
}

fn parse_decimal(s: &str) -> Option<f64> {
    let parsed = s.parse::<f64>().ok().or_else(|| {
        // "12,5" from locales that use a decimal comma
        if s.contains(',') && !s.contains('.') {
            s.replace(',', ".").parse::<f64>().ok()
        } else {
            None
        }
    })?;
    parsed.is_finite().then_some(parsed)
}

/// Parses RFC 3339, naive ISO date-times, plain dates and OData `/Date(ms)/` literals.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(inner) = s.strip_prefix("/Date(").and_then(|r| r.strip_suffix(")/")) {
        let millis_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i)
            .unwrap_or(inner.len());
        let millis = inner[..millis_end].parse::<i64>().ok()?;
        return DateTime::from_timestamp_millis(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn coercions_fall_back_to_defaults() {
        let rec = Record::from_json(&json!({
            "qty": "12,5",
            "code": 42,
            "flag": "Yes",
            "broken": "abc",
            "nothing": null
        }));
        assert_eq!(rec.as_decimal("qty"), 12.5);
        assert_eq!(rec.as_int("qty"), 12);
        assert_eq!(rec.as_text("code"), "42");
        assert!(rec.as_bool("flag"));
        assert_eq!(rec.as_int("broken"), 0);
        assert_eq!(rec.as_decimal("missing"), 0.0);
        assert!(!rec.as_bool("nothing"));
        assert_eq!(rec.as_text("nothing"), "");
        assert!(rec.as_date("broken").is_none());
    }

    #[test]
    fn parses_supported_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_date("2024-03-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_date("2024-03-01T10:30:00"), Some(expected));
        assert_eq!(
            parse_date(&format!("/Date({})/", expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(
            parse_date("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn odata_results_wrapper_becomes_lines() {
        let rec = Record::from_json(&json!({
            "Lines": { "results": [ { "Item": "A" }, { "Item": "B" } ] }
        }));
        let lines = rec.lines("Lines");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].as_text("Item"), "B");
        assert!(rec.lines("Missing").is_empty());
    }

    #[test]
    fn presence_ignores_blank_text() {
        let rec = Record::new().with("a", "  ").with("b", "x").with("c", FieldValue::Null);
        assert!(!rec.is_present("a"));
        assert!(rec.is_present("b"));
        assert!(!rec.is_present("c"));
        assert!(!rec.is_present("d"));
    }
}
