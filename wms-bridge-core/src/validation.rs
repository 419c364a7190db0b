//! Required-field and format checks on mapped payloads.
//!
//! All reasons are collected, not just the first, so one log line tells the
//! operator everything that must be fixed upstream.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::mapping::{FieldRule, FieldType, Format, LineRule};

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"))
}

fn country_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]{2}$").expect("valid country pattern"))
}

fn is_blank(value: &Value, ty: FieldType) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        // identifying integers use zero as "unset"
        Value::Number(n) if ty == FieldType::Int => n.as_i64() == Some(0),
        _ => false,
    }
}

fn check_format(value: &Value, format: Format) -> Option<&'static str> {
    match format {
        Format::Any => None,
        Format::Email => match value.as_str() {
            Some(s) if email_pattern().is_match(s) => None,
            _ => Some("is not a valid email address"),
        },
        Format::CountryCode => match value.as_str() {
            Some(s) if country_pattern().is_match(s) => None,
            _ => Some("is not an ISO 3166 alpha-2 country code"),
        },
        Format::Positive => match value.as_f64() {
            Some(n) if n > 0.0 => None,
            _ => Some("must be greater than zero"),
        },
    }
}

fn check_fields(rules: &[FieldRule], object: &Value, prefix: &str, reasons: &mut Vec<String>) {
    for rule in rules {
        let value = object.get(rule.target).unwrap_or(&Value::Null);
        if is_blank(value, rule.ty) {
            if rule.required {
                reasons.push(format!("{prefix}{} is required", rule.target));
            }
            continue;
        }
        if let Some(problem) = check_format(value, rule.format) {
            reasons.push(format!("{prefix}{} {value} {problem}", rule.target));
        }
    }
}

/// Validates a mapped payload against its profile rules.
pub fn validate(fields: &[FieldRule], lines: Option<&LineRule>, payload: &Value) -> Result<(), Vec<String>> {
    let mut reasons = Vec::new();
    check_fields(fields, payload, "", &mut reasons);

    if let Some(rule) = lines {
        let rows = payload
            .get(rule.target)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if rule.required && rows.is_empty() {
            reasons.push(format!("{} must contain at least one line", rule.target));
        }
        for (idx, row) in rows.iter().enumerate() {
            let prefix = format!("{}[{idx}].", rule.target);
            check_fields(rule.fields, row, &prefix, &mut reasons);
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(reasons)
    }
}
