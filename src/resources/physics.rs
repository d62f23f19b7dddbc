//! Physics hints from the `key: value` YAML side file.
//!
//! The file is not parsed as full YAML. Every line of the form
//! `identifier: value` contributes one entry; nesting is flattened and
//! everything else (comments, lists, blank lines) is ignored.

use std::collections::BTreeMap;

use serde_json::Value;

pub type PhysicsHints = BTreeMap<String, Value>;

pub fn parse_physics(text: &str) -> PhysicsHints {
    let mut hints = PhysicsHints::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty()
            || value.is_empty()
            || !key.chars().all(|c| c.is_alphanumeric() || c == '_')
        {
            continue;
        }
        hints.insert(key.to_string(), scalar(value));
    }
    hints
}

fn scalar(value: &str) -> Value {
    if let Ok(int) = value.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(number) = value
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(number);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(value.to_string()),
    }
}
