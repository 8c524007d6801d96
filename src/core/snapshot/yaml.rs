//! Deterministic YAML rendering of JSON values.
//!
//! Write-only view: stable key order, two-space indent, strings quoted with
//! escaped quotes, doubles to four decimals. Not intended to be parsed back.

use serde_json::Value;

/// Renders `value` as YAML text.
pub fn to_yaml(value: &Value) -> String {
    render(value, 0)
}

fn render(value: &Value, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match value {
        Value::Object(map) => {
            let mut out = String::new();
            for (key, item) in map {
                if item.is_object() || item.is_array() {
                    out.push_str(&format!("{pad}{key}:\n{}", render(item, indent + 2)));
                } else {
                    out.push_str(&format!("{pad}{key}: {}\n", scalar(item)));
                }
            }
            out
        }
        Value::Array(items) => {
            let mut out = String::new();
            for item in items {
                if item.is_object() || item.is_array() {
                    out.push_str(&format!("{pad}-\n{}", render(item, indent + 2)));
                } else {
                    out.push_str(&format!("{pad}- {}\n", scalar(item)));
                }
            }
            out
        }
        scalar_value => format!("{pad}{}\n", scalar(scalar_value)),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => format!("\"{}\"", text.replace('"', "\\\"")),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.to_string()
            } else if let Some(uint) = number.as_u64() {
                uint.to_string()
            } else {
                format!("{:.4}", number.as_f64().unwrap_or(0.0))
            }
        }
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        _ => String::new(),
    }
}
