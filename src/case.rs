//! Identifier case conversion between wire keys (camelCase) and field
//! names (snake_case).

use serde_json::{Map, Value};

/// e.g. "user_id" -> "userId", "created_at" -> "createdAt"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' && !out.is_empty() {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// e.g. "userId" -> "user_id", "createdAt" -> "created_at"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn rename_keys(value: Value, convert: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (convert(&k), rename_keys(v, convert)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| rename_keys(v, convert)).collect()),
        other => other,
    }
}

/// Recursively camelCase every object key (objects inside arrays included).
pub fn keys_to_camel_case(value: Value) -> Value {
    rename_keys(value, &to_camel_case)
}

/// Recursively snake_case every object key.
pub fn keys_to_snake_case(value: Value) -> Value {
    rename_keys(value, &to_snake_case)
}
