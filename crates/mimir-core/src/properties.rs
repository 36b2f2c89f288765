//! Property flattening applied at the graph adapter boundary.
//!
//! Stored property bags are flat: nested objects become `a_b_c` keys, arrays
//! of primitives are kept as-is, and arrays of objects are serialized into a
//! `<key>_raw_json` string. Reads reconstruct nesting when that is
//! unambiguous and fall back to the flat form otherwise.

use crate::node::Properties;
use serde_json::{Map, Value};

/// Values longer than this (UTF-8 bytes) are considered large and stripped
/// from list/search responses.
pub const LARGE_FIELD_BYTES: usize = 10 * 1024;

pub const RAW_JSON_SUFFIX: &str = "_raw_json";

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Flatten one level of structure at a time, recursively. Objects nest into
/// `parent_child` keys; arrays of objects are opaque to filtering and land in
/// `<key>_raw_json`.
pub fn flatten(input: &Map<String, Value>) -> Properties {
    let mut out = Properties::new();
    flatten_into(&mut out, None, input);
    out
}

fn flatten_into(out: &mut Properties, prefix: Option<&str>, input: &Map<String, Value>) {
    for (key, value) in input {
        let full_key = match prefix {
            Some(p) => format!("{}_{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(out, Some(&full_key), nested),
            Value::Array(items) => {
                if items.iter().all(is_primitive) {
                    out.insert(full_key, value.clone());
                } else {
                    let raw = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
                    out.insert(format!("{}{}", full_key, RAW_JSON_SUFFIX), Value::String(raw));
                }
            }
            other => {
                out.insert(full_key, other.clone());
            }
        }
    }
}

/// Rebuild nested structure from flat keys. Keys that cannot be placed
/// without conflict (a path segment that is both a leaf and a branch) are
/// returned in flat form, matching what was stored.
pub fn unflatten(input: &Properties) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in input {
        if let Some(base) = key.strip_suffix(RAW_JSON_SUFFIX) {
            if let Value::String(raw) = value {
                if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(raw) {
                    insert_path(&mut out, base, parsed);
                    continue;
                }
            }
        }
        insert_path(&mut out, key, value.clone());
    }
    out
}

fn insert_path(out: &mut Map<String, Value>, key: &str, value: Value) {
    let segments: Vec<&str> = key.split('_').collect();
    if segments.len() == 1 || segments.iter().any(|s| s.is_empty()) {
        out.insert(key.to_string(), value);
        return;
    }
    if !try_insert_nested(out, &segments, &value) {
        // Ambiguous: keep the flat key as stored.
        out.insert(key.to_string(), value);
    }
}

fn try_insert_nested(out: &mut Map<String, Value>, segments: &[&str], value: &Value) -> bool {
    let mut current = out;
    for segment in &segments[..segments.len() - 1] {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(nested) => current = nested,
            _ => return false,
        }
    }
    let leaf = segments[segments.len() - 1];
    if matches!(current.get(leaf), Some(Value::Object(_))) {
        return false;
    }
    current.insert(leaf.to_string(), value.clone());
    true
}

/// Outcome of large-field stripping on a single property bag.
#[derive(Debug, Clone, Default)]
pub struct StripReport {
    pub stripped_keys: Vec<String>,
}

/// Replace large string values by a length indicator. Full content remains
/// available through single-node fetch.
pub fn strip_large_fields(props: &mut Properties) -> StripReport {
    let mut report = StripReport::default();
    for (key, value) in props.iter_mut() {
        if let Value::String(s) = value {
            if s.len() > LARGE_FIELD_BYTES {
                let indicator = format!("[{} chars omitted]", s.chars().count());
                *value = Value::String(indicator);
                report.stripped_keys.push(key.clone());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn flattens_nested_objects() {
        let input = as_map(json!({"a": {"b": {"c": 1}}, "x": "y"}));
        let flat = flatten(&input);
        assert_eq!(flat.get("a_b_c"), Some(&json!(1)));
        assert_eq!(flat.get("x"), Some(&json!("y")));
    }

    #[test]
    fn preserves_primitive_arrays() {
        let input = as_map(json!({"tags": ["a", "b", 3]}));
        let flat = flatten(&input);
        assert_eq!(flat.get("tags"), Some(&json!(["a", "b", 3])));
    }

    #[test]
    fn object_arrays_become_raw_json() {
        let input = as_map(json!({"steps": [{"n": 1}, {"n": 2}]}));
        let flat = flatten(&input);
        let raw = flat.get("steps_raw_json").and_then(Value::as_str).unwrap();
        let parsed: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed, json!([{"n": 1}, {"n": 2}]));
    }

    #[test]
    fn round_trip_representable_payloads() {
        let original = as_map(json!({
            "title": "t",
            "meta": {"owner": {"name": "a"}, "score": 2},
            "tags": [1, 2],
            "steps": [{"n": 1}],
        }));
        let flat = flatten(&original);
        let back = unflatten(&flat);
        assert_eq!(Value::Object(back.clone()), Value::Object(original));
        // and the inverse direction
        assert_eq!(flatten(&back), flat);
    }

    #[test]
    fn ambiguous_keys_stay_flat() {
        // `a` is a scalar leaf, so `a_b` cannot nest under it.
        let mut flat = Properties::new();
        flat.insert("a".into(), json!(1));
        flat.insert("a_b".into(), json!(2));
        let back = unflatten(&flat);
        assert_eq!(back.get("a"), Some(&json!(1)));
        assert_eq!(back.get("a_b"), Some(&json!(2)));
    }

    #[test]
    fn strips_only_large_strings() {
        let mut props = Properties::new();
        props.insert("small".into(), json!("hello"));
        props.insert("big".into(), json!("x".repeat(LARGE_FIELD_BYTES + 1)));
        let report = strip_large_fields(&mut props);
        assert_eq!(report.stripped_keys, vec!["big".to_string()]);
        assert_eq!(props.get("small"), Some(&json!("hello")));
        let indicator = props.get("big").and_then(Value::as_str).unwrap();
        assert!(indicator.starts_with('['));
        assert!(indicator.contains("chars omitted"));
    }
}
