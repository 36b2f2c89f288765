//! JSON argument parsing and the uniform result envelope.
//!
//! Every operation returns `{success: true, ...}` or
//! `{success: false, error: {kind, message}}`; helpers here keep the
//! argument handling uniform and the validation errors consistent.

use mimir_core::{MimirError, NodeType, Properties, Result};
use mimir_search::{RrfProfile, SearchOptions};
use serde_json::{json, Map, Value};
use std::str::FromStr;

pub fn ok(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert("success".into(), json!(true));
            Value::Object(map)
        }
        other => json!({ "success": true, "result": other }),
    }
}

pub fn fail(err: &MimirError) -> Value {
    json!({
        "success": false,
        "error": { "kind": err.kind(), "message": err.to_string() },
    })
}

pub fn envelope(result: Result<Value>) -> Value {
    match result {
        Ok(value) => ok(value),
        Err(err) => fail(&err),
    }
}

pub fn as_object(args: &Value) -> Result<&Map<String, Value>> {
    args.as_object()
        .ok_or_else(|| MimirError::Validation("arguments must be an object".into()))
}

pub fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| MimirError::Validation(format!("missing required string: {}", key)))
}

pub fn opt_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub fn opt_bool(args: &Map<String, Value>, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

pub fn opt_usize(args: &Map<String, Value>, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

pub fn opt_u64(args: &Map<String, Value>, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub fn opt_i64(args: &Map<String, Value>, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

pub fn opt_f32(args: &Map<String, Value>, key: &str) -> Option<f32> {
    args.get(key).and_then(Value::as_f64).map(|v| v as f32)
}

pub fn opt_object(args: &Map<String, Value>, key: &str) -> Result<Option<Properties>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(MimirError::Validation(format!("{} must be an object", key))),
    }
}

pub fn opt_str_list(args: &Map<String, Value>, key: &str) -> Result<Option<Vec<String>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => {
                        return Err(MimirError::Validation(format!(
                            "{} must be an array of strings",
                            key
                        )))
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(MimirError::Validation(format!("{} must be an array", key))),
    }
}

pub fn parse_node_type(raw: &str) -> Result<NodeType> {
    NodeType::from_str(raw).map_err(MimirError::Validation)
}

pub fn opt_node_type(args: &Map<String, Value>, key: &str) -> Result<Option<NodeType>> {
    match opt_str(args, key) {
        Some(raw) => parse_node_type(raw).map(Some),
        None => Ok(None),
    }
}

pub fn parse_search_options(args: &Map<String, Value>) -> Result<SearchOptions> {
    let types = match opt_str_list(args, "types")? {
        Some(names) => {
            let mut types = Vec::with_capacity(names.len());
            for name in names {
                types.push(parse_node_type(&name)?);
            }
            Some(types)
        }
        None => None,
    };
    let rrf = match args.get("rrf") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            serde_json::from_value::<RrfProfile>(value.clone())
                .map_err(|e| MimirError::Validation(format!("bad rrf profile: {}", e)))?,
        ),
    };
    Ok(SearchOptions {
        types,
        filters: opt_object(args, "filters")?,
        limit: opt_usize(args, "limit"),
        offset: opt_usize(args, "offset").unwrap_or(0),
        min_similarity: opt_f32(args, "minSimilarity"),
        depth: opt_usize(args, "depth").unwrap_or(1),
        rrf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_merges_into_objects() {
        let out = ok(json!({"count": 2}));
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["count"], json!(2));
    }

    #[test]
    fn fail_carries_kind_and_message() {
        let out = fail(&MimirError::NotFound("node x".into()));
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["error"]["kind"], json!("ENotFound"));
        assert!(out["error"]["message"].as_str().unwrap().contains("node x"));
    }

    #[test]
    fn search_options_parse_profile_and_filters() {
        let args = json!({
            "types": ["memory", "fileChunk"],
            "filters": {"status": "open"},
            "limit": 5,
            "minSimilarity": 0.4,
            "depth": 2,
            "rrf": {"k": 60.0, "vectorWeight": 1.5, "bm25Weight": 0.5, "minScore": 0.01},
        });
        let opts = parse_search_options(args.as_object().unwrap()).unwrap();
        assert_eq!(opts.types.as_ref().unwrap().len(), 2);
        assert_eq!(opts.limit, Some(5));
        assert_eq!(opts.depth, 2);
        assert_eq!(opts.rrf.unwrap().vector_weight, 1.5);
    }

    #[test]
    fn bad_node_type_is_a_validation_error() {
        let args = json!({"types": ["nonsense"]});
        let err = parse_search_options(args.as_object().unwrap()).unwrap_err();
        assert_eq!(err.kind(), "EValidation");
    }
}
