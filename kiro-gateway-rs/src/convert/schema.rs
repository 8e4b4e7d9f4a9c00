//! JSON Schema sanitization for Kiro API compatibility.
//!
//! Kiro's API is stricter about JSON Schema than Anthropic's.
//! This module cleans up schemas to avoid validation errors.

use serde_json::Value;

/// Sanitize a JSON Schema for Kiro compatibility.
///
/// Removes:
/// - Empty `required` arrays
/// - `additionalProperties` anywhere
/// - `properties` entries whose key begins with `$` (MCP-style OData params
///   the upstream rejects)
/// - `$schema`, unless it sits at the schema root (not inside `properties`)
pub fn sanitize_json_schema(schema: &Value) -> Value {
    sanitize_node(schema, true)
}

fn sanitize_node(value: &Value, is_root: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (key, val) in map {
                match key.as_str() {
                    "required" => {
                        if let Value::Array(arr) = val {
                            if !arr.is_empty() {
                                result.insert(key.clone(), val.clone());
                            }
                        } else {
                            result.insert(key.clone(), val.clone());
                        }
                    }
                    "additionalProperties" => {}
                    "$schema" => {
                        if is_root {
                            result.insert(key.clone(), val.clone());
                        }
                    }
                    "properties" => {
                        if let Value::Object(props) = val {
                            let mut filtered = serde_json::Map::new();
                            for (pkey, pval) in props {
                                if pkey.starts_with('$') {
                                    continue;
                                }
                                filtered.insert(pkey.clone(), sanitize_node(pval, false));
                            }
                            result.insert(key.clone(), Value::Object(filtered));
                        } else {
                            result.insert(key.clone(), sanitize_node(val, false));
                        }
                    }
                    _ => {
                        result.insert(key.clone(), sanitize_node(val, false));
                    }
                }
            }
            Value::Object(result)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| sanitize_node(v, false)).collect()),
        other => other.clone(),
    }
}
