//! JSON value helpers shared by the interpreter and the session layer

use serde_json::{Map, Value as JsonValue};

/// Workflow parameters: always a JSON object while the interpreter runs
pub type Params = Map<String, JsonValue>;

/// Lexical environment handed to a function task: symbol -> value
pub type Env = Map<String, JsonValue>;

/// Independent structural copy of a value
///
/// Every capture point (stack snapshots, let bindings, persisted records,
/// literals) goes through here so no two owners ever share a subtree.
pub fn deep_copy(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), deep_copy(v)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(deep_copy).collect()),
        scalar => scalar.clone(),
    }
}

/// Deep copy of a parameter object
pub fn copy_params(params: &Params) -> Params {
    params
        .iter()
        .map(|(k, v)| (k.clone(), deep_copy(v)))
        .collect()
}

/// Coerce any value into a parameter object
///
/// Objects pass through; anything else (including arrays) becomes `{value: v}`.
pub fn into_params(value: JsonValue) -> Params {
    match value {
        JsonValue::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Does this parameter object carry a workflow error?
pub fn is_error(params: &Params) -> bool {
    params.contains_key("error")
}
