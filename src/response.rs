//! Response envelopes keyed by the resource name.

use serde_json::{Map, Value};

/// `{ "<plural>": [...], "length": <total> }`
pub fn collection(plural: &str, models: Vec<Value>, length: u64) -> Value {
    let mut body = Map::new();
    body.insert(plural.to_string(), Value::Array(models));
    body.insert("length".to_string(), Value::from(length));
    Value::Object(body)
}

/// `{ "<name>": {...} }`
pub fn single(name: &str, model: Value) -> Value {
    let mut body = Map::new();
    body.insert(name.to_string(), model);
    Value::Object(body)
}
