//! JSON output
//!
//! Resources are written as pretty-printed JSON with sorted keys. With
//! `normalize`, CamelCase keys become snake_case all the way down, so that
//! `CreationDateTime` and `creationDateTime` both read `creation_date_time`.

use crate::resource::ResourceInstance;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

fn first_cap() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("(.)([A-Z][a-z]+)").expect("static regex"))
}

fn all_cap() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("([a-z0-9])([A-Z])").expect("static regex"))
}

/// `DBInstanceIdentifier` -> `db_instance_identifier`
pub fn to_snake_case(name: &str) -> String {
    let step = first_cap().replace_all(name, "${1}_${2}");
    all_cap().replace_all(&step, "${1}_${2}").to_lowercase()
}

/// Rewrite every object key to snake_case
pub fn normalize_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (to_snake_case(k), normalize_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize_keys).collect()),
        other => other.clone(),
    }
}

/// The document written for one resource. Tags are included once fetched.
pub fn document(resource: &ResourceInstance) -> Value {
    let mut doc = json!({
        "arn": resource.arn(),
        "id": resource.id(),
        "service": resource.service(),
        "region": resource.region(),
        "account": resource.account(),
        "resource_type": resource.resource_type(),
        "name": resource.name(),
        "date": resource.date(),
        "data": resource.data(),
    });
    if let (Value::Object(map), Some(tags)) = (&mut doc, resource.cached_tags()) {
        map.insert("tags".to_string(), json!(tags));
    }
    if let (Value::Object(map), Some(filtered)) = (&mut doc, resource.filtered_data()) {
        map.insert("filtered".to_string(), filtered.clone());
    }
    doc
}

/// Pretty JSON for a value, keys sorted, optionally snake_cased
pub fn value_to_json(value: &Value, normalize: bool) -> serde_json::Result<String> {
    if normalize {
        serde_json::to_string_pretty(&normalize_keys(value))
    } else {
        serde_json::to_string_pretty(value)
    }
}

/// Pretty JSON for one resource
pub fn to_json(resource: &ResourceInstance, normalize: bool) -> serde_json::Result<String> {
    value_to_json(&document(resource), normalize)
}
