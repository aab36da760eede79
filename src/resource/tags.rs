//! Tag normalization
//!
//! Services report tags either as a list of `{Key, Value}` pairs (field names
//! vary per service) or as a plain map. Both become one [`TagMap`]. A key
//! seen more than once collects all of its values into a list, in order.

use crate::fieldpath::scalar_to_string;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One tag value, or several when the key repeats
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    One(String),
    Many(Vec<String>),
}

impl TagValue {
    /// The value when the key was seen once
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::One(v) => Some(v),
            TagValue::Many(_) => None,
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            TagValue::One(v) => vec![v.as_str()],
            TagValue::Many(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            TagValue::One(first) => {
                let first = std::mem::take(first);
                *self = TagValue::Many(vec![first, value]);
            },
            TagValue::Many(vs) => vs.push(value),
        }
    }
}

pub type TagMap = BTreeMap<String, TagValue>;

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => scalar_to_string(v).unwrap_or_else(|| v.to_string()),
    }
}

fn insert(tags: &mut TagMap, key: String, value: String) {
    match tags.get_mut(&key) {
        Some(existing) => existing.push(value),
        None => {
            tags.insert(key, TagValue::One(value));
        },
    }
}

/// Normalize a tag source using `key_field`/`value_field` as pair field names
pub fn normalize_tags(source: &Value, key_field: &str, value_field: &str) -> TagMap {
    let mut tags = TagMap::new();

    match source {
        Value::Array(pairs) => {
            for pair in pairs {
                match pair.get(key_field).and_then(scalar_to_string) {
                    Some(key) => insert(&mut tags, key, render(pair.get(value_field))),
                    None => tracing::debug!("skipping tag entry without '{}': {}", key_field, pair),
                }
            }
        },
        Value::Object(map) => {
            let is_pair =
                map.len() == 2 && map.contains_key(key_field) && map.contains_key(value_field);
            match map.get(key_field).and_then(scalar_to_string) {
                Some(key) if is_pair => insert(&mut tags, key, render(map.get(value_field))),
                _ => {
                    for (key, value) in map {
                        insert(&mut tags, key.clone(), render(Some(value)));
                    }
                },
            }
        },
        Value::Null => {},
        other => tracing::debug!("ignoring tag source that is neither list nor map: {}", other),
    }

    tags
}
