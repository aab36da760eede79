//! XML response decoding
//!
//! Query, EC2 and REST-XML services answer in XML without any schema on our
//! side, so documents are decoded structurally into `serde_json::Value`:
//!
//! - an element with text only becomes a string, an empty one `null`
//! - an element whose children are all list entries (`member`, `item` or a
//!   service-specific name such as `DBInstance`) becomes an array
//! - an element whose children are all `entry` pairs becomes a map
//! - anything else becomes an object; repeated names collect into an array
//!
//! Attributes and namespaces are ignored.

use crate::resource::Protocol;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

const LIST_ENTRIES: &[&str] = &["member", "item"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed XML: {0}")]
pub struct XmlError(String);

#[derive(Default)]
struct Node {
    name: String,
    children: Vec<(String, Value)>,
    text: String,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn finish(self, is_root: bool, list_items: &[String]) -> Value {
        if self.children.is_empty() {
            let text = self.text.trim();
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
        }

        let is_entry =
            |name: &str| LIST_ENTRIES.contains(&name) || list_items.iter().any(|i| i == name);
        if !is_root && self.children.iter().all(|(name, _)| is_entry(name)) {
            return Value::Array(self.children.into_iter().map(|(_, v)| v).collect());
        }

        if self.children.iter().all(|(name, _)| name == "entry") {
            let mut map = Map::new();
            for (_, mut entry) in self.children {
                let key = entry.get("key").and_then(|k| k.as_str()).map(str::to_string);
                if let Some(key) = key {
                    let value = entry.get_mut("value").map(Value::take).unwrap_or(Value::Null);
                    map.insert(key, value);
                }
            }
            return Value::Object(map);
        }

        let mut map = Map::new();
        for (name, value) in self.children {
            match map.get_mut(&name) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                },
                None => {
                    map.insert(name, value);
                },
            }
        }
        Value::Object(map)
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Parse a document into its root element name and decoded value
pub fn parse(body: &str, list_items: &[String]) -> Result<(String, Value), XmlError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    let close = |stack: &mut Vec<Node>, node: Node| -> Option<(String, Value)> {
        let name = node.name.clone();
        let is_root = stack.is_empty();
        let value = node.finish(is_root, list_items);
        match stack.last_mut() {
            Some(parent) => {
                parent.children.push((name, value));
                None
            },
            None => Some((name, value)),
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Node::new(local_name(e.local_name().as_ref()))),
            Ok(Event::Empty(e)) => {
                let node = Node::new(local_name(e.local_name().as_ref()));
                if let Some(done) = close(&mut stack, node) {
                    root = Some(done);
                }
            },
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| XmlError("unbalanced end tag".to_string()))?;
                if let Some(done) = close(&mut stack, node) {
                    root = Some(done);
                }
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| XmlError(e.to_string()))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            },
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(XmlError(format!("at byte {}: {}", reader.buffer_position(), e))),
        }
    }

    if !stack.is_empty() {
        return Err(XmlError("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| XmlError("no root element".to_string()))
}

/// Decode a successful response into the operation's output
pub fn decode(body: &str, protocol: Protocol, list_items: &[String]) -> Result<Value, XmlError> {
    let (name, root) = parse(body, list_items)?;
    Ok(match protocol {
        Protocol::Query => unwrap_query(root),
        Protocol::Ec2 => without(root, "requestId"),
        _ => match root {
            Value::Object(_) => root,
            other => {
                let mut map = Map::new();
                map.insert(name, other);
                Value::Object(map)
            },
        },
    })
}

/// `<XResponse><XResult>...</XResult><ResponseMetadata/></XResponse>` -> the result
fn unwrap_query(root: Value) -> Value {
    let Value::Object(mut map) = root else {
        return Value::Object(Map::new());
    };
    let result_key = map.keys().find(|k| k.ends_with("Result")).cloned();
    match result_key.and_then(|k| map.remove(&k)) {
        Some(Value::Null) => Value::Object(Map::new()),
        Some(result) => result,
        None => {
            map.remove("ResponseMetadata");
            Value::Object(map)
        },
    }
}

fn without(root: Value, key: &str) -> Value {
    match root {
        Value::Object(mut map) => {
            map.remove(key);
            Value::Object(map)
        },
        _ => Value::Object(Map::new()),
    }
}

/// Error code and message of an error document, in any of the
/// `<ErrorResponse><Error>`, `<Response><Errors><Error>` or `<Error>` shapes
pub fn error_fields(body: &str) -> (Option<String>, Option<String>) {
    let Ok((_, root)) = parse(body, &[]) else {
        return (None, None);
    };

    let nested = root
        .pointer("/Errors/Error")
        .map(|e| match e {
            Value::Array(errors) => errors.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        })
        .or_else(|| root.get("Error").cloned())
        .unwrap_or(root);

    let field = |name: &str| nested.get(name).and_then(|v| v.as_str()).map(str::to_string);
    (field("Code"), field("Message"))
}
