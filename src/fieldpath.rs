//! Field paths
//!
//! A small expression language for pulling values out of nested JSON:
//!
//! - `a.b` walks object keys
//! - `a[0]` takes one list element (negative indexes count from the end)
//! - `a[]` flattens a list one level and projects the rest of the path over
//!   every element, dropping elements where the rest of the path is absent
//!
//! `Reservations[].Instances[]` therefore yields one flat list of instances.
//! A missing path is never an error, it is simply `None`.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid field path '{expr}': {reason}")]
pub struct FieldPathError {
    pub expr: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(i64),
    Flatten,
}

/// A parsed field path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    expr: String,
    steps: Vec<Step>,
}

impl FieldPath {
    /// Parse an expression. The empty expression addresses the whole value.
    pub fn parse(expr: &str) -> Result<Self, FieldPathError> {
        let expr = expr.trim();
        let fail = |reason: &str| FieldPathError {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut steps = Vec::new();
        let mut name = String::new();
        let mut chars = expr.chars().peekable();
        // True right after a '.', where a key name is mandatory
        let mut expect_key = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if name.is_empty() && (expect_key || steps.is_empty()) {
                        return Err(fail("empty key"));
                    }
                    if !name.is_empty() {
                        steps.push(Step::Key(std::mem::take(&mut name)));
                    }
                    expect_key = true;
                },
                '[' => {
                    if !name.is_empty() {
                        steps.push(Step::Key(std::mem::take(&mut name)));
                    } else if expect_key {
                        return Err(fail("empty key before '['"));
                    }
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(fail("unterminated '['")),
                        }
                    }
                    let inner = inner.trim();
                    if inner.is_empty() || inner == "*" {
                        steps.push(Step::Flatten);
                    } else {
                        let idx = inner
                            .parse::<i64>()
                            .map_err(|_| fail("index must be an integer"))?;
                        steps.push(Step::Index(idx));
                    }
                    match chars.peek() {
                        None | Some('.') | Some('[') => {},
                        Some(_) => return Err(fail("expected '.' or '[' after ']'")),
                    }
                    expect_key = false;
                },
                ']' => return Err(fail("unbalanced ']'")),
                c => {
                    name.push(c);
                    expect_key = false;
                },
            }
        }

        if expect_key {
            return Err(fail("trailing '.'"));
        }
        if !name.is_empty() {
            steps.push(Step::Key(name));
        }

        Ok(Self {
            expr: expr.to_string(),
            steps,
        })
    }

    /// The expression this path was parsed from
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// True for the empty expression
    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Evaluate against a value. JSON `null` counts as absent.
    pub fn search(&self, value: &Value) -> Option<Value> {
        match eval(value, &self.steps) {
            Some(Value::Null) | None => None,
            found => found,
        }
    }

    /// Evaluate and render a scalar result as a string
    pub fn search_str(&self, value: &Value) -> Option<String> {
        self.search(value).as_ref().and_then(scalar_to_string)
    }

    /// If this path is a single key, return it
    pub fn single_key(&self) -> Option<&str> {
        match self.steps.as_slice() {
            [Step::Key(k)] => Some(k),
            _ => None,
        }
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl<'de> serde::Deserialize<'de> for FieldPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        Self::parse(&expr).map_err(serde::de::Error::custom)
    }
}

fn eval(value: &Value, steps: &[Step]) -> Option<Value> {
    let Some((step, rest)) = steps.split_first() else {
        return Some(value.clone());
    };

    match step {
        Step::Key(key) => eval(value.as_object()?.get(key)?, rest),
        Step::Index(idx) => {
            let items = value.as_array()?;
            let pos = if *idx < 0 {
                items.len().checked_sub(idx.unsigned_abs() as usize)?
            } else {
                *idx as usize
            };
            eval(items.get(pos)?, rest)
        },
        Step::Flatten => {
            let items = value.as_array()?;
            let nested_flatten = rest.contains(&Step::Flatten);
            let mut out = Vec::new();

            let flattened = items.iter().flat_map(|item| match item {
                Value::Array(inner) => inner.iter().collect::<Vec<_>>(),
                other => vec![other],
            });
            for item in flattened {
                match eval(item, rest) {
                    None | Some(Value::Null) => {},
                    Some(Value::Array(projected)) if nested_flatten => out.extend(projected),
                    Some(projected) => out.push(projected),
                }
            }

            Some(Value::Array(out))
        },
    }
}

/// Render a scalar JSON value as a string; lists, objects and null yield `None`
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse-and-search in one go; an invalid expression yields `None`
pub fn search(expr: &str, value: &Value) -> Option<Value> {
    match FieldPath::parse(expr) {
        Ok(path) => path.search(value),
        Err(e) => {
            tracing::debug!("{}", e);
            None
        },
    }
}
