//! Structural comparison of agent responses against the in-memory policy.
//!
//! Object key order never matters. List order matters unless
//! [`DiffOptions::ignore_list_order`] is set, in which case lists are compared
//! as multisets.

use anyhow::{anyhow, Result};
use diode_core::HarnessError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub ignore_list_order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    ValueChanged {
        path: String,
        expected: Value,
        actual: Value,
    },
    TypeChanged {
        path: String,
        expected: Value,
        actual: Value,
    },
    /// Present in the expected document, absent from the response.
    Missing { path: String, expected: Value },
    /// Present in the response, absent from the expected document.
    Unexpected { path: String, actual: Value },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuralDiff {
    pub changes: Vec<Change>,
}

impl StructuralDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

impl fmt::Display for StructuralDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(rendered) => f.write_str(&rendered),
            Err(_) => write!(f, "{:?}", self.changes),
        }
    }
}

pub fn diff(actual: &Value, expected: &Value) -> StructuralDiff {
    diff_with(actual, expected, DiffOptions::default())
}

pub fn diff_with(actual: &Value, expected: &Value, options: DiffOptions) -> StructuralDiff {
    let mut out = StructuralDiff::default();
    walk("root", actual, expected, options, &mut out.changes);
    out
}

/// Fails with [`HarnessError::AssertionFailure`] carrying the full diff when
/// `actual` and `expected` differ.
pub fn assert_no_diff(actual: &Value, expected: &Value, what: &str) -> Result<()> {
    let found = diff(actual, expected);
    if found.is_empty() {
        return Ok(());
    }
    Err(anyhow!(HarnessError::AssertionFailure(format!(
        "{} is different of policy set in body request. {}",
        what, found
    ))))
}

fn walk(path: &str, actual: &Value, expected: &Value, options: DiffOptions, out: &mut Vec<Change>) {
    match (actual, expected) {
        (Value::Object(a), Value::Object(e)) => {
            for (key, expected_value) in e {
                let child = format!("{}['{}']", path, key);
                match a.get(key) {
                    Some(actual_value) => walk(&child, actual_value, expected_value, options, out),
                    None => out.push(Change::Missing {
                        path: child,
                        expected: expected_value.clone(),
                    }),
                }
            }
            for (key, actual_value) in a {
                if !e.contains_key(key) {
                    out.push(Change::Unexpected {
                        path: format!("{}['{}']", path, key),
                        actual: actual_value.clone(),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(e)) if options.ignore_list_order => {
            let mut unmatched: Vec<&Value> = a.iter().collect();
            for expected_item in e {
                match unmatched.iter().position(|item| *item == expected_item) {
                    Some(idx) => {
                        unmatched.swap_remove(idx);
                    }
                    None => out.push(Change::Missing {
                        path: format!("{}[*]", path),
                        expected: expected_item.clone(),
                    }),
                }
            }
            for item in unmatched {
                out.push(Change::Unexpected {
                    path: format!("{}[*]", path),
                    actual: item.clone(),
                });
            }
        }
        (Value::Array(a), Value::Array(e)) => {
            for (idx, expected_item) in e.iter().enumerate() {
                let child = format!("{}[{}]", path, idx);
                match a.get(idx) {
                    Some(actual_item) => walk(&child, actual_item, expected_item, options, out),
                    None => out.push(Change::Missing {
                        path: child,
                        expected: expected_item.clone(),
                    }),
                }
            }
            for (idx, actual_item) in a.iter().enumerate().skip(e.len()) {
                out.push(Change::Unexpected {
                    path: format!("{}[{}]", path, idx),
                    actual: actual_item.clone(),
                });
            }
        }
        _ if actual == expected => {}
        _ if kind_of(actual) != kind_of(expected) => out.push(Change::TypeChanged {
            path: path.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        }),
        _ => out.push(Change::ValueChanged {
            path: path.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
