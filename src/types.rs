//! Core types for the state bus.

use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A document tree: string keys mapping to scalars or nested trees.
///
/// Keys are kept sorted so serialized deltas are deterministic.
pub type Tree = BTreeMap<String, Value>;

/// A value stored in a document tree.
///
/// Arrays have no representation here. They are dropped (with a warning)
/// when converting from `serde_json::Value`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Tree(Tree),
}

impl Value {
    /// Convert a JSON value. Returns `None` for arrays.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        convert("", value)
    }

    /// Convert back to a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Tree(tree) => serde_json::Value::Object(
                tree.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Value::Tree(_))
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Value::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, for log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Tree(_) => "tree",
        }
    }
}

/// Convert a JSON object into a tree, dropping array values.
pub fn tree_from_json(map: serde_json::Map<String, serde_json::Value>) -> Tree {
    convert_map("", map)
}

fn convert(path: &str, value: serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => Some(Value::Null),
        serde_json::Value::Bool(b) => Some(Value::Bool(b)),
        serde_json::Value::Number(n) => Some(Value::Number(n)),
        serde_json::Value::String(s) => Some(Value::String(s)),
        serde_json::Value::Array(_) => {
            tracing::warn!(path = %path, "Array values are not supported, skipping");
            None
        }
        serde_json::Value::Object(map) => Some(Value::Tree(convert_map(path, map))),
    }
}

fn convert_map(prefix: &str, map: serde_json::Map<String, serde_json::Value>) -> Tree {
    let mut tree = Tree::new();
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        if let Some(v) = convert(&path, value) {
            tree.insert(key, v);
        }
    }
    tree
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Tree(tree) => serializer.collect_map(tree.iter()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl From<Tree> for Value {
    fn from(tree: Tree) -> Self {
        Value::Tree(tree)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

/// Unique identifier for a subscription.
///
/// Ids are strictly increasing in creation order; deliveries for a single
/// publish go out in ascending id order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
