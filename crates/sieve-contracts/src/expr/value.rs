use serde_json::{Map, Number};

use crate::scene::{NodeId, NodeRef};

/// Runtime value produced by expressions, actions and tools.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Node(NodeRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Node(node) => node.kind.as_str(),
        }
    }

    pub fn nodes(ids: impl IntoIterator<Item = NodeRef>) -> Self {
        Value::List(ids.into_iter().map(Value::Node).collect())
    }

    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// A non-negative integral number usable as a sequence index or count.
    pub fn as_index(&self) -> Option<usize> {
        let number = self.as_f64()?;
        if number < 0.0 || number.fract() != 0.0 || number > usize::MAX as f64 {
            return None;
        }
        Some(number as usize)
    }

    /// JSON rendering for feedback and results. Nodes render as their id.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Number(number) => number_to_json(*number),
            Value::String(text) => serde_json::Value::String(text.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Node(node) => serde_json::Value::String(node.id.to_string()),
        }
    }

    /// Typed rendering that keeps node kinds, used in traces.
    pub fn to_tagged_json(&self) -> serde_json::Value {
        match self {
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_tagged_json).collect())
            }
            Value::Node(node) => {
                let mut map = Map::new();
                map.insert(
                    node.kind.as_str().to_string(),
                    serde_json::Value::String(node.id.to_string()),
                );
                serde_json::Value::Object(map)
            }
            other => other.to_json(),
        }
    }
}

impl From<NodeRef> for Value {
    fn from(node: NodeRef) -> Self {
        Value::Node(node)
    }
}

impl From<&NodeId> for Value {
    fn from(id: &NodeId) -> Self {
        Value::String(id.to_string())
    }
}

fn number_to_json(number: f64) -> serde_json::Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        return serde_json::Value::Number(Number::from(number as i64));
    }
    Number::from_f64(number)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
