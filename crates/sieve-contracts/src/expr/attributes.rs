use crate::scene::{NodeId, NodeKind, NodeRef, SceneGraph};

use super::eval::{EvalError, EvalErrorKind};
use super::value::Value;

const FRAME_ATTRIBUTES: &[&str] = &[
    "id",
    "label",
    "description",
    "x",
    "y",
    "width",
    "height",
    "parent",
    "children",
    "interactables",
    "keypoints",
    "terminal",
];

const INTERACTABLE_ATTRIBUTES: &[&str] =
    &["id", "label", "x", "y", "width", "height", "selected", "frame"];

const KEYPOINT_ATTRIBUTES: &[&str] = &["id", "x", "y", "frame"];

/// Readable attribute names for a node kind.
pub fn attribute_names(kind: NodeKind) -> &'static [&'static str] {
    match kind {
        NodeKind::Frame => FRAME_ATTRIBUTES,
        NodeKind::Interactable => INTERACTABLE_ATTRIBUTES,
        NodeKind::Keypoint => KEYPOINT_ATTRIBUTES,
    }
}

/// Reads one whitelisted attribute. The whitelist is checked before the
/// graph is touched.
pub fn read_attribute(scene: &SceneGraph, node: &NodeRef, name: &str) -> Result<Value, EvalError> {
    if !attribute_names(node.kind).contains(&name) {
        return Err(EvalError::new(
            EvalErrorKind::AttributeNotWhitelisted,
            format!(
                "{} has no readable attribute '{name}' (allowed: {})",
                node.kind,
                attribute_names(node.kind).join(", ")
            ),
        ));
    }
    let missing = || {
        EvalError::new(
            EvalErrorKind::UnknownIdentifier,
            format!("{} '{}' is not in the scene", node.kind, node.id),
        )
    };
    let value = match node.kind {
        NodeKind::Frame => {
            let frame = scene.frame(&node.id).ok_or_else(missing)?;
            match name {
                "id" => Value::from(&frame.id),
                "label" => optional_text(frame.label.map(|label| label.as_str())),
                "description" => optional_text(frame.description.as_deref()),
                "x" => Value::Number(frame.bounds.x),
                "y" => Value::Number(frame.bounds.y),
                "width" => Value::Number(frame.bounds.width),
                "height" => Value::Number(frame.bounds.height),
                "parent" => frame
                    .parent
                    .as_ref()
                    .map(|id| Value::Node(handle(NodeKind::Frame, id)))
                    .unwrap_or(Value::Null),
                "children" => handles(NodeKind::Frame, &frame.children),
                "interactables" => handles(NodeKind::Interactable, &frame.interactables),
                "keypoints" => handles(NodeKind::Keypoint, &frame.keypoints),
                _ => Value::Bool(frame.is_terminal()),
            }
        }
        NodeKind::Interactable => {
            let item = scene.interactable(&node.id).ok_or_else(missing)?;
            match name {
                "id" => Value::from(&item.id),
                "label" => optional_text(item.label.map(|label| label.as_str())),
                "x" => Value::Number(item.bounds.x),
                "y" => Value::Number(item.bounds.y),
                "width" => Value::Number(item.bounds.width),
                "height" => Value::Number(item.bounds.height),
                "selected" => Value::Bool(item.selected),
                _ => Value::Node(handle(NodeKind::Frame, &item.frame)),
            }
        }
        NodeKind::Keypoint => {
            let point = scene.keypoint(&node.id).ok_or_else(missing)?;
            match name {
                "id" => Value::from(&point.id),
                "x" => Value::Number(point.x),
                "y" => Value::Number(point.y),
                _ => Value::Node(handle(NodeKind::Frame, &point.frame)),
            }
        }
    };
    Ok(value)
}

fn handle(kind: NodeKind, id: &NodeId) -> NodeRef {
    NodeRef {
        kind,
        id: id.clone(),
    }
}

fn handles(kind: NodeKind, ids: &[NodeId]) -> Value {
    Value::nodes(ids.iter().map(|id| handle(kind, id)))
}

fn optional_text(text: Option<&str>) -> Value {
    text.map(|text| Value::String(text.to_string()))
        .unwrap_or(Value::Null)
}
