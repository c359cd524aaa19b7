use sieve_contracts::expr::{EvalError, EvalErrorKind, Value};
use sieve_contracts::scene::{
    Axis, ElementLabel, FrameLabel, NodeId, NodeKind, NodeRef, SceneGraph,
};

use crate::executor::StepFailure;
use crate::tools::CallArgs;

pub const FRAME_METHODS: &[&str] = &[
    "split",
    "grid",
    "tile",
    "mark",
    "get_interactable",
    "get_keypoint",
];
pub const INTERACTABLE_METHODS: &[&str] = &["mark", "select", "deselect"];
pub const KEYPOINT_METHODS: &[&str] = &["get_neighbour"];

pub fn method_names(kind: NodeKind) -> &'static [&'static str] {
    match kind {
        NodeKind::Frame => FRAME_METHODS,
        NodeKind::Interactable => INTERACTABLE_METHODS,
        NodeKind::Keypoint => KEYPOINT_METHODS,
    }
}

/// Invokes a whitelisted method. Callers check [`method_names`] first; an
/// unlisted name still fails here.
pub fn call_method(
    scene: &mut SceneGraph,
    node: &NodeRef,
    method: &str,
    values: &[Value],
) -> Result<Value, StepFailure> {
    let call = format!("{}.{method}", node.id);
    let id = &node.id;
    match (node.kind, method) {
        (NodeKind::Frame, "split") => {
            let args = CallArgs::new(&call, values, 2)?;
            let axis = args.parsed(0, Axis::NAMES, Axis::parse)?;
            let children = scene.split_frame(id, axis, args.number(1)?)?;
            Ok(nodes(NodeKind::Frame, children))
        }
        (NodeKind::Frame, "grid") => {
            let args = CallArgs::new(&call, values, 2)?;
            let children = scene.grid_frame(id, args.count(0)? as u64, args.count(1)? as u64)?;
            Ok(nodes(NodeKind::Frame, children))
        }
        (NodeKind::Frame, "tile") => {
            let args = CallArgs::new(&call, values, 2)?;
            let label = args.parsed(1, ElementLabel::NAMES, ElementLabel::parse)?;
            let tiles = scene.tile_frame(id, args.count(0)? as u64, label)?;
            Ok(nodes(NodeKind::Interactable, tiles))
        }
        (NodeKind::Frame, "mark") => {
            let args = CallArgs::new(&call, values, 1)?;
            scene.label_frame(id, args.parsed(0, FrameLabel::NAMES, FrameLabel::parse)?)?;
            Ok(Value::Node(node.clone()))
        }
        (NodeKind::Frame, "get_interactable") | (NodeKind::Frame, "get_keypoint") => {
            let args = CallArgs::new(&call, values, 1)?;
            let index = args.count(0)?;
            let frame = scene.frame(id).ok_or_else(|| missing(node))?;
            let (kind, owned) = if method == "get_interactable" {
                (NodeKind::Interactable, &frame.interactables)
            } else {
                (NodeKind::Keypoint, &frame.keypoints)
            };
            nth(kind, owned, index)
        }
        (NodeKind::Interactable, "mark") => {
            let args = CallArgs::new(&call, values, 1)?;
            scene.label_element(id, args.parsed(0, ElementLabel::NAMES, ElementLabel::parse)?)?;
            Ok(Value::Node(node.clone()))
        }
        (NodeKind::Interactable, "select") | (NodeKind::Interactable, "deselect") => {
            CallArgs::new(&call, values, 0)?;
            scene.set_selected(id, method == "select")?;
            Ok(Value::Node(node.clone()))
        }
        (NodeKind::Keypoint, "get_neighbour") => {
            let args = CallArgs::new(&call, values, 1)?;
            let neighbours = scene.keypoint_neighbours(id)?;
            nth(NodeKind::Keypoint, &neighbours, args.count(0)?)
        }
        _ => Err(StepFailure::MethodNotAllowed {
            kind: node.kind,
            method: method.to_string(),
            allowed: method_names(node.kind).join(", "),
        }),
    }
}

fn nodes(kind: NodeKind, ids: Vec<NodeId>) -> Value {
    Value::nodes(ids.into_iter().map(|id| NodeRef { kind, id }))
}

fn nth(kind: NodeKind, ids: &[NodeId], index: usize) -> Result<Value, StepFailure> {
    ids.get(index)
        .map(|id| {
            Value::Node(NodeRef {
                kind,
                id: id.clone(),
            })
        })
        .ok_or_else(|| {
            StepFailure::Eval(EvalError::new(
                EvalErrorKind::IndexOutOfRange,
                format!("no {kind} at index {index} (have {})", ids.len()),
            ))
        })
}

fn missing(node: &NodeRef) -> StepFailure {
    StepFailure::Eval(EvalError::new(
        EvalErrorKind::UnknownIdentifier,
        format!("{} '{}' is not in the scene", node.kind, node.id),
    ))
}

#[cfg(test)]
mod tests {
    use sieve_contracts::scene::Rect;

    use super::*;

    fn frame(scene: &SceneGraph, id: &str) -> NodeRef {
        scene.resolve(id).unwrap()
    }

    #[test]
    fn frame_methods_mutate_and_return_handles() {
        let mut scene = SceneGraph::new();
        scene.add_root_frame(Rect::new(0.0, 0.0, 90.0, 90.0)).unwrap();
        let root = frame(&scene, "f0");

        let cells = call_method(&mut scene, &root, "grid", &[Value::Number(3.0), Value::Number(3.0)]).unwrap();
        assert_eq!(cells.to_json().as_array().map(Vec::len), Some(9));

        let cell = frame(&scene, "f5");
        call_method(&mut scene, &cell, "mark", &[Value::String("selectable".into())]).unwrap();
        assert_eq!(scene.frame(&cell.id).and_then(|f| f.label), Some(FrameLabel::Selectable));

        let err = call_method(&mut scene, &root, "grid", &[Value::Number(2.0), Value::Number(2.0)]).unwrap_err();
        assert_eq!(err.kind(), "scene_precondition");
    }

    #[test]
    fn keypoint_neighbours_and_indexed_lookup() {
        let mut scene = SceneGraph::new();
        let root = scene.add_root_frame(Rect::new(0.0, 0.0, 100.0, 100.0)).unwrap();
        scene.add_keypoint(&root, 10.0, 10.0).unwrap();
        scene.add_keypoint(&root, 90.0, 90.0).unwrap();
        scene.add_keypoint(&root, 20.0, 10.0).unwrap();
        let root_ref = frame(&scene, "f0");

        let first = call_method(&mut scene, &root_ref, "get_keypoint", &[Value::Number(0.0)]).unwrap();
        let first = first.as_node().cloned().unwrap();
        let nearest = call_method(&mut scene, &first, "get_neighbour", &[Value::Number(0.0)]).unwrap();
        assert_eq!(nearest.to_json(), "k2");

        let err = call_method(&mut scene, &first, "get_neighbour", &[Value::Number(5.0)]).unwrap_err();
        assert_eq!(err.kind(), "index_out_of_range");
        let err = call_method(&mut scene, &root_ref, "get_interactable", &[Value::Number(0.0)]).unwrap_err();
        assert_eq!(err.kind(), "index_out_of_range");
    }

    #[test]
    fn unlisted_methods_are_refused_even_when_called_directly() {
        let mut scene = SceneGraph::new();
        scene.add_root_frame(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let root = frame(&scene, "f0");
        let err = call_method(&mut scene, &root, "select", &[]).unwrap_err();
        assert_eq!(err.kind(), "method_not_allowed");
    }
}
