use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::graph::{FrameRelation, Interaction};
use super::{ElementLabel, FrameLabel, NodeId, NodeKind, Rect, SceneError, SceneGraph};

/// Serialized form exchanged with the capture collaborator.
///
/// Ids are optional on input; missing ids are allocated in document order
/// after every explicit id has been reserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub frames: Vec<FrameSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<Interaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    pub bounds: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<FrameLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<FrameRelation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactables: Vec<InteractableSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keypoints: Vec<KeypointSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FrameSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractableSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    pub bounds: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<ElementLabel>,
    #[serde(default)]
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    pub x: f64,
    pub y: f64,
}

impl SceneGraph {
    pub fn from_snapshot(snapshot: &SceneSnapshot) -> Result<Self, SceneError> {
        let mut scene = SceneGraph::new();
        let mut seen = HashSet::new();
        let mut ceilings = [0u64; 3];
        for frame in &snapshot.frames {
            reserve_ids(frame, &mut seen, &mut ceilings)?;
        }
        scene.bump_counters(ceilings[0], ceilings[1], ceilings[2]);

        // Relations may point at frames loaded later in the document.
        let mut relations = Vec::new();
        for frame in &snapshot.frames {
            let id = frame
                .id
                .clone()
                .unwrap_or_else(|| scene.allocate(NodeKind::Frame));
            if !frame.bounds.is_valid() {
                return Err(SceneError::InvalidBounds(format!("root frame '{id}'")));
            }
            scene.insert_frame(id.clone(), None, frame.bounds);
            scene.push_root(id.clone());
            load_frame(&mut scene, &id, frame, &mut relations)?;
        }
        for (from, relation) in relations {
            scene.relate_frames(&from, relation.to.as_ref(), &relation.relationship)?;
        }
        scene.restore_interactions(snapshot.interactions.clone());
        if let Some(objective) = &snapshot.objective {
            scene.set_objective(objective);
        }
        Ok(scene)
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            frames: self
                .roots()
                .iter()
                .filter_map(|id| self.frame_snapshot(id))
                .collect(),
            interactions: self.interactions().to_vec(),
            objective: self.objective().map(str::to_string),
        }
    }

    fn frame_snapshot(&self, id: &NodeId) -> Option<FrameSnapshot> {
        let frame = self.frame(id)?;
        Some(FrameSnapshot {
            id: Some(frame.id.clone()),
            bounds: frame.bounds,
            label: frame.label,
            description: frame.description.clone(),
            relations: frame.relations.clone(),
            interactables: frame
                .interactables
                .iter()
                .filter_map(|item_id| self.interactable(item_id))
                .map(|item| InteractableSnapshot {
                    id: Some(item.id.clone()),
                    bounds: item.bounds,
                    label: item.label,
                    selected: item.selected,
                })
                .collect(),
            keypoints: frame
                .keypoints
                .iter()
                .filter_map(|point_id| self.keypoint(point_id))
                .map(|point| KeypointSnapshot {
                    id: Some(point.id.clone()),
                    x: point.x,
                    y: point.y,
                })
                .collect(),
            children: frame
                .children
                .iter()
                .filter_map(|child| self.frame_snapshot(child))
                .collect(),
        })
    }
}

fn load_frame(
    scene: &mut SceneGraph,
    id: &NodeId,
    frame: &FrameSnapshot,
    relations: &mut Vec<(NodeId, FrameRelation)>,
) -> Result<(), SceneError> {
    if let Some(label) = frame.label {
        scene.label_frame(id, label)?;
    }
    if let Some(description) = &frame.description {
        scene.describe_frame(id, description)?;
    }
    relations.extend(frame.relations.iter().map(|relation| (id.clone(), relation.clone())));
    for child in &frame.children {
        let child_id = child
            .id
            .clone()
            .unwrap_or_else(|| scene.allocate(NodeKind::Frame));
        scene.attach_child(id, child_id.clone(), child.bounds)?;
        load_frame(scene, &child_id, child, relations)?;
    }
    for item in &frame.interactables {
        let item_id = item
            .id
            .clone()
            .unwrap_or_else(|| scene.allocate(NodeKind::Interactable));
        scene.attach_interactable(item_id.clone(), id, item.bounds)?;
        let entry = scene.interactable_entry(&item_id)?;
        entry.label = item.label;
        entry.selected = item.selected;
    }
    for point in &frame.keypoints {
        let point_id = point
            .id
            .clone()
            .unwrap_or_else(|| scene.allocate(NodeKind::Keypoint));
        scene.attach_keypoint(point_id, id, point.x, point.y)?;
    }
    Ok(())
}

fn reserve_ids(
    frame: &FrameSnapshot,
    seen: &mut HashSet<NodeId>,
    ceilings: &mut [u64; 3],
) -> Result<(), SceneError> {
    reserve(frame.id.as_ref(), NodeKind::Frame, seen, &mut ceilings[0])?;
    for item in &frame.interactables {
        reserve(item.id.as_ref(), NodeKind::Interactable, seen, &mut ceilings[1])?;
    }
    for point in &frame.keypoints {
        reserve(point.id.as_ref(), NodeKind::Keypoint, seen, &mut ceilings[2])?;
    }
    for child in &frame.children {
        reserve_ids(child, seen, ceilings)?;
    }
    Ok(())
}

fn reserve(
    id: Option<&NodeId>,
    kind: NodeKind,
    seen: &mut HashSet<NodeId>,
    ceiling: &mut u64,
) -> Result<(), SceneError> {
    let Some(id) = id else {
        return Ok(());
    };
    let Some(ordinal) = id.ordinal(kind) else {
        return Err(SceneError::InvalidId(id.clone()));
    };
    if !seen.insert(id.clone()) {
        return Err(SceneError::InvalidId(id.clone()));
    }
    let next = ordinal
        .checked_add(1)
        .ok_or_else(|| SceneError::InvalidId(id.clone()))?;
    *ceiling = (*ceiling).max(next);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::scene::Axis;

    #[test]
    fn snapshot_without_ids_allocates_in_document_order() -> anyhow::Result<()> {
        let snapshot: SceneSnapshot = serde_json::from_value(json!({
            "frames": [
                {
                    "bounds": {"x": 0, "y": 0, "width": 300, "height": 300},
                    "description": "grid of nine photos",
                    "interactables": [
                        {"bounds": {"x": 0, "y": 0, "width": 100, "height": 100}}
                    ],
                    "keypoints": [{"x": 150, "y": 150}]
                },
                {"bounds": {"x": 0, "y": 300, "width": 300, "height": 40}}
            ]
        }))?;
        let scene = SceneGraph::from_snapshot(&snapshot)?;
        assert_eq!(scene.roots(), &[NodeId::from("f0"), NodeId::from("f1")]);
        assert!(scene.interactable(&NodeId::from("i0")).is_some());
        assert!(scene.keypoint(&NodeId::from("k0")).is_some());
        assert_eq!(
            scene.frame(&NodeId::from("f0")).and_then(|f| f.description.clone()),
            Some("grid of nine photos".to_string())
        );
        Ok(())
    }

    #[test]
    fn exported_snapshot_reloads_with_same_ids() -> anyhow::Result<()> {
        let mut scene = SceneGraph::new();
        let root = scene.add_root_frame(Rect::new(0.0, 0.0, 100.0, 100.0))?;
        let children = scene.split_frame(&root, Axis::Y, 0.5)?;
        scene.tile_frame(&children[0], 2, ElementLabel::Clickable)?;

        let reloaded = SceneGraph::from_snapshot(&scene.snapshot())?;
        assert_eq!(reloaded.snapshot(), scene.snapshot());

        let mut grown = reloaded.clone();
        let next = grown.split_frame(&children[1], Axis::X, 0.5)?;
        assert_eq!(next, vec![NodeId::from("f3"), NodeId::from("f4")]);
        Ok(())
    }

    #[test]
    fn relations_and_objective_survive_reload() -> anyhow::Result<()> {
        let snapshot: SceneSnapshot = serde_json::from_value(json!({
            "objective": "select all squares with a bus",
            "frames": [
                {
                    "bounds": {"x": 0, "y": 0, "width": 300, "height": 60},
                    "relations": [{"to": "f1", "relationship": "names the target of"}]
                },
                {
                    "bounds": {"x": 0, "y": 60, "width": 300, "height": 300},
                    "relations": [{"to": null, "relationship": "holds the tiles"}]
                }
            ]
        }))?;
        let scene = SceneGraph::from_snapshot(&snapshot)?;
        assert_eq!(scene.objective(), Some("select all squares with a bus"));
        let first = scene.frame(&NodeId::from("f0")).map(|f| f.relations.clone());
        assert_eq!(
            first,
            Some(vec![FrameRelation {
                to: Some(NodeId::from("f1")),
                relationship: "names the target of".to_string()
            }])
        );
        assert_eq!(SceneGraph::from_snapshot(&scene.snapshot())?, scene);

        let dangling: SceneSnapshot = serde_json::from_value(json!({
            "frames": [{
                "bounds": {"x": 0, "y": 0, "width": 10, "height": 10},
                "relations": [{"to": "f4", "relationship": "?"}]
            }]
        }))?;
        assert!(matches!(
            SceneGraph::from_snapshot(&dangling),
            Err(SceneError::UnknownNode { .. })
        ));
        Ok(())
    }

    #[test]
    fn snapshot_rejects_duplicate_and_foreign_ids() {
        let duplicate: SceneSnapshot = serde_json::from_value(json!({
            "frames": [
                {"id": "f0", "bounds": {"x": 0, "y": 0, "width": 10, "height": 10}},
                {"id": "f0", "bounds": {"x": 0, "y": 0, "width": 10, "height": 10}}
            ]
        }))
        .unwrap();
        assert_eq!(
            SceneGraph::from_snapshot(&duplicate),
            Err(SceneError::InvalidId(NodeId::from("f0")))
        );

        let foreign: SceneSnapshot = serde_json::from_value(json!({
            "frames": [{"id": "k9", "bounds": {"x": 0, "y": 0, "width": 10, "height": 10}}]
        }))
        .unwrap();
        assert!(matches!(
            SceneGraph::from_snapshot(&foreign),
            Err(SceneError::InvalidId(_))
        ));
    }

    #[test]
    fn snapshot_rejects_id_at_counter_limit() {
        let snapshot: SceneSnapshot = serde_json::from_value(json!({
            "frames": [{
                "id": "f18446744073709551615",
                "bounds": {"x": 0, "y": 0, "width": 10, "height": 10}
            }]
        }))
        .unwrap();
        assert_eq!(
            SceneGraph::from_snapshot(&snapshot),
            Err(SceneError::InvalidId(NodeId::from("f18446744073709551615")))
        );
    }

    #[test]
    fn snapshot_rejects_elements_outside_their_frame() {
        let snapshot: SceneSnapshot = serde_json::from_value(json!({
            "frames": [{
                "bounds": {"x": 0, "y": 0, "width": 10, "height": 10},
                "keypoints": [{"x": 50, "y": 50}]
            }]
        }))
        .unwrap();
        assert!(matches!(
            SceneGraph::from_snapshot(&snapshot),
            Err(SceneError::InvalidBounds(_))
        ));
    }
}
