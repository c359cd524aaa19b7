use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{
    Axis, ElementLabel, FrameLabel, NodeId, NodeKind, NodeRef, Rect, SceneError,
    MAX_GRID_CELLS_PER_AXIS, MAX_TILES,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub bounds: Rect,
    pub label: Option<FrameLabel>,
    pub description: Option<String>,
    /// At most one entry per target; `None` relates the frame to the page.
    pub relations: Vec<FrameRelation>,
    pub children: Vec<NodeId>,
    pub interactables: Vec<NodeId>,
    pub keypoints: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRelation {
    pub to: Option<NodeId>,
    pub relationship: String,
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interactable {
    pub id: NodeId,
    pub frame: NodeId,
    pub bounds: Rect,
    pub label: Option<ElementLabel>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub id: NodeId,
    pub frame: NodeId,
    pub x: f64,
    pub y: f64,
}

/// Browser-side effect requested by a step. The collaborator replays these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interaction {
    Click { target: NodeId },
    Drag { from: NodeId, to: NodeId },
    Enter { target: NodeId, text: String },
    Point { keypoint: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructureSummary {
    pub kinds: BTreeSet<&'static str>,
    pub next_count: usize,
}

impl StructureSummary {
    /// Labels other than `next`.
    pub fn interaction_kinds(&self) -> Vec<&'static str> {
        self.kinds
            .iter()
            .copied()
            .filter(|kind| *kind != "next")
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneGraph {
    roots: Vec<NodeId>,
    frames: IndexMap<NodeId, Frame>,
    interactables: IndexMap<NodeId, Interactable>,
    keypoints: IndexMap<NodeId, Keypoint>,
    interactions: Vec<Interaction>,
    objective: Option<String>,
    next_frame: u64,
    next_interactable: u64,
    next_keypoint: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root_frame(&mut self, bounds: Rect) -> Result<NodeId, SceneError> {
        check_bounds(&bounds)?;
        let id = NodeId::allocate(NodeKind::Frame, &mut self.next_frame);
        self.insert_frame(id.clone(), None, bounds);
        self.roots.push(id.clone());
        Ok(id)
    }

    pub fn add_interactable(&mut self, frame: &NodeId, bounds: Rect) -> Result<NodeId, SceneError> {
        let id = NodeId::allocate(NodeKind::Interactable, &mut self.next_interactable);
        self.attach_interactable(id.clone(), frame, bounds)?;
        Ok(id)
    }

    pub fn add_keypoint(&mut self, frame: &NodeId, x: f64, y: f64) -> Result<NodeId, SceneError> {
        let id = NodeId::allocate(NodeKind::Keypoint, &mut self.next_keypoint);
        self.attach_keypoint(id.clone(), frame, x, y)?;
        Ok(id)
    }

    pub fn describe_frame(&mut self, frame: &NodeId, text: &str) -> Result<(), SceneError> {
        let frame = self.frame_entry(frame)?;
        let text = text.trim();
        frame.description = if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
        Ok(())
    }

    /// Records how `from` relates to `to`, replacing any earlier relation
    /// to the same target.
    pub fn relate_frames(
        &mut self,
        from: &NodeId,
        to: Option<&NodeId>,
        relationship: &str,
    ) -> Result<(), SceneError> {
        if let Some(to) = to {
            if !self.frames.contains_key(to) {
                return Err(SceneError::UnknownNode {
                    kind: NodeKind::Frame,
                    id: to.clone(),
                });
            }
        }
        let entry = self.frame_entry(from)?;
        let relation = FrameRelation {
            to: to.cloned(),
            relationship: relationship.trim().to_string(),
        };
        match entry.relations.iter_mut().find(|existing| existing.to == relation.to) {
            Some(existing) => *existing = relation,
            None => entry.relations.push(relation),
        }
        Ok(())
    }

    pub fn set_objective(&mut self, text: &str) {
        let text = text.trim();
        self.objective = (!text.is_empty()).then(|| text.to_string());
    }

    pub fn objective(&self) -> Option<&str> {
        self.objective.as_deref()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn frame(&self, id: &NodeId) -> Option<&Frame> {
        self.frames.get(id)
    }

    pub fn interactable(&self, id: &NodeId) -> Option<&Interactable> {
        self.interactables.get(id)
    }

    pub fn keypoint(&self, id: &NodeId) -> Option<&Keypoint> {
        self.keypoints.get(id)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values()
    }

    pub fn interactables(&self) -> impl Iterator<Item = &Interactable> {
        self.interactables.values()
    }

    pub fn keypoints(&self) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.values()
    }

    pub fn terminal_frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values().filter(|frame| frame.is_terminal())
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn node_count(&self) -> usize {
        self.frames.len() + self.interactables.len() + self.keypoints.len()
    }

    /// Resolves a raw identifier to a typed handle, if it names a node.
    pub fn resolve(&self, raw: &str) -> Option<NodeRef> {
        let id = NodeId::from(raw);
        let kind = if self.frames.contains_key(&id) {
            NodeKind::Frame
        } else if self.interactables.contains_key(&id) {
            NodeKind::Interactable
        } else if self.keypoints.contains_key(&id) {
            NodeKind::Keypoint
        } else {
            return None;
        };
        Some(NodeRef { kind, id })
    }

    /// The only root frame; fails when the capture produced zero or several.
    pub fn sole_root(&self) -> Result<NodeId, SceneError> {
        match self.roots.as_slice() {
            [] => Err(SceneError::Empty),
            [only] => Ok(only.clone()),
            many => Err(SceneError::AmbiguousRoot(many.len())),
        }
    }

    pub fn split_frame(
        &mut self,
        frame: &NodeId,
        axis: Axis,
        ratio: f64,
    ) -> Result<Vec<NodeId>, SceneError> {
        if !(ratio.is_finite() && ratio > 0.0 && ratio < 1.0) {
            return Err(SceneError::InvalidRatio(ratio));
        }
        let bounds = self.terminal_bounds(frame)?;
        let (first, second) = bounds.split(axis, ratio);
        Ok(self.subdivide(frame, vec![first, second]))
    }

    pub fn grid_frame(
        &mut self,
        frame: &NodeId,
        rows: u64,
        columns: u64,
    ) -> Result<Vec<NodeId>, SceneError> {
        check_count("rows", rows, 1, MAX_GRID_CELLS_PER_AXIS)?;
        check_count("columns", columns, 1, MAX_GRID_CELLS_PER_AXIS)?;
        let bounds = self.terminal_bounds(frame)?;
        Ok(self.subdivide(frame, bounds.cells(rows, columns)))
    }

    /// Lays `tiles` equally sized interactables over a terminal frame.
    pub fn tile_frame(
        &mut self,
        frame: &NodeId,
        tiles: u64,
        label: ElementLabel,
    ) -> Result<Vec<NodeId>, SceneError> {
        check_count("tiles", tiles, 1, MAX_TILES)?;
        let bounds = self.terminal_bounds(frame)?;
        let columns = (tiles as f64).sqrt().ceil() as u64;
        let rows = tiles.div_ceil(columns);
        let mut created = Vec::with_capacity(tiles as usize);
        for cell in bounds.cells(rows, columns).into_iter().take(tiles as usize) {
            let id = self.add_interactable(frame, cell)?;
            if let Some(item) = self.interactables.get_mut(&id) {
                item.label = Some(label);
            }
            created.push(id);
        }
        Ok(created)
    }

    pub fn label_frame(&mut self, frame: &NodeId, label: FrameLabel) -> Result<(), SceneError> {
        self.frame_entry(frame)?.label = Some(label);
        Ok(())
    }

    pub fn label_element(&mut self, element: &NodeId, label: ElementLabel) -> Result<(), SceneError> {
        self.interactable_entry(element)?.label = Some(label);
        Ok(())
    }

    pub fn set_selected(&mut self, element: &NodeId, selected: bool) -> Result<(), SceneError> {
        self.interactable_entry(element)?.selected = selected;
        Ok(())
    }

    pub fn record(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    /// Other keypoints of the same frame, nearest first.
    pub fn keypoint_neighbours(&self, keypoint: &NodeId) -> Result<Vec<NodeId>, SceneError> {
        let origin = self.keypoints.get(keypoint).ok_or_else(|| SceneError::UnknownNode {
            kind: NodeKind::Keypoint,
            id: keypoint.clone(),
        })?;
        let mut others: Vec<(f64, &Keypoint)> = self
            .keypoints
            .values()
            .filter(|point| point.frame == origin.frame && point.id != origin.id)
            .map(|point| {
                let dx = point.x - origin.x;
                let dy = point.y - origin.y;
                ((dx * dx + dy * dy).sqrt(), point)
            })
            .collect();
        others.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(others.into_iter().map(|(_, point)| point.id.clone()).collect())
    }

    pub fn structure_summary(&self) -> StructureSummary {
        let mut summary = StructureSummary::default();
        let frame_labels = self.frames.values().filter_map(|frame| frame.label.map(|l| l.as_str()));
        let element_labels = self
            .interactables
            .values()
            .filter_map(|item| item.label.map(|l| l.as_str()));
        for label in frame_labels.chain(element_labels) {
            if label == "next" {
                summary.next_count += 1;
            }
            summary.kinds.insert(label);
        }
        summary
    }

    pub(super) fn insert_frame(&mut self, id: NodeId, parent: Option<NodeId>, bounds: Rect) {
        self.frames.insert(
            id.clone(),
            Frame {
                id,
                parent,
                bounds,
                label: None,
                description: None,
                relations: Vec::new(),
                children: Vec::new(),
                interactables: Vec::new(),
                keypoints: Vec::new(),
            },
        );
    }

    pub(super) fn push_root(&mut self, id: NodeId) {
        self.roots.push(id);
    }

    pub(super) fn attach_child(&mut self, parent: &NodeId, id: NodeId, bounds: Rect) -> Result<(), SceneError> {
        check_bounds(&bounds)?;
        let entry = self.frame_entry(parent)?;
        if !entry.interactables.is_empty() || !entry.keypoints.is_empty() {
            return Err(SceneError::InvalidBounds(format!(
                "frame '{parent}' owns elements and cannot also hold child frames"
            )));
        }
        entry.children.push(id.clone());
        self.insert_frame(id, Some(parent.clone()), bounds);
        Ok(())
    }

    pub(super) fn attach_interactable(
        &mut self,
        id: NodeId,
        frame: &NodeId,
        bounds: Rect,
    ) -> Result<(), SceneError> {
        check_bounds(&bounds)?;
        let (cx, cy) = bounds.center();
        let owner = self.terminal_bounds(frame)?;
        if !owner.contains(cx, cy) {
            return Err(SceneError::InvalidBounds(format!(
                "interactable centre ({cx}, {cy}) lies outside frame '{frame}'"
            )));
        }
        self.frame_entry(frame)?.interactables.push(id.clone());
        self.interactables.insert(
            id.clone(),
            Interactable {
                id,
                frame: frame.clone(),
                bounds,
                label: None,
                selected: false,
            },
        );
        Ok(())
    }

    pub(super) fn attach_keypoint(
        &mut self,
        id: NodeId,
        frame: &NodeId,
        x: f64,
        y: f64,
    ) -> Result<(), SceneError> {
        let owner = self.terminal_bounds(frame)?;
        if !(x.is_finite() && y.is_finite() && owner.contains(x, y)) {
            return Err(SceneError::InvalidBounds(format!(
                "keypoint ({x}, {y}) lies outside frame '{frame}'"
            )));
        }
        self.frame_entry(frame)?.keypoints.push(id.clone());
        self.keypoints.insert(
            id.clone(),
            Keypoint {
                id,
                frame: frame.clone(),
                x,
                y,
            },
        );
        Ok(())
    }

    pub(super) fn interactable_entry(&mut self, id: &NodeId) -> Result<&mut Interactable, SceneError> {
        self.interactables
            .get_mut(id)
            .ok_or_else(|| SceneError::UnknownNode {
                kind: NodeKind::Interactable,
                id: id.clone(),
            })
    }

    pub(super) fn bump_counters(&mut self, frame: u64, interactable: u64, keypoint: u64) {
        self.next_frame = self.next_frame.max(frame);
        self.next_interactable = self.next_interactable.max(interactable);
        self.next_keypoint = self.next_keypoint.max(keypoint);
    }

    pub(super) fn allocate(&mut self, kind: NodeKind) -> NodeId {
        let counter = match kind {
            NodeKind::Frame => &mut self.next_frame,
            NodeKind::Interactable => &mut self.next_interactable,
            NodeKind::Keypoint => &mut self.next_keypoint,
        };
        NodeId::allocate(kind, counter)
    }

    pub(super) fn restore_interactions(&mut self, interactions: Vec<Interaction>) {
        self.interactions = interactions;
    }

    fn frame_entry(&mut self, id: &NodeId) -> Result<&mut Frame, SceneError> {
        self.frames.get_mut(id).ok_or_else(|| SceneError::UnknownNode {
            kind: NodeKind::Frame,
            id: id.clone(),
        })
    }

    fn terminal_bounds(&self, id: &NodeId) -> Result<Rect, SceneError> {
        let frame = self.frames.get(id).ok_or_else(|| SceneError::UnknownNode {
            kind: NodeKind::Frame,
            id: id.clone(),
        })?;
        if !frame.is_terminal() {
            return Err(SceneError::NotTerminal(id.clone()));
        }
        Ok(frame.bounds)
    }

    /// Creates one child per rect and hands every owned element to the child
    /// nearest its centre. The parent keeps no elements afterwards.
    fn subdivide(&mut self, parent: &NodeId, rects: Vec<Rect>) -> Vec<NodeId> {
        let mut children = Vec::with_capacity(rects.len());
        for rect in &rects {
            let id = NodeId::allocate(NodeKind::Frame, &mut self.next_frame);
            self.insert_frame(id.clone(), Some(parent.clone()), *rect);
            children.push(id);
        }

        let (owned_items, owned_points) = match self.frames.get_mut(parent) {
            Some(frame) => {
                frame.children = children.clone();
                (
                    std::mem::take(&mut frame.interactables),
                    std::mem::take(&mut frame.keypoints),
                )
            }
            None => (Vec::new(), Vec::new()),
        };

        for item_id in owned_items {
            let Some(item) = self.interactables.get_mut(&item_id) else {
                continue;
            };
            let (cx, cy) = item.bounds.center();
            let target = nearest(&children, &rects, cx, cy);
            item.frame = target.clone();
            if let Some(frame) = self.frames.get_mut(&target) {
                frame.interactables.push(item_id);
            }
        }
        for point_id in owned_points {
            let Some(point) = self.keypoints.get_mut(&point_id) else {
                continue;
            };
            let target = nearest(&children, &rects, point.x, point.y);
            point.frame = target.clone();
            if let Some(frame) = self.frames.get_mut(&target) {
                frame.keypoints.push(point_id);
            }
        }
        children
    }
}

fn nearest(children: &[NodeId], rects: &[Rect], x: f64, y: f64) -> NodeId {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (idx, rect) in rects.iter().enumerate() {
        let distance = rect.distance_to(x, y);
        if distance < best_distance {
            best = idx;
            best_distance = distance;
        }
    }
    children[best].clone()
}

fn check_bounds(bounds: &Rect) -> Result<(), SceneError> {
    if bounds.is_valid() {
        return Ok(());
    }
    Err(SceneError::InvalidBounds(format!(
        "{}x{} at ({}, {})",
        bounds.width, bounds.height, bounds.x, bounds.y
    )))
}

fn check_count(what: &'static str, value: u64, min: u64, max: u64) -> Result<(), SceneError> {
    if value < min || value > max {
        return Err(SceneError::OutOfRange {
            what,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_root() -> (SceneGraph, NodeId) {
        let mut scene = SceneGraph::new();
        let root = scene
            .add_root_frame(Rect::new(0.0, 0.0, 400.0, 200.0))
            .unwrap();
        (scene, root)
    }

    #[test]
    fn relations_replace_per_target_and_need_known_frames() {
        let mut scene = SceneGraph::new();
        let top = scene.add_root_frame(Rect::new(0.0, 0.0, 100.0, 50.0)).unwrap();
        let bottom = scene.add_root_frame(Rect::new(0.0, 50.0, 100.0, 50.0)).unwrap();

        scene.relate_frames(&top, Some(&bottom), "reference for").unwrap();
        scene.relate_frames(&top, None, " instructions ").unwrap();
        scene.relate_frames(&top, Some(&bottom), "answer goes in").unwrap();
        let relations = &scene.frame(&top).unwrap().relations;
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].to, Some(bottom.clone()));
        assert_eq!(relations[0].relationship, "answer goes in");
        assert_eq!(relations[1].relationship, "instructions");

        assert!(matches!(
            scene.relate_frames(&top, Some(&NodeId::from("f7")), "x"),
            Err(SceneError::UnknownNode { .. })
        ));

        scene.set_objective("  pick every bus  ");
        assert_eq!(scene.objective(), Some("pick every bus"));
        scene.set_objective(" ");
        assert_eq!(scene.objective(), None);
    }

    #[test]
    fn split_moves_owned_elements_to_children() {
        let (mut scene, root) = single_root();
        let left = scene
            .add_interactable(&root, Rect::new(10.0, 10.0, 50.0, 50.0))
            .unwrap();
        let right_point = scene.add_keypoint(&root, 350.0, 100.0).unwrap();

        let children = scene.split_frame(&root, Axis::X, 0.5).unwrap();
        assert_eq!(children, vec![NodeId::from("f1"), NodeId::from("f2")]);

        let parent = scene.frame(&root).unwrap();
        assert!(!parent.is_terminal());
        assert!(parent.interactables.is_empty());
        assert!(parent.keypoints.is_empty());

        assert_eq!(scene.interactable(&left).unwrap().frame, children[0]);
        assert_eq!(scene.keypoint(&right_point).unwrap().frame, children[1]);
        assert_eq!(scene.frame(&children[1]).unwrap().bounds.x, 200.0);
        assert_eq!(scene.frame(&children[0]).unwrap().parent, Some(root));
    }

    #[test]
    fn split_rejects_non_terminal_and_bad_ratio() {
        let (mut scene, root) = single_root();
        assert_eq!(
            scene.split_frame(&root, Axis::Y, 1.0),
            Err(SceneError::InvalidRatio(1.0))
        );
        scene.split_frame(&root, Axis::Y, 0.25).unwrap();
        assert_eq!(
            scene.split_frame(&root, Axis::Y, 0.5),
            Err(SceneError::NotTerminal(root))
        );
    }

    #[test]
    fn grid_and_tile_bounds() {
        let (mut scene, root) = single_root();
        let cells = scene.grid_frame(&root, 2, 3).unwrap();
        assert_eq!(cells.len(), 6);
        let tiles = scene
            .tile_frame(&cells[0], 9, ElementLabel::Selectable)
            .unwrap();
        assert_eq!(tiles.len(), 9);
        assert!(scene
            .interactables()
            .all(|item| item.label == Some(ElementLabel::Selectable)));
        assert!(matches!(
            scene.grid_frame(&cells[1], 0, 2),
            Err(SceneError::OutOfRange { what: "rows", .. })
        ));
        assert!(matches!(
            scene.tile_frame(&root, 4, ElementLabel::Clickable),
            Err(SceneError::NotTerminal(_))
        ));
    }

    #[test]
    fn ids_are_unique_per_kind_and_never_reused() {
        let mut scene = SceneGraph::new();
        let a = scene.add_root_frame(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let b = scene.add_root_frame(Rect::new(20.0, 0.0, 10.0, 10.0)).unwrap();
        assert_ne!(a, b);
        assert_eq!(scene.sole_root(), Err(SceneError::AmbiguousRoot(2)));
        assert_eq!(scene.resolve("f1").map(|node| node.kind), Some(NodeKind::Frame));
        assert_eq!(scene.resolve("i0"), None);
    }

    #[test]
    fn keypoint_neighbours_are_sorted_by_distance() {
        let (mut scene, root) = single_root();
        let origin = scene.add_keypoint(&root, 10.0, 10.0).unwrap();
        let far = scene.add_keypoint(&root, 300.0, 150.0).unwrap();
        let near = scene.add_keypoint(&root, 20.0, 10.0).unwrap();
        assert_eq!(scene.keypoint_neighbours(&origin).unwrap(), vec![near, far]);
    }

    #[test]
    fn structure_summary_counts_next_separately() {
        let (mut scene, root) = single_root();
        let cells = scene.split_frame(&root, Axis::X, 0.8).unwrap();
        scene.label_frame(&cells[1], FrameLabel::Next).unwrap();
        scene.tile_frame(&cells[0], 4, ElementLabel::Selectable).unwrap();
        let summary = scene.structure_summary();
        assert_eq!(summary.next_count, 1);
        assert_eq!(summary.interaction_kinds(), vec!["selectable"]);
    }
}
