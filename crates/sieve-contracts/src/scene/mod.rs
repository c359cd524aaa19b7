//! Scene graph shared with the browser/vision collaborator.
//!
//! The collaborator captures frames and detected elements and hands a
//! [`SceneGraph`] to this layer. Model output may only reach the graph through
//! the bounded mutations defined here; node ids are the only handles it sees.

mod graph;
mod snapshot;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use graph::{Frame, FrameRelation, Interactable, Interaction, Keypoint, SceneGraph, StructureSummary};
pub use snapshot::{FrameSnapshot, InteractableSnapshot, KeypointSnapshot, SceneSnapshot};

pub const MAX_GRID_CELLS_PER_AXIS: u64 = 8;
pub const MAX_TILES: u64 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn allocate(kind: NodeKind, counter: &mut u64) -> Self {
        let id = Self(format!("{}{}", kind.prefix(), *counter));
        *counter += 1;
        id
    }

    /// Parses the numeric suffix when the id carries the prefix for `kind`.
    fn ordinal(&self, kind: NodeKind) -> Option<u64> {
        let digits = self.0.strip_prefix(kind.prefix())?;
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Frame,
    Interactable,
    Keypoint,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Frame => "frame",
            NodeKind::Interactable => "interactable",
            NodeKind::Keypoint => "keypoint",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            NodeKind::Frame => "f",
            NodeKind::Interactable => "i",
            NodeKind::Keypoint => "k",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed handle to a node that exists in a particular graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|value| value.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    /// Euclidean distance from a point to the closest point of the rect.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        let dx = (self.x - x).max(0.0).max(x - (self.x + self.width));
        let dy = (self.y - y).max(0.0).max(y - (self.y + self.height));
        (dx * dx + dy * dy).sqrt()
    }

    /// Cuts the rect in two. `Axis::X` cuts along the x axis (left/right).
    pub fn split(&self, axis: Axis, ratio: f64) -> (Rect, Rect) {
        match axis {
            Axis::X => {
                let left = self.width * ratio;
                (
                    Rect::new(self.x, self.y, left, self.height),
                    Rect::new(self.x + left, self.y, self.width - left, self.height),
                )
            }
            Axis::Y => {
                let top = self.height * ratio;
                (
                    Rect::new(self.x, self.y, self.width, top),
                    Rect::new(self.x, self.y + top, self.width, self.height - top),
                )
            }
        }
    }

    /// Row-major cells of an evenly divided grid.
    pub fn cells(&self, rows: u64, columns: u64) -> Vec<Rect> {
        let cell_w = self.width / columns as f64;
        let cell_h = self.height / rows as f64;
        let mut out = Vec::with_capacity((rows * columns) as usize);
        for row in 0..rows {
            for column in 0..columns {
                out.push(Rect::new(
                    self.x + cell_w * column as f64,
                    self.y + cell_h * row as f64,
                    cell_w,
                    cell_h,
                ));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub const NAMES: &'static [&'static str] = &["x", "y"];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "x" => Some(Axis::X),
            "y" => Some(Axis::Y),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }
}

macro_rules! label_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const NAMES: &'static [&'static str] = &[$($text),+];

            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

label_enum!(
    /// How a whole frame is interacted with.
    FrameLabel {
        Clickable => "clickable",
        Selectable => "selectable",
        Draggable => "draggable",
        Swappable => "swappable",
        SlideableX => "slideable_x",
        SlideableY => "slideable_y",
        Pointable => "pointable",
        Inputtable => "inputtable",
        Next => "next",
    }
);

label_enum!(
    /// How a single element inside a frame is interacted with.
    ElementLabel {
        Clickable => "clickable",
        Selectable => "selectable",
        Draggable => "draggable",
        Swappable => "swappable",
        Pointable => "pointable",
        Next => "next",
    }
);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("unknown {kind} '{id}'")]
    UnknownNode { kind: NodeKind, id: NodeId },
    #[error("frame '{0}' has already been subdivided")]
    NotTerminal(NodeId),
    #[error("scene has no frames")]
    Empty,
    #[error("scene has {0} root frames; name the frame explicitly")]
    AmbiguousRoot(usize),
    #[error("ratio must be strictly between 0 and 1, got {0}")]
    InvalidRatio(f64),
    #[error("{what} must be between {min} and {max}, got {value}")]
    OutOfRange {
        what: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
    #[error("duplicate or malformed node id '{0}'")]
    InvalidId(NodeId),
}
