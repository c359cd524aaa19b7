use thiserror::Error;

use super::arguments::{ArgFault, Arguments, ParamKind, ParamSpec};
use crate::expr::Value;
use crate::scene::{NodeId, NodeKind, NodeRef, SceneGraph, MAX_GRID_CELLS_PER_AXIS, MAX_TILES};
use crate::schema::{Action, ActionDocument};

type Handler = fn(&Arguments, &mut SceneGraph) -> Result<Value, ArgFault>;

#[derive(Clone, Copy)]
pub struct ActionSpec {
    pub op: &'static str,
    pub summary: &'static str,
    pub params: &'static [ParamSpec],
    handler: Handler,
}

impl std::fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSpec")
            .field("op", &self.op)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ActionSpec {
    /// One-line signature, e.g. `split(frame?: frame id, axis: x|y, ...)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|param| {
                let marker = if param.required { "" } else { "?" };
                format!("{}{marker}: {}", param.name, param.kind.describe())
            })
            .collect();
        format!("{}({})", self.op, params.join(", "))
    }
}

const FRAME_OPTIONAL: ParamSpec = ParamSpec {
    name: "frame",
    kind: ParamKind::Frame,
    required: false,
};

const GRID_AXIS: ParamKind = ParamKind::Count {
    min: 1,
    max: MAX_GRID_CELLS_PER_AXIS,
};

pub const ACTION_SPECS: &[ActionSpec] = &[
    ActionSpec {
        op: "split",
        summary: "Cut a terminal frame in two along an axis.",
        params: &[
            FRAME_OPTIONAL,
            ParamSpec {
                name: "axis",
                kind: ParamKind::Axis,
                required: true,
            },
            ParamSpec {
                name: "ratio",
                kind: ParamKind::Ratio,
                required: true,
            },
        ],
        handler: split,
    },
    ActionSpec {
        op: "grid",
        summary: "Divide a terminal frame into rows x columns child frames.",
        params: &[
            FRAME_OPTIONAL,
            ParamSpec {
                name: "rows",
                kind: GRID_AXIS,
                required: true,
            },
            ParamSpec {
                name: "columns",
                kind: GRID_AXIS,
                required: true,
            },
        ],
        handler: grid,
    },
    ActionSpec {
        op: "tile",
        summary: "Lay labelled interactable tiles over a terminal frame.",
        params: &[
            FRAME_OPTIONAL,
            ParamSpec {
                name: "tiles",
                kind: ParamKind::Count {
                    min: 1,
                    max: MAX_TILES,
                },
                required: true,
            },
            ParamSpec {
                name: "label",
                kind: ParamKind::ElementLabel,
                required: true,
            },
        ],
        handler: tile,
    },
    ActionSpec {
        op: "label_frame",
        summary: "Set how a frame is interacted with.",
        params: &[
            ParamSpec {
                name: "frame",
                kind: ParamKind::Frame,
                required: true,
            },
            ParamSpec {
                name: "label",
                kind: ParamKind::FrameLabel,
                required: true,
            },
        ],
        handler: label_frame,
    },
    ActionSpec {
        op: "label_element",
        summary: "Set how an interactable is interacted with.",
        params: &[
            ParamSpec {
                name: "element",
                kind: ParamKind::Element,
                required: true,
            },
            ParamSpec {
                name: "label",
                kind: ParamKind::ElementLabel,
                required: true,
            },
        ],
        handler: label_element,
    },
];

#[derive(Debug, Clone, PartialEq, Error)]
#[error("action {index}: unknown operation '{op}'")]
pub struct UnknownOperationError {
    pub index: usize,
    pub op: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("action {index} ({op}): argument '{param}': {detail}")]
pub struct ArgumentError {
    pub index: usize,
    pub op: String,
    pub param: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error(transparent)]
    UnknownOperation(#[from] UnknownOperationError),
    #[error(transparent)]
    Argument(#[from] ArgumentError),
}

/// An action whose arguments passed every check, ready to apply.
#[derive(Debug, Clone)]
pub struct BoundAction {
    pub index: usize,
    pub spec: &'static ActionSpec,
    pub args: Arguments,
}

impl BoundAction {
    pub fn apply(&self, scene: &mut SceneGraph) -> Result<Value, ArgumentError> {
        (self.spec.handler)(&self.args, scene).map_err(|fault| self.argument_error(fault))
    }

    fn argument_error(&self, fault: ArgFault) -> ArgumentError {
        ArgumentError {
            index: self.index,
            op: self.spec.op.to_string(),
            param: fault.param.to_string(),
            detail: fault.detail,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionRegistry;

impl ActionRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn spec(&self, op: &str) -> Option<&'static ActionSpec> {
        ACTION_SPECS.iter().find(|spec| spec.op == op)
    }

    pub fn specs(&self) -> &'static [ActionSpec] {
        ACTION_SPECS
    }

    pub fn catalogue(&self) -> Vec<String> {
        ACTION_SPECS
            .iter()
            .map(|spec| format!("{} - {}", spec.signature(), spec.summary))
            .collect()
    }

    /// The operation name is checked before any argument.
    pub fn bind(&self, index: usize, action: &Action) -> Result<BoundAction, ActionError> {
        let spec = self.spec(&action.op).ok_or_else(|| UnknownOperationError {
            index,
            op: action.op.clone(),
        })?;
        let args = Arguments::bind(spec.params, &action.args).map_err(|fault| ArgumentError {
            index,
            op: spec.op.to_string(),
            param: fault.param.to_string(),
            detail: fault.detail,
        })?;
        Ok(BoundAction { index, spec, args })
    }

    /// Binds every action before applying any, then applies them in order.
    pub fn apply_document(
        &self,
        document: &ActionDocument,
        scene: &mut SceneGraph,
    ) -> Result<Vec<Value>, ActionError> {
        let bound = document
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| self.bind(index, action))
            .collect::<Result<Vec<_>, _>>()?;
        let mut results = Vec::with_capacity(bound.len());
        for action in &bound {
            results.push(action.apply(scene)?);
        }
        Ok(results)
    }
}

fn target_frame(args: &Arguments, scene: &SceneGraph) -> Result<NodeId, ArgFault> {
    match args.node("frame")? {
        Some(id) => Ok(id.clone()),
        None => scene.sole_root().map_err(ArgFault::scene("frame")),
    }
}

fn frames(ids: Vec<NodeId>) -> Value {
    Value::nodes(ids.into_iter().map(|id| NodeRef {
        kind: NodeKind::Frame,
        id,
    }))
}

fn split(args: &Arguments, scene: &mut SceneGraph) -> Result<Value, ArgFault> {
    let frame = target_frame(args, scene)?;
    let children = scene
        .split_frame(&frame, args.axis("axis")?, args.ratio("ratio")?)
        .map_err(ArgFault::scene("frame"))?;
    Ok(frames(children))
}

fn grid(args: &Arguments, scene: &mut SceneGraph) -> Result<Value, ArgFault> {
    let frame = target_frame(args, scene)?;
    let children = scene
        .grid_frame(&frame, args.count("rows")?, args.count("columns")?)
        .map_err(ArgFault::scene("frame"))?;
    Ok(frames(children))
}

fn tile(args: &Arguments, scene: &mut SceneGraph) -> Result<Value, ArgFault> {
    let frame = target_frame(args, scene)?;
    let tiles = scene
        .tile_frame(&frame, args.count("tiles")?, args.element_label("label")?)
        .map_err(ArgFault::scene("frame"))?;
    Ok(Value::nodes(tiles.into_iter().map(|id| NodeRef {
        kind: NodeKind::Interactable,
        id,
    })))
}

fn label_frame(args: &Arguments, scene: &mut SceneGraph) -> Result<Value, ArgFault> {
    let frame = args.required_node("frame")?;
    scene
        .label_frame(frame, args.frame_label("label")?)
        .map_err(ArgFault::scene("frame"))?;
    Ok(Value::Node(NodeRef {
        kind: NodeKind::Frame,
        id: frame.clone(),
    }))
}

fn label_element(args: &Arguments, scene: &mut SceneGraph) -> Result<Value, ArgFault> {
    let element = args.required_node("element")?;
    scene
        .label_element(element, args.element_label("label")?)
        .map_err(ArgFault::scene("element"))?;
    Ok(Value::Node(NodeRef {
        kind: NodeKind::Interactable,
        id: element.clone(),
    }))
}
