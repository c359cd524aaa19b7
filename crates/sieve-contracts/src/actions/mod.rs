//! Closed table of whitelisted scene operations for the flat action stage.

mod arguments;
mod registry;

pub use arguments::{ArgFault, ArgValue, Arguments, ParamKind, ParamSpec};
pub use registry::{
    ActionError, ActionRegistry, ActionSpec, ArgumentError, BoundAction, UnknownOperationError,
    ACTION_SPECS,
};
