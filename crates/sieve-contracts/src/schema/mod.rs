//! Per-stage document contracts.
//!
//! A [`SchemaSpec`] is a static tree of [`Shape`]s. Validation walks the
//! whole tree and reports every violation at once, so a rejected reply can be
//! repaired in a single retry.

mod documents;
mod shape;

pub use documents::{
    action_schema, description_schema, step_schema, validate_actions, validate_description,
    validate_steps, Action, ActionDocument, DescriptionDocument, FrameDescription, Relation, Stage,
    Step, StepDocument,
};
pub use shape::{Field, FieldViolation, SchemaSpec, Shape, ValidationError};
