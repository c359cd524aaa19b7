//! Closed expression grammar evaluated against a scene graph.
//!
//! Expressions arrive as tagged JSON forms and are compiled into [`Expr`]
//! before anything runs. Evaluation is a depth-bounded tree walk that can only
//! read bindings from an [`Environment`] and whitelisted node attributes.

mod ast;
mod attributes;
mod eval;
mod value;

pub use ast::{is_identifier, Expr, ExprSyntaxError, FORMS, ITEM_BINDING};
pub use attributes::{attribute_names, read_attribute};
pub use eval::{Environment, EvalError, EvalErrorKind, Evaluator, DEFAULT_MAX_DEPTH};
pub use value::Value;
