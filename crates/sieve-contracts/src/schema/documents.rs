use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use serde_json::{Map, Value};

use super::shape::{Field, FieldViolation, SchemaSpec, Shape, ValidationError};
use crate::expr::Expr;
use crate::scene::{NodeId, SceneGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Frame descriptions, relations and the puzzle objective.
    Describe,
    /// Flat list of whitelisted operations.
    Actions,
    /// Multi-step plan with bindings and expressions.
    Steps,
}

impl Stage {
    pub const NAMES: &'static [&'static str] = &["describe", "actions", "steps"];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "describe" => Some(Stage::Describe),
            "actions" => Some(Stage::Actions),
            "steps" => Some(Stage::Steps),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Describe => "describe",
            Stage::Actions => "actions",
            Stage::Steps => "steps",
        }
    }

    pub fn schema(&self) -> &'static SchemaSpec {
        match self {
            Stage::Describe => description_schema(),
            Stage::Actions => action_schema(),
            Stage::Steps => step_schema(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescription {
    pub frame: NodeId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub from: NodeId,
    /// `None` relates the frame to the page as a whole.
    pub to: Option<NodeId>,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescriptionDocument {
    pub descriptions: Vec<FrameDescription>,
    pub relations: Vec<Relation>,
    pub objective: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub op: String,
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionDocument {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub binding: Option<String>,
    pub call: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepDocument {
    pub steps: Vec<Step>,
}

pub fn description_schema() -> &'static SchemaSpec {
    static SPEC: OnceLock<SchemaSpec> = OnceLock::new();
    SPEC.get_or_init(|| SchemaSpec {
        name: "describe",
        root: Shape::Object(vec![
            Field::required(
                "descriptions",
                Shape::Array(Box::new(Shape::Object(vec![
                    Field::required("frame", Shape::String),
                    Field::required("text", Shape::String),
                ]))),
            ),
            Field::optional(
                "relations",
                Shape::Array(Box::new(Shape::Object(vec![
                    Field::required("from", Shape::String),
                    Field::required("to", Shape::Nullable(Box::new(Shape::String))),
                    Field::required("relationship", Shape::String),
                ]))),
            ),
            Field::required("objective", Shape::String),
        ]),
    })
}

pub fn action_schema() -> &'static SchemaSpec {
    static SPEC: OnceLock<SchemaSpec> = OnceLock::new();
    SPEC.get_or_init(|| SchemaSpec {
        name: "actions",
        root: Shape::Object(vec![Field::required(
            "actions",
            Shape::Array(Box::new(Shape::Object(vec![
                Field::required("op", Shape::String),
                Field::optional("args", Shape::Record),
            ]))),
        )]),
    })
}

pub fn step_schema() -> &'static SchemaSpec {
    static SPEC: OnceLock<SchemaSpec> = OnceLock::new();
    SPEC.get_or_init(|| SchemaSpec {
        name: "steps",
        root: Shape::Object(vec![Field::required(
            "steps",
            Shape::Array(Box::new(Shape::Object(vec![
                Field::optional("binding", Shape::Nullable(Box::new(Shape::Binding))),
                Field::required("call", Shape::Call),
                Field::optional("args", Shape::Array(Box::new(Shape::Expression))),
            ]))),
        )]),
    })
}

pub fn validate_actions(document: &Value) -> Result<ActionDocument, ValidationError> {
    action_schema().validate(document)?;
    let mut actions = Vec::new();
    for (idx, raw) in entries(document, "actions")?.iter().enumerate() {
        let op = raw
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| internal(format!("$.actions[{idx}].op")))?;
        let args = match raw.get("args") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        actions.push(Action {
            op: op.to_string(),
            args,
        });
    }
    Ok(ActionDocument { actions })
}

pub fn validate_steps(document: &Value) -> Result<StepDocument, ValidationError> {
    step_schema().validate(document)?;
    let mut steps = Vec::new();
    for (idx, raw) in entries(document, "steps")?.iter().enumerate() {
        let call = raw
            .get("call")
            .and_then(Value::as_str)
            .ok_or_else(|| internal(format!("$.steps[{idx}].call")))?;
        let binding = raw
            .get("binding")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut args = Vec::new();
        let raw_args = raw.get("args").and_then(Value::as_array);
        for (arg_idx, arg) in raw_args.into_iter().flatten().enumerate() {
            let expr = Expr::compile(arg)
                .map_err(|_| internal(format!("$.steps[{idx}].args[{arg_idx}]")))?;
            args.push(expr);
        }
        steps.push(Step {
            binding,
            call: call.to_string(),
            args,
        });
    }
    Ok(StepDocument { steps })
}

/// Validates a describe document against the frames the model was shown.
///
/// Every terminal frame of `scene` must be described exactly once, relation
/// endpoints must be terminal frames and the objective must not be blank.
/// All violations are reported together.
pub fn validate_description(
    document: &Value,
    scene: &SceneGraph,
) -> Result<DescriptionDocument, ValidationError> {
    description_schema().validate(document)?;
    let shown: Vec<&NodeId> = scene.terminal_frames().map(|frame| &frame.id).collect();
    let is_shown = |raw: &str| shown.iter().any(|id| id.as_str() == raw);
    let mut violations = Vec::new();

    let mut described = HashSet::new();
    let mut descriptions = Vec::new();
    for (idx, raw) in entries(document, "descriptions")?.iter().enumerate() {
        let frame = text_field(raw, "frame", &format!("$.descriptions[{idx}]"))?;
        let text = text_field(raw, "text", &format!("$.descriptions[{idx}]"))?;
        if !is_shown(frame) {
            violations.push(unknown_frame(format!("$.descriptions[{idx}].frame"), frame, &shown));
        } else if !described.insert(frame.to_string()) {
            violations.push(FieldViolation {
                path: format!("$.descriptions[{idx}].frame"),
                expected: "each frame described once".to_string(),
                actual: format!("second description of '{frame}'"),
            });
        }
        descriptions.push(FrameDescription {
            frame: NodeId::from(frame),
            text: text.trim().to_string(),
        });
    }
    for id in shown.iter().filter(|id| !described.contains(id.as_str())) {
        violations.push(FieldViolation {
            path: "$.descriptions".to_string(),
            expected: format!("a description of every frame ({} total)", shown.len()),
            actual: format!("no description of '{id}'"),
        });
    }

    let mut relations = Vec::new();
    let raw_relations = document.get("relations").and_then(Value::as_array);
    for (idx, raw) in raw_relations.into_iter().flatten().enumerate() {
        let base = format!("$.relations[{idx}]");
        let from = text_field(raw, "from", &base)?;
        if !is_shown(from) {
            violations.push(unknown_frame(format!("{base}.from"), from, &shown));
        }
        let to = raw.get("to").and_then(Value::as_str);
        if let Some(to) = to.filter(|to| !is_shown(to)) {
            violations.push(unknown_frame(format!("{base}.to"), to, &shown));
        }
        relations.push(Relation {
            from: NodeId::from(from),
            to: to.map(NodeId::from),
            relationship: text_field(raw, "relationship", &base)?.trim().to_string(),
        });
    }

    let objective = text_field(document, "objective", "$")?.trim().to_string();
    if objective.is_empty() {
        violations.push(FieldViolation {
            path: "$.objective".to_string(),
            expected: "non-empty objective".to_string(),
            actual: "blank string".to_string(),
        });
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }
    Ok(DescriptionDocument {
        descriptions,
        relations,
        objective,
    })
}

fn unknown_frame(path: String, raw: &str, shown: &[&NodeId]) -> FieldViolation {
    let names: Vec<&str> = shown.iter().map(|id| id.as_str()).collect();
    FieldViolation {
        path,
        expected: format!("one of the frames shown [{}]", names.join(", ")),
        actual: format!("'{raw}'"),
    }
}

fn text_field<'a>(raw: &'a Value, key: &str, base: &str) -> Result<&'a str, ValidationError> {
    raw.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| internal(format!("{base}.{key}")))
}

fn entries<'a>(document: &'a Value, key: &str) -> Result<&'a Vec<Value>, ValidationError> {
    document
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| internal(format!("$.{key}")))
}

/// A validated document that still fails typed conversion.
fn internal(path: String) -> ValidationError {
    ValidationError {
        violations: vec![FieldViolation {
            path,
            expected: "value accepted by the schema".to_string(),
            actual: "unreadable after validation".to_string(),
        }],
    }
}
