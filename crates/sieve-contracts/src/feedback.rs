use serde_json::{json, Map, Value};

use crate::actions::ActionError;
use crate::output::ParseError;
use crate::schema::ValidationError;

pub const REPAIR_INSTRUCTION: &str =
    "Your previous reply was rejected. Reply with only the corrected JSON document.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// JSON path inside the submitted document, e.g. `$.actions[0].op`.
    Path(String),
    /// 1-based step number in a multi-step document.
    Step(usize),
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    pub kind: String,
    pub location: Location,
    pub detail: String,
}

impl FeedbackEntry {
    pub fn new(kind: impl Into<String>, location: Location, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            location,
            detail: detail.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("kind".to_string(), Value::String(self.kind.clone()));
        match &self.location {
            Location::Path(path) => {
                map.insert("path".to_string(), Value::String(path.clone()));
            }
            Location::Step(step) => {
                map.insert("step".to_string(), json!(step));
            }
            Location::Document => {}
        }
        map.insert("detail".to_string(), Value::String(self.detail.clone()));
        Value::Object(map)
    }
}

pub fn parse_entries(err: &ParseError) -> Vec<FeedbackEntry> {
    vec![FeedbackEntry::new(
        format!("parse_{}", err.reason),
        Location::Document,
        err.detail.clone(),
    )]
}

pub fn validation_entries(err: &ValidationError) -> Vec<FeedbackEntry> {
    err.violations
        .iter()
        .map(|violation| {
            FeedbackEntry::new(
                "schema",
                Location::Path(violation.path.clone()),
                format!("expected {}, found {}", violation.expected, violation.actual),
            )
        })
        .collect()
}

pub fn action_entries(err: &ActionError) -> Vec<FeedbackEntry> {
    let entry = match err {
        ActionError::UnknownOperation(err) => FeedbackEntry::new(
            "unknown_operation",
            Location::Path(format!("$.actions[{}].op", err.index)),
            format!("'{}' is not a registered operation", err.op),
        ),
        ActionError::Argument(err) => FeedbackEntry::new(
            "argument",
            Location::Path(format!("$.actions[{}].args.{}", err.index, err.param)),
            format!("{}: {}", err.op, err.detail),
        ),
    };
    vec![entry]
}

/// Structured rejection sent back to the model for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub attempt: usize,
    pub entries: Vec<FeedbackEntry>,
}

impl Feedback {
    pub fn new(attempt: usize, entries: Vec<FeedbackEntry>) -> Self {
        Self { attempt, entries }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "status": "rejected",
            "attempt": self.attempt,
            "errors": self.entries.iter().map(FeedbackEntry::to_json).collect::<Vec<_>>(),
        })
    }

    /// Conversation text: instruction line, then the compact payload.
    pub fn message(&self) -> String {
        format!("{REPAIR_INSTRUCTION}\n{}", self.to_json())
    }
}
