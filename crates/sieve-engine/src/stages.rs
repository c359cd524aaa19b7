use serde_json::Value as Json;
use sieve_contracts::actions::{ActionError, ActionRegistry, ArgumentError, UnknownOperationError};
use sieve_contracts::expr::Value;
use sieve_contracts::feedback::{
    action_entries, parse_entries, validation_entries, FeedbackEntry, Location,
};
use sieve_contracts::output::{parse_payload, ParseError, ParsedPayload};
use sieve_contracts::scene::{SceneError, SceneGraph};
use sieve_contracts::schema::{
    self, validate_actions, validate_description, validate_steps, FieldViolation, ValidationError,
};
use thiserror::Error;

use crate::executor::{ExecutionAbortError, Executor};
use crate::model::ModelError;
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("scene must carry exactly one interaction kind besides 'next' and at most one 'next' (found kinds [{}], {next_count} next)", .kinds.join(", "))]
pub struct StructureError {
    pub kinds: Vec<String>,
    pub next_count: usize,
}

/// Everything that can fail inside one attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TurnError {
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    UnknownOperation(UnknownOperationError),
    #[error(transparent)]
    Argument(ArgumentError),
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error(transparent)]
    Execution(#[from] ExecutionAbortError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<ActionError> for TurnError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::UnknownOperation(err) => TurnError::UnknownOperation(err),
            ActionError::Argument(err) => TurnError::Argument(err),
        }
    }
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::Parse(_) => "parse",
            TurnError::Validation(_) => "validation",
            TurnError::UnknownOperation(_) => "unknown_operation",
            TurnError::Argument(_) => "argument",
            TurnError::Structure(_) => "structure",
            TurnError::Execution(_) => "execution",
            TurnError::Model(_) => "model",
        }
    }

    /// Per-violation entries for the repair message.
    pub fn feedback_entries(&self) -> Vec<FeedbackEntry> {
        match self {
            TurnError::Parse(err) => parse_entries(err),
            TurnError::Validation(err) => validation_entries(err),
            TurnError::UnknownOperation(err) => {
                action_entries(&ActionError::UnknownOperation(err.clone()))
            }
            TurnError::Argument(err) => action_entries(&ActionError::Argument(err.clone())),
            TurnError::Structure(err) => vec![FeedbackEntry::new(
                "structure",
                Location::Document,
                err.to_string(),
            )],
            TurnError::Execution(err) => vec![FeedbackEntry::new(
                err.cause.kind(),
                Location::Step(err.at_step),
                format!("{}: {}", err.call, err.cause),
            )],
            TurnError::Model(err) => vec![FeedbackEntry::new(
                "model",
                Location::Document,
                err.to_string(),
            )],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub results: Vec<Value>,
}

impl StageOutput {
    pub fn to_json(&self) -> Json {
        Json::Array(self.results.iter().map(Value::to_json).collect())
    }
}

/// Validation and execution for one kind of stage document.
pub trait StageDriver {
    fn kind(&self) -> schema::Stage;
    fn apply(&self, document: &Json, scene: &mut SceneGraph) -> Result<StageOutput, TurnError>;

    /// Parse, validate and execute one model reply.
    fn run_reply(
        &self,
        reply: &str,
        scene: &mut SceneGraph,
    ) -> Result<(ParsedPayload, StageOutput), TurnError> {
        let parsed = parse_payload(reply)?;
        let output = self.apply(&parsed.document, scene)?;
        Ok((parsed, output))
    }
}

/// First stage: what each frame shows, how frames relate and what the
/// puzzle asks for. Returns the objective as its only result.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescribeStage;

impl DescribeStage {
    pub fn new() -> Self {
        Self
    }
}

impl StageDriver for DescribeStage {
    fn kind(&self) -> schema::Stage {
        schema::Stage::Describe
    }

    fn apply(&self, document: &Json, scene: &mut SceneGraph) -> Result<StageOutput, TurnError> {
        let document = validate_description(document, scene)?;
        let mut staged = scene.clone();
        for description in &document.descriptions {
            staged
                .describe_frame(&description.frame, &description.text)
                .map_err(|err| scene_violation("$.descriptions", err))?;
        }
        for relation in &document.relations {
            staged
                .relate_frames(&relation.from, relation.to.as_ref(), &relation.relationship)
                .map_err(|err| scene_violation("$.relations", err))?;
        }
        staged.set_objective(&document.objective);
        *scene = staged;
        Ok(StageOutput {
            results: vec![Value::String(document.objective)],
        })
    }
}

fn scene_violation(path: &str, err: SceneError) -> TurnError {
    TurnError::Validation(ValidationError {
        violations: vec![FieldViolation {
            path: path.to_string(),
            expected: "frames present in the scene".to_string(),
            actual: err.to_string(),
        }],
    })
}

/// Flat whitelist stage.
#[derive(Debug, Clone, Copy)]
pub struct ActionStage {
    registry: ActionRegistry,
    structure_check: bool,
}

impl Default for ActionStage {
    fn default() -> Self {
        Self {
            registry: ActionRegistry::new(),
            structure_check: true,
        }
    }
}

impl ActionStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_structure_check(mut self, enabled: bool) -> Self {
        self.structure_check = enabled;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }
}

impl StageDriver for ActionStage {
    fn kind(&self) -> schema::Stage {
        schema::Stage::Actions
    }

    fn apply(&self, document: &Json, scene: &mut SceneGraph) -> Result<StageOutput, TurnError> {
        let document = validate_actions(document)?;
        // Work on a copy so a rejected document leaves the caller's scene untouched.
        let mut staged = scene.clone();
        let results = self.registry.apply_document(&document, &mut staged)?;
        if self.structure_check {
            let summary = staged.structure_summary();
            let kinds = summary.interaction_kinds();
            if kinds.len() != 1 || summary.next_count > 1 {
                return Err(TurnError::Structure(StructureError {
                    kinds: kinds.iter().map(|kind| kind.to_string()).collect(),
                    next_count: summary.next_count,
                }));
            }
        }
        *scene = staged;
        Ok(StageOutput { results })
    }
}

/// Multi-step stage driven by the restricted expression grammar.
pub struct StepStage {
    tools: ToolRegistry,
    max_depth: Option<usize>,
}

impl Default for StepStage {
    fn default() -> Self {
        Self::new(ToolRegistry::with_builtins())
    }
}

impl StepStage {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

impl StageDriver for StepStage {
    fn kind(&self) -> schema::Stage {
        schema::Stage::Steps
    }

    fn apply(&self, document: &Json, scene: &mut SceneGraph) -> Result<StageOutput, TurnError> {
        let document = validate_steps(document)?;
        let mut executor = Executor::new(&self.tools);
        if let Some(depth) = self.max_depth {
            executor = executor.with_max_depth(depth);
        }
        let results = executor.run(&document, scene)?;
        Ok(StageOutput { results })
    }
}
