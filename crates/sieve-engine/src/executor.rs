use serde_json::Value as Json;
use sieve_contracts::expr::{Environment, EvalError, EvalErrorKind, Evaluator, Value, DEFAULT_MAX_DEPTH};
use sieve_contracts::scene::{NodeKind, NodeRef, SceneError, SceneGraph};
use sieve_contracts::schema::{Step, StepDocument};
use thiserror::Error;

use crate::methods::{call_method, method_names};
use crate::tools::ToolRegistry;

/// Why a single step could not run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepFailure {
    #[error("'{0}' is not a registered tool")]
    UnknownCall(String),
    #[error("{kind} has no callable method '{method}' (allowed: {allowed})")]
    MethodNotAllowed {
        kind: NodeKind,
        method: String,
        allowed: String,
    },
    #[error("'{target}' is a {found}, not a scene node")]
    NotANode { target: String, found: &'static str },
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("{call} takes {expected} argument(s), got {found}")]
    Arity {
        call: String,
        expected: usize,
        found: usize,
    },
    #[error("{call} argument {position}: expected {expected}, got {found}")]
    ArgumentType {
        call: String,
        position: usize,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Scene(#[from] SceneError),
}

impl StepFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            StepFailure::UnknownCall(_) => "unknown_call",
            StepFailure::MethodNotAllowed { .. } => "method_not_allowed",
            StepFailure::NotANode { .. } => "not_a_node",
            StepFailure::Eval(err) => err.kind.as_str(),
            StepFailure::Arity { .. } => "arity",
            StepFailure::ArgumentType { .. } => "argument_type",
            StepFailure::Scene(_) => "scene_precondition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("step {at_step} ({call}) aborted: {cause}")]
pub struct ExecutionAbortError {
    /// 1-based.
    pub at_step: usize,
    pub call: String,
    pub cause: StepFailure,
    /// Results of the steps that completed before the abort.
    pub completed: Vec<Value>,
}

enum Target {
    Tool(String),
    Method(NodeRef, String),
}

/// Runs a validated step document strictly in order.
///
/// Mutations made by completed steps stay applied when a later step fails.
#[derive(Clone, Copy)]
pub struct Executor<'a> {
    tools: &'a ToolRegistry,
    max_depth: usize,
}

impl<'a> Executor<'a> {
    pub fn new(tools: &'a ToolRegistry) -> Self {
        Self {
            tools,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn run(
        &self,
        document: &StepDocument,
        scene: &mut SceneGraph,
    ) -> Result<Vec<Value>, ExecutionAbortError> {
        let mut env = Environment::new();
        let mut results = Vec::with_capacity(document.steps.len());
        for (idx, step) in document.steps.iter().enumerate() {
            match self.run_step(step, &env, scene) {
                Ok(value) => {
                    if let Some(binding) = &step.binding {
                        env.bind(binding.clone(), value.clone());
                    }
                    results.push(value);
                }
                Err(cause) => {
                    return Err(ExecutionAbortError {
                        at_step: idx + 1,
                        call: step.call.clone(),
                        cause,
                        completed: results,
                    })
                }
            }
        }
        Ok(results)
    }

    fn run_step(
        &self,
        step: &Step,
        env: &Environment,
        scene: &mut SceneGraph,
    ) -> Result<Value, StepFailure> {
        let target = self.resolve_call(&step.call, env, scene)?;
        let args = {
            let evaluator = Evaluator::new(scene, env).with_max_depth(self.max_depth);
            step.args
                .iter()
                .map(|arg| evaluator.eval(arg))
                .collect::<Result<Vec<_>, _>>()?
        };
        match target {
            Target::Tool(name) => {
                let tool = self
                    .tools
                    .get(&name)
                    .ok_or_else(|| StepFailure::UnknownCall(name.clone()))?;
                tool.invoke(scene, &args)
            }
            Target::Method(node, method) => call_method(scene, &node, &method, &args),
        }
    }

    /// Bindings shadow node ids; the method must be whitelisted for the node kind.
    fn resolve_call(
        &self,
        call: &str,
        env: &Environment,
        scene: &SceneGraph,
    ) -> Result<Target, StepFailure> {
        let Some((target, method)) = call.split_once('.') else {
            if self.tools.get(call).is_none() {
                return Err(StepFailure::UnknownCall(call.to_string()));
            }
            return Ok(Target::Tool(call.to_string()));
        };
        let node = match env.get(target) {
            Some(Value::Node(node)) => node.clone(),
            Some(other) => {
                return Err(StepFailure::NotANode {
                    target: target.to_string(),
                    found: other.type_name(),
                })
            }
            None => scene.resolve(target).ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::UnknownIdentifier,
                    format!("'{target}' is neither a binding nor a scene node"),
                )
            })?,
        };
        let allowed = method_names(node.kind);
        if !allowed.contains(&method) {
            return Err(StepFailure::MethodNotAllowed {
                kind: node.kind,
                method: method.to_string(),
                allowed: allowed.join(", "),
            });
        }
        Ok(Target::Method(node, method.to_string()))
    }
}

/// Step results as plain JSON, nodes rendered as ids.
pub fn results_json(results: &[Value]) -> Json {
    Json::Array(results.iter().map(Value::to_json).collect())
}
