//! Runtime side of the structured-output layer: step execution, stage
//! drivers, the bounded retry loop and the model capability it drives.

pub mod config;
pub mod conversation;
pub mod executor;
pub mod methods;
pub mod model;
pub mod observation;
pub mod policy;
pub mod retry;
pub mod stages;
pub mod tools;

pub use config::{ConfigError, RuntimeConfig};
pub use conversation::{Conversation, Message, Part, Role};
pub use executor::{ExecutionAbortError, Executor, StepFailure};
pub use model::{ModelError, OpenAiVisionModel, ReplayModel, VisionModel};
pub use policy::{Destination, NetworkPolicyError, PolicyConfig, PolicyDecision};
pub use retry::{MutationPolicy, RetryController, RetryExhaustedError, TurnOutcome};
pub use stages::{ActionStage, DescribeStage, StageDriver, StageOutput, StepStage, StructureError, TurnError};
pub use tools::{Tool, ToolRegistry, BUILTIN_TOOLS};
