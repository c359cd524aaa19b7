use std::time::{Duration, Instant};

use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};
use sieve_contracts::events::EventWriter;
use sieve_contracts::expr::Value;
use sieve_contracts::feedback::{Feedback, FeedbackEntry};
use sieve_contracts::output::parse_payload;
use sieve_contracts::scene::SceneGraph;
use thiserror::Error;

use crate::conversation::Conversation;
use crate::model::{ModelError, VisionModel};
use crate::stages::{StageDriver, TurnError};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What happens to scene mutations made by a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationPolicy {
    /// Keep whatever the failed attempt applied.
    #[default]
    Retain,
    /// Snapshot the scene before each attempt and restore it on failure.
    RestoreOnFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub results: Vec<Value>,
    /// 1-based attempt that succeeded.
    pub attempts: usize,
    pub reply: String,
    pub consumed: String,
}

impl TurnOutcome {
    pub fn results_json(&self) -> Json {
        Json::Array(self.results.iter().map(Value::to_json).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("turn failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhaustedError {
    pub attempts: usize,
    pub last_error: TurnError,
}

/// Bounded repair loop for one turn.
///
/// Each failed attempt is turned into structured feedback and appended to a
/// private copy of the conversation before the model is asked again.
pub struct RetryController<M: VisionModel> {
    model: M,
    max_attempts: usize,
    timeout: Duration,
    mutation_policy: MutationPolicy,
    events: Option<EventWriter>,
}

impl<M: VisionModel> RetryController<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            mutation_policy: MutationPolicy::default(),
            events: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mutation_policy(mut self, policy: MutationPolicy) -> Self {
        self.mutation_policy = policy;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn run_turn(
        &mut self,
        stage: &dyn StageDriver,
        conversation: &Conversation,
        scene: &mut SceneGraph,
    ) -> Result<TurnOutcome, RetryExhaustedError> {
        let mut conversation = conversation.clone();
        self.emit(
            "turn_started",
            json!({
                "stage": stage.kind().as_str(),
                "model": self.model.name(),
                "max_attempts": self.max_attempts,
                "timeout_ms": self.timeout.as_millis() as u64,
            }),
        );

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            self.emit("attempt_started", json!({ "attempt": attempt }));
            let backup = match self.mutation_policy {
                MutationPolicy::Retain => None,
                MutationPolicy::RestoreOnFailure => Some(scene.clone()),
            };

            let reply = match self.call_model(&conversation) {
                Ok(reply) => reply,
                Err(err) => {
                    let error = TurnError::Model(err);
                    self.attempt_failed(attempt, &error.feedback_entries(), None);
                    last_error = Some(error);
                    continue;
                }
            };
            conversation.push_assistant(reply.clone());

            let (consumed, result) = match parse_payload(&reply) {
                Ok(parsed) => {
                    let result = stage.apply(&parsed.document, scene);
                    (parsed.consumed, result)
                }
                Err(err) => (reply.clone(), Err(TurnError::Parse(err))),
            };

            match result {
                Ok(output) => {
                    self.emit(
                        "turn_succeeded",
                        json!({
                            "attempt": attempt,
                            "results": output.to_json(),
                            "payload_sha256": digest(&consumed),
                        }),
                    );
                    return Ok(TurnOutcome {
                        results: output.results,
                        attempts: attempt,
                        reply,
                        consumed,
                    });
                }
                Err(error) => {
                    if let Some(backup) = backup {
                        *scene = backup;
                    }
                    let feedback = Feedback::new(attempt, error.feedback_entries());
                    self.attempt_failed(attempt, &feedback.entries, Some(&consumed));
                    conversation.push_feedback(&feedback);
                    last_error = Some(error);
                }
            }
        }

        let last_error = last_error.unwrap_or(TurnError::Model(ModelError::Exhausted));
        self.emit(
            "turn_exhausted",
            json!({
                "attempts": self.max_attempts,
                "kind": last_error.kind(),
                "error": last_error.to_string(),
            }),
        );
        Err(RetryExhaustedError {
            attempts: self.max_attempts,
            last_error,
        })
    }

    /// A reply that arrives after the deadline is discarded as a timeout.
    fn call_model(&mut self, conversation: &Conversation) -> Result<String, ModelError> {
        let started = Instant::now();
        let reply = self.model.complete(conversation, self.timeout)?;
        if started.elapsed() > self.timeout {
            return Err(ModelError::Timeout(self.timeout));
        }
        Ok(reply)
    }

    fn attempt_failed(&self, attempt: usize, entries: &[FeedbackEntry], consumed: Option<&str>) {
        let mut payload = json!({
            "attempt": attempt,
            "errors": entries.iter().map(FeedbackEntry::to_json).collect::<Vec<_>>(),
        });
        if let Some(consumed) = consumed {
            payload["payload_sha256"] = Json::String(digest(consumed));
        }
        self.emit("attempt_failed", payload);
    }

    fn emit(&self, event_type: &str, payload: Json) {
        if let Some(events) = &self.events {
            let _ = events.emit_json(event_type, payload);
        }
    }
}

fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use sieve_contracts::events::read_events;
    use sieve_contracts::scene::{NodeId, Rect};

    use super::*;
    use crate::model::ReplayModel;
    use crate::stages::{ActionStage, StepStage};

    const SPLIT: &str = r#"{"actions":[{"op":"split","args":{"axis":"x","ratio":0.5}}]}"#;

    fn scene() -> SceneGraph {
        let mut scene = SceneGraph::new();
        scene
            .add_root_frame(Rect::new(0.0, 0.0, 200.0, 100.0))
            .unwrap();
        scene
    }

    fn conversation() -> Conversation {
        let mut conversation = Conversation::new("Describe the puzzle layout as JSON.");
        conversation.push_user("Here is the challenge.", Vec::new());
        conversation
    }

    /// Remembers the last message of every conversation it was shown.
    struct Recording {
        replies: VecDeque<String>,
        seen: Vec<String>,
    }

    impl VisionModel for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn complete(&mut self, conversation: &Conversation, _timeout: Duration) -> Result<String, ModelError> {
            self.seen
                .push(conversation.last().map(|m| m.plain_text()).unwrap_or_default());
            self.replies.pop_front().ok_or(ModelError::Exhausted)
        }
    }

    #[test]
    fn budget_of_n_exhausts_on_the_nth_failure() {
        for budget in 1..=4 {
            let model = ReplayModel::new(vec!["no json here"; budget + 2]);
            let mut controller = RetryController::new(model).with_max_attempts(budget);
            let stage = ActionStage::new().with_structure_check(false);
            let err = controller
                .run_turn(&stage, &conversation(), &mut scene())
                .unwrap_err();
            assert_eq!(err.attempts, budget);
            assert!(matches!(err.last_error, TurnError::Parse(_)));
            assert_eq!(controller.model().calls(), budget);
        }
    }

    #[test]
    fn feedback_reaches_the_model_and_second_attempt_succeeds() {
        let model = Recording {
            replies: VecDeque::from(vec![
                r#"{"actions":[{"op":"shell","args":{}}]}"#.to_string(),
                format!("Sure:\n```json\n{SPLIT}\n```"),
            ]),
            seen: Vec::new(),
        };
        let mut controller = RetryController::new(model);
        let stage = ActionStage::new().with_structure_check(false);
        let mut scene = scene();
        let outcome = controller
            .run_turn(&stage, &conversation(), &mut scene)
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.consumed, SPLIT);
        assert_eq!(outcome.results_json(), json!([["f1", "f2"]]));

        let model = controller.into_model();
        assert_eq!(model.seen[0], "Here is the challenge.");
        assert!(model.seen[1].contains("\"status\":\"rejected\""));
        assert!(model.seen[1].contains("$.actions[0].op"));
    }

    #[test]
    fn model_timeouts_consume_attempts() {
        let mut model = ReplayModel::default();
        model.push_error(ModelError::Timeout(DEFAULT_TIMEOUT));
        model.push_reply(SPLIT);
        let mut controller = RetryController::new(model).with_max_attempts(2);
        let outcome = controller
            .run_turn(&ActionStage::new().with_structure_check(false), &conversation(), &mut scene())
            .unwrap();
        assert_eq!(outcome.attempts, 2);

        let mut model = ReplayModel::default();
        model.push_error(ModelError::Timeout(DEFAULT_TIMEOUT));
        let err = RetryController::new(model)
            .with_max_attempts(1)
            .run_turn(&ActionStage::new(), &conversation(), &mut scene())
            .unwrap_err();
        assert_eq!(err.last_error, TurnError::Model(ModelError::Timeout(DEFAULT_TIMEOUT)));
    }

    /// Sleeps through its first call, then answers at once.
    struct Slow {
        delay: Duration,
        calls: usize,
    }

    impl VisionModel for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn complete(&mut self, _conversation: &Conversation, _timeout: Duration) -> Result<String, ModelError> {
            self.calls += 1;
            if self.calls == 1 {
                std::thread::sleep(self.delay);
            }
            Ok(SPLIT.to_string())
        }
    }

    #[test]
    fn late_reply_is_discarded_as_timeout() {
        let timeout = Duration::from_millis(20);
        let slow = Slow {
            delay: Duration::from_millis(80),
            calls: 0,
        };
        let mut controller = RetryController::new(slow).with_timeout(timeout);
        let mut scene = scene();
        let outcome = controller
            .run_turn(&ActionStage::new().with_structure_check(false), &conversation(), &mut scene)
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(controller.model().calls, 2);
        assert_eq!(scene.terminal_frames().count(), 2);

        let slow = Slow {
            delay: Duration::from_millis(80),
            calls: 0,
        };
        let mut scene = self::scene();
        let err = RetryController::new(slow)
            .with_timeout(timeout)
            .with_max_attempts(1)
            .run_turn(&ActionStage::new().with_structure_check(false), &conversation(), &mut scene)
            .unwrap_err();
        assert_eq!(err.last_error, TurnError::Model(ModelError::Timeout(timeout)));
        assert_eq!(scene.terminal_frames().count(), 1);
    }

    #[test]
    fn structure_rejection_is_repaired_on_a_clean_scene() {
        let model = ReplayModel::new([
            r#"{"actions":[{"op":"split","args":{"axis":"y","ratio":0.8}}]}"#,
            r#"{"actions":[
                {"op":"split","args":{"axis":"y","ratio":0.8}},
                {"op":"tile","args":{"frame":"f1","tiles":9,"label":"selectable"}},
                {"op":"label_frame","args":{"frame":"f2","label":"next"}}
            ]}"#,
        ]);
        let mut controller = RetryController::new(model);
        let mut scene = scene();
        let outcome = controller
            .run_turn(&ActionStage::new(), &conversation(), &mut scene)
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.results_json()[0], json!(["f1", "f2"]));
        assert_eq!(scene.terminal_frames().count(), 2);
        assert!(scene.frame(&NodeId::from("f3")).is_none());
    }

    #[test]
    fn mutation_policy_controls_failed_attempt_effects() {
        let reply = r#"{"steps":[
            {"binding":"halves","call":"f0.split","args":["x",0.5]},
            {"binding":null,"call":"click","args":[{"var":"missing"}]}
        ]}"#;

        let mut retained = scene();
        let err = RetryController::new(ReplayModel::new([reply]))
            .with_max_attempts(1)
            .run_turn(&StepStage::default(), &conversation(), &mut retained)
            .unwrap_err();
        assert!(matches!(err.last_error, TurnError::Execution(ref abort) if abort.at_step == 2));
        assert!(retained.frame(&NodeId::from("f1")).is_some());

        let mut restored = scene();
        let original = restored.clone();
        RetryController::new(ReplayModel::new([reply]))
            .with_max_attempts(1)
            .with_mutation_policy(MutationPolicy::RestoreOnFailure)
            .run_turn(&StepStage::default(), &conversation(), &mut restored)
            .unwrap_err();
        assert_eq!(restored, original);
    }

    #[test]
    fn turn_events_are_logged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let model = ReplayModel::new(["{\"actions\": 1}", SPLIT]);
        let mut controller = RetryController::new(model).with_events(EventWriter::new(&path, "run-7"));
        controller
            .run_turn(&ActionStage::new().with_structure_check(false), &conversation(), &mut scene())
            .map_err(|err| anyhow::anyhow!(err))?;

        let events = read_events(&path)?;
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "turn_started",
                "attempt_started",
                "attempt_failed",
                "attempt_started",
                "turn_succeeded"
            ]
        );
        let failed = &events[2];
        assert_eq!(failed["run_id"], "run-7");
        assert_eq!(failed["errors"][0]["kind"], "schema");
        assert_eq!(failed["errors"][0]["path"], "$.actions");
        assert_eq!(failed["payload_sha256"].as_str().map(str::len), Some(64));
        Ok(())
    }
}
