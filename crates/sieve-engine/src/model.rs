use std::collections::VecDeque;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::conversation::Conversation;

const ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model call exceeded {0:?}")]
    Timeout(Duration),
    #[error("model transport failed: {0}")]
    Transport(String),
    #[error("model request failed ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("model reply had no text content")]
    EmptyReply,
    #[error("no scripted replies left")]
    Exhausted,
}

/// The one capability the retry loop needs from a model provider.
pub trait VisionModel {
    fn name(&self) -> &str;
    fn complete(&mut self, conversation: &Conversation, timeout: Duration) -> Result<String, ModelError>;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiVisionModel {
    api_base: String,
    api_key: String,
    model: String,
    http: HttpClient,
}

impl OpenAiVisionModel {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            http: HttpClient::new(),
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &RuntimeConfig, model: &str) -> Option<Self> {
        let key = config.openai_api_key.as_ref()?;
        Some(Self::new(&config.openai_api_base, key, model))
    }

    pub fn request_body(&self, conversation: &Conversation) -> Value {
        json!({
            "model": self.model,
            "messages": conversation.to_openai_messages(),
            "temperature": 0,
            "response_format": {"type": "json_object"},
        })
    }
}

impl VisionModel for OpenAiVisionModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete(&mut self, conversation: &Conversation, timeout: Duration) -> Result<String, ModelError> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(&self.request_body(conversation))
            .send()
            .map_err(|err| transport_error(err, timeout))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| transport_error(err, timeout))?;
        if !status.is_success() {
            return Err(ModelError::Rejected {
                status: status.as_u16(),
                body: truncate_text(&body, ERROR_BODY_CHARS),
            });
        }
        let payload: Value = serde_json::from_str(&body)
            .map_err(|err| ModelError::Transport(format!("invalid JSON payload: {err}")))?;
        reply_text(&payload).ok_or(ModelError::EmptyReply)
    }
}

/// Replays fixed replies in order. Used for offline replays and tests.
#[derive(Debug, Clone, Default)]
pub struct ReplayModel {
    replies: VecDeque<Result<String, ModelError>>,
    calls: usize,
}

impl ReplayModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(|reply| Ok(reply.into())).collect(),
            calls: 0,
        }
    }

    pub fn push_reply(&mut self, reply: impl Into<String>) {
        self.replies.push_back(Ok(reply.into()));
    }

    pub fn push_error(&mut self, err: ModelError) {
        self.replies.push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl VisionModel for ReplayModel {
    fn name(&self) -> &str {
        "replay"
    }

    fn complete(&mut self, _conversation: &Conversation, _timeout: Duration) -> Result<String, ModelError> {
        self.calls += 1;
        self.replies.pop_front().unwrap_or(Err(ModelError::Exhausted))
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout(timeout)
    } else {
        ModelError::Transport(err.to_string())
    }
}

/// `choices[0].message.content`, either a string or an array of text parts.
fn reply_text(payload: &Value) -> Option<String> {
    let content = payload.pointer("/choices/0/message/content")?;
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "..."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_text_reads_string_and_part_arrays() {
        let plain = json!({"choices": [{"message": {"content": "{\"actions\": []}"}}]});
        assert_eq!(reply_text(&plain).as_deref(), Some("{\"actions\": []}"));

        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "{"}, {"type": "text", "text": "}"}]}}]});
        assert_eq!(reply_text(&parts).as_deref(), Some("{}"));

        assert_eq!(reply_text(&json!({"choices": []})), None);
        assert_eq!(reply_text(&json!({"choices": [{"message": {"content": "  "}}]})), None);
    }

    #[test]
    fn request_body_carries_model_and_messages() {
        let model = OpenAiVisionModel::new("http://127.0.0.1:1/v1/", "sk-test", "gpt-4o-mini");
        let body = model.request_body(&Conversation::new("system"));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(model.api_base, "http://127.0.0.1:1/v1");
    }

    #[test]
    fn replay_model_runs_dry() {
        let mut model = ReplayModel::new(["one"]);
        model.push_error(ModelError::Timeout(Duration::from_secs(1)));
        let conversation = Conversation::default();
        assert_eq!(model.complete(&conversation, Duration::from_secs(1)), Ok("one".to_string()));
        assert!(matches!(model.complete(&conversation, Duration::ZERO), Err(ModelError::Timeout(_))));
        assert_eq!(model.complete(&conversation, Duration::ZERO), Err(ModelError::Exhausted));
        assert_eq!(model.calls(), 3);
    }
}
