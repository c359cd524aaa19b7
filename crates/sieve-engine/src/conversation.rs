use serde_json::{json, Value};
use sieve_contracts::feedback::Feedback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    /// Base64 data URL with an optional caption sent just before it.
    Image {
        caption: Option<String>,
        data_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text parts.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ordered chat history for one stage turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::text(Role::System, system)],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>, images: Vec<Part>) {
        let mut parts = vec![Part::Text(text.into())];
        parts.extend(images);
        self.messages.push(Message {
            role: Role::User,
            parts,
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::text(Role::Assistant, text));
    }

    pub fn push_feedback(&mut self, feedback: &Feedback) {
        self.messages
            .push(Message::text(Role::User, feedback.message()));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Chat-completions `messages` array.
    pub fn to_openai_messages(&self) -> Vec<Value> {
        self.messages
            .iter()
            .map(|message| {
                let has_images = message
                    .parts
                    .iter()
                    .any(|part| matches!(part, Part::Image { .. }));
                if !has_images {
                    return json!({"role": message.role.as_str(), "content": message.plain_text()});
                }
                let mut content = Vec::new();
                for part in &message.parts {
                    match part {
                        Part::Text(text) => content.push(json!({"type": "text", "text": text})),
                        Part::Image { caption, data_url } => {
                            if let Some(caption) = caption {
                                content.push(json!({"type": "text", "text": caption}));
                            }
                            content.push(json!({
                                "type": "image_url",
                                "image_url": {"url": data_url, "detail": "high"},
                            }));
                        }
                    }
                }
                json!({"role": message.role.as_str(), "content": content})
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use sieve_contracts::feedback::{FeedbackEntry, Location};

    use super::*;

    #[test]
    fn openai_messages_inline_captioned_images() {
        let mut conversation = Conversation::new("solve the puzzle");
        conversation.push_user(
            "Frames follow.",
            vec![Part::Image {
                caption: Some("Frame f0".to_string()),
                data_url: "data:image/jpeg;base64,AAAA".to_string(),
            }],
        );
        conversation.push_assistant("{}");
        conversation.push_feedback(&Feedback::new(
            1,
            vec![FeedbackEntry::new("schema", Location::Path("$.actions".into()), "missing")],
        ));

        let messages = conversation.to_openai_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], json!({"role": "system", "content": "solve the puzzle"}));
        assert_eq!(messages[1]["content"][1], json!({"type": "text", "text": "Frame f0"}));
        assert_eq!(messages[1]["content"][2]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
        assert_eq!(messages[3]["role"], "user");
        assert!(messages[3]["content"].as_str().unwrap_or("").contains("\"rejected\""));
    }
}
