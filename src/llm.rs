//! Text generation capability consumed by the injector and the evaluator
//!
//! Provider clients live outside this crate. Anything that can turn a system
//! prompt plus conversation turns into text implements [`TextGenerator`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
            id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
            id: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Per-call generation options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Abstract "generate text" capability.
///
/// Latency and failure modes are opaque to callers. Callers that need a
/// bound impose their own timeout.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply to `turns` under `system_prompt`.
    async fn generate_text(
        &self,
        system_prompt: &str,
        turns: &[Message],
        options: &GenerateOptions,
    ) -> Result<String>;

    /// Identifier of the model behind this generator, recorded on
    /// evaluator-generated memories.
    fn model_id(&self) -> &str;
}

/// Locate the JSON object in a model reply.
///
/// Accepts a bare object, an object inside a fenced code block, or an
/// object surrounded by prose (first `{` to last `}`).
pub fn extract_json_object(text: &str) -> Option<&str> {
    let text = text.trim();

    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') && inner.ends_with('}') {
                return Some(inner);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let parsed: Message =
            serde_json::from_str(r#"{"role":"assistant","content":"ok","id":"m1"}"#).unwrap();
        assert_eq!(parsed.role, Role::Assistant);
        assert_eq!(parsed.id.as_deref(), Some("m1"));
        assert!(!parsed.is_user());
    }

    #[test]
    fn test_extract_bare_object() {
        assert_eq!(extract_json_object(r#" {"a": 1} "#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_extract_fenced_object() {
        let reply = "Here you go:\n```json\n{\"a\": {\"b\": 2}}\n```\nDone.";
        assert_eq!(extract_json_object(reply), Some(r#"{"a": {"b": 2}}"#));
    }

    #[test]
    fn test_extract_object_in_prose() {
        let reply = "Sure! {\"ok\": true} Hope that helps.";
        assert_eq!(extract_json_object(reply), Some(r#"{"ok": true}"#));
    }

    #[test]
    fn test_extract_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[tokio::test]
    async fn test_scripted_generator_plays_back_in_order() {
        let generator = testing::ScriptedGenerator::new().reply("first").fail("boom");
        let options = GenerateOptions::new();

        let first = generator
            .generate_text("sys", &[Message::user("hi")], &options)
            .await
            .unwrap();
        assert_eq!(first, "first");
        assert!(generator.generate_text("sys", &[], &options).await.is_err());
        assert!(generator.generate_text("sys", &[], &options).await.is_err());

        let calls = generator.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].turns[0].content, "hi");
        assert_eq!(generator.model_id(), "scripted-model");
    }
}
