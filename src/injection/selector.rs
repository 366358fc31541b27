//! AI-assisted memory selection
//!
//! Hands a bounded candidate pool to the text generator and asks it to pick
//! the memories relevant to the conversation. The call races a hard deadline;
//! the injector treats every `SelectionError` as a signal to fall back to
//! algorithmic scoring.

use super::context::ConversationContext;
use crate::config::AiSelectorConfig;
use crate::llm::{extract_json_object, GenerateOptions, Message, TextGenerator};
use crate::memory::{Memory, ScoredMemory};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const SELECTION_MAX_TOKENS: u32 = 1_000;

/// Internal failure of the AI-assisted path. Never leaves the injector.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("selection timed out after {0:?}")]
    Timeout(Duration),

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("unusable selection response: {0}")]
    Parse(String),
}

/// Delegates relevance judgement to a `TextGenerator`
pub struct AiSelector {
    generator: Arc<dyn TextGenerator>,
}

impl AiSelector {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Ask the model to pick from `candidates`.
    ///
    /// When the deadline passes the pending call is dropped; nothing from
    /// it is observed afterwards.
    pub async fn select(
        &self,
        candidates: &[Memory],
        context: &ConversationContext,
        config: &AiSelectorConfig,
    ) -> std::result::Result<Vec<ScoredMemory>, SelectionError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let system_prompt = build_selection_prompt(candidates, config);
        let turns: Vec<Message> = context
            .recent_messages
            .iter()
            .map(|m| Message::user(m.text.clone()))
            .collect();
        let options = GenerateOptions::new()
            .with_max_tokens(SELECTION_MAX_TOKENS)
            .with_temperature(0.0);

        let deadline = Duration::from_millis(config.timeout_ms);
        let reply = tokio::time::timeout(
            deadline,
            self.generator.generate_text(&system_prompt, &turns, &options),
        )
        .await
        .map_err(|_| SelectionError::Timeout(deadline))?
        .map_err(|e| SelectionError::Generation(e.to_string()))?;

        let selected = parse_selection(&reply, candidates, config)?;
        tracing::debug!(
            "AI selector kept {} of {} candidates",
            selected.len(),
            candidates.len()
        );
        Ok(selected)
    }
}

/// Instruction sent with the candidate pool
pub fn build_selection_prompt(candidates: &[Memory], config: &AiSelectorConfig) -> String {
    let mut listing = String::new();
    for memory in candidates {
        listing.push_str(&format!(
            "- id: {} | type: {} | content: {}",
            memory.id,
            memory.memory_type,
            memory.content.replace('\n', " ")
        ));
        if !memory.tags.is_empty() {
            listing.push_str(&format!(" | tags: {}", memory.tags.join(", ")));
        }
        listing.push('\n');
    }

    format!(
        "You select which stored memories about the user are relevant to the \
         conversation that follows.\n\n\
         Candidate memories:\n{listing}\n\
         Pick at most {max} memories that would help answer the user's latest \
         messages. Score each from 0.0 to 1.0. Only use ids from the list above.\n\n\
         Respond with strict JSON and nothing else:\n\
         {{\"selected_memories\": [{{\"id\": \"<memory id>\", \"relevance_score\": 0.0, \
         \"reason\": \"<short reason>\"}}]}}",
        max = config.max_memories,
    )
}

/// Validate a model reply against the candidate pool.
///
/// The reply must hold a `selected_memories` array. Entries with an unknown
/// id, a non-numeric score or an empty reason are dropped; scores are
/// clamped to `[0, 1]` before the threshold applies.
pub fn parse_selection(
    reply: &str,
    candidates: &[Memory],
    config: &AiSelectorConfig,
) -> std::result::Result<Vec<ScoredMemory>, SelectionError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| SelectionError::Parse("no JSON object in reply".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| SelectionError::Parse(e.to_string()))?;
    let entries = value
        .get("selected_memories")
        .and_then(Value::as_array)
        .ok_or_else(|| SelectionError::Parse("selected_memories is not an array".to_string()))?;

    let by_id: HashMap<&str, &Memory> = candidates.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for entry in entries {
        let id = entry.get("id").and_then(Value::as_str);
        let score = entry.get("relevance_score").and_then(Value::as_f64);
        let reason = entry
            .get("reason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty());

        let (Some(id), Some(score), Some(reason)) = (id, score, reason) else {
            tracing::debug!("Dropping malformed selection entry: {}", entry);
            continue;
        };
        let Some(memory) = by_id.get(id) else {
            tracing::debug!("Dropping selection of unknown memory {}", id);
            continue;
        };
        if !seen.insert(id) {
            continue;
        }

        let scored = ScoredMemory::new((*memory).clone(), score as f32, reason);
        if scored.relevance_score >= config.relevance_threshold {
            selected.push(scored);
        }
    }

    selected.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    selected.truncate(config.max_memories);
    Ok(selected)
}
