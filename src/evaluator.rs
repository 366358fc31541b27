//! Post-turn memory extraction
//!
//! After a turn completes, the evaluator asks the text generator whether the
//! exchange contains anything worth remembering and stores what clears the
//! confidence bar. Runs are debounced and single-flight. Failures are logged
//! and swallowed so turn completion never depends on them.

use crate::config::EvaluatorConfig;
use crate::llm::{extract_json_object, GenerateOptions, Message, TextGenerator};
use crate::memory::{MemoryManager, MemoryMetadata, MemorySource, MemoryType, RememberOptions};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Conversation messages sent along with the current turn
pub const CONTEXT_MESSAGES: usize = 6;

const EXTRACTION_MAX_TOKENS: u32 = 1_500;

const EXTRACTION_PROMPT: &str = r#"You review a conversation turn between a user and an assistant and decide whether it reveals anything about the user worth remembering for future conversations: stable facts, preferences, goals, or context.

Only extract information about the user that is likely to stay useful. Ignore small talk, one-off requests and anything the assistant said about itself.

Memory types:
- fact: objective information about the user (name, location, job, family)
- preference: likes, dislikes, preferred styles or tools
- goal: something the user wants to achieve
- short-term: context relevant for the next few days
- long-term: lasting background context

Respond with strict JSON and nothing else:
{"hasMemorableContent": true, "memories": [{"type": "fact", "content": "<one sentence about the user>", "tags": ["<tag>"], "confidence": 0.0, "reasoning": "<why this is worth remembering>"}]}

When there is nothing to remember respond with {"hasMemorableContent": false, "memories": []}."#;

/// Result of one `evaluate_conversation` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Evaluation is turned off
    Disabled,
    /// Called again too soon after the previous run started
    Debounced,
    /// Another evaluation is still running
    Busy,
    /// Ran to completion and stored `created` memories
    Completed { created: usize },
    /// Generation or parsing failed; nothing stored
    Failed,
}

/// Internal failure of an extraction run. Never leaves the evaluator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("unusable extraction response: {0}")]
    Parse(String),
}

/// One memory proposed by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub reasoning: Option<String>,
}

/// Validated model reply
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResponse {
    pub has_memorable_content: bool,
    pub memories: Vec<ExtractedMemory>,
}

/// Parse a model reply. Any invalid entry rejects the whole reply.
pub fn parse_extraction(reply: &str) -> std::result::Result<ExtractionResponse, ExtractionError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| ExtractionError::Parse("no JSON object in reply".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let has_memorable_content = value
        .get("hasMemorableContent")
        .and_then(Value::as_bool)
        .ok_or_else(|| ExtractionError::Parse("hasMemorableContent is not a boolean".to_string()))?;
    let entries = value
        .get("memories")
        .and_then(Value::as_array)
        .ok_or_else(|| ExtractionError::Parse("memories is not an array".to_string()))?;

    let memories = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| parse_entry(entry).map_err(|e| ExtractionError::Parse(format!("memory {i}: {e}"))))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ExtractionResponse {
        has_memorable_content,
        memories,
    })
}

fn parse_entry(entry: &Value) -> std::result::Result<ExtractedMemory, String> {
    let memory_type = entry
        .get("type")
        .and_then(Value::as_str)
        .ok_or("type is missing")?
        .parse::<MemoryType>()
        .map_err(|e| e.to_string())?;

    let content = entry
        .get("content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or("content is missing")?
        .to_string();

    let tags = entry
        .get("tags")
        .and_then(Value::as_array)
        .ok_or("tags is not an array")?
        .iter()
        .map(|t| t.as_str().map(str::to_string).ok_or("tag is not a string"))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let confidence = entry
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or("confidence is not a number")?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside [0, 1]"));
    }

    let reasoning = entry
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ExtractedMemory {
        memory_type,
        content,
        tags,
        confidence: confidence as f32,
        reasoning,
    })
}

/// Clears the in-flight flag when an evaluation ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Extracts memories from completed turns
pub struct MemoryEvaluator {
    manager: Arc<MemoryManager>,
    generator: Arc<dyn TextGenerator>,
    config: RwLock<Arc<EvaluatorConfig>>,
    in_flight: AtomicBool,
    last_started: Mutex<Option<Instant>>,
}

impl MemoryEvaluator {
    pub fn new(
        manager: Arc<MemoryManager>,
        generator: Arc<dyn TextGenerator>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            manager,
            generator,
            config: RwLock::new(Arc::new(config)),
            in_flight: AtomicBool::new(false),
            last_started: Mutex::new(None),
        }
    }

    pub async fn config(&self) -> Arc<EvaluatorConfig> {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: EvaluatorConfig) {
        *self.config.write().await = Arc::new(config);
    }

    /// Evaluate one completed turn. Concurrent calls are skipped, not
    /// queued; calls within `debounceMs` of the last start are skipped.
    pub async fn evaluate_conversation(
        &self,
        user_message: &str,
        ai_response: &str,
        full_conversation: &[Message],
    ) -> EvaluationOutcome {
        let config = self.config().await;
        if !config.enabled {
            return EvaluationOutcome::Disabled;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Memory evaluation already running, skipping turn");
            return EvaluationOutcome::Busy;
        }
        let _in_flight = InFlight(&self.in_flight);

        if !self.start_window_open(config.debounce_ms) {
            tracing::debug!("Memory evaluation debounced");
            return EvaluationOutcome::Debounced;
        }

        match self
            .extract(user_message, ai_response, full_conversation)
            .await
        {
            Ok(response) => {
                let created = self.store_extracted(response, &config).await;
                EvaluationOutcome::Completed { created }
            }
            Err(e) => {
                tracing::warn!("Memory evaluation failed: {}", e);
                EvaluationOutcome::Failed
            }
        }
    }

    /// Record a start unless the previous one is less than `debounce_ms` ago
    fn start_window_open(&self, debounce_ms: u64) -> bool {
        let now = Instant::now();
        let mut last = match self.last_started.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = *last {
            if now.duration_since(previous) < Duration::from_millis(debounce_ms) {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    async fn extract(
        &self,
        user_message: &str,
        ai_response: &str,
        full_conversation: &[Message],
    ) -> std::result::Result<ExtractionResponse, ExtractionError> {
        let start = full_conversation.len().saturating_sub(CONTEXT_MESSAGES);
        let mut turns: Vec<Message> = full_conversation[start..].to_vec();
        turns.push(Message::user(format!(
            "Evaluate this turn for memorable information about the user.\n\n\
             User: {user_message}\n\nAssistant: {ai_response}"
        )));

        let options = GenerateOptions::new()
            .with_max_tokens(EXTRACTION_MAX_TOKENS)
            .with_temperature(0.0);
        let reply = self
            .generator
            .generate_text(EXTRACTION_PROMPT, &turns, &options)
            .await
            .map_err(|e| ExtractionError::Generation(e.to_string()))?;

        parse_extraction(&reply)
    }

    async fn store_extracted(&self, response: ExtractionResponse, config: &EvaluatorConfig) -> usize {
        if !response.has_memorable_content {
            return 0;
        }

        let proposed = response.memories.len();
        let accepted: Vec<ExtractedMemory> = response
            .memories
            .into_iter()
            .filter(|m| m.confidence >= config.confidence_threshold)
            .take(config.max_memories_per_turn)
            .collect();
        tracing::debug!(
            "Evaluator proposed {} memories, {} above confidence {}",
            proposed,
            accepted.len(),
            config.confidence_threshold
        );

        let mut created = 0;
        for extracted in accepted {
            let metadata = MemoryMetadata {
                evaluator_generated: Some(true),
                confidence: Some(extracted.confidence),
                reasoning: extracted.reasoning,
                model: Some(self.generator.model_id().to_string()),
                ..MemoryMetadata::new(MemorySource::Ai)
            };
            let options = RememberOptions::new(extracted.memory_type, extracted.content)
                .tags(extracted.tags)
                .source(MemorySource::Ai)
                .metadata(metadata);
            match self.manager.remember(options).await {
                Ok(memory) => {
                    tracing::info!("Evaluator stored {} memory {}", memory.memory_type, memory.id);
                    created += 1;
                }
                Err(e) => tracing::warn!("Failed to store extracted memory: {}", e),
            }
        }
        created
    }
}
