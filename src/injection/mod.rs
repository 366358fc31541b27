//! Memory injection into outgoing prompts
//!
//! Before each turn the injector picks the memories relevant to the
//! conversation and writes them into the host prompt. It fails open: any
//! internal failure yields the original prompt unchanged.
//!
//! ```text
//! conversation ──► ContextExtractor ──► algorithmic::select ─────────────┐
//!                                   └─► candidate_pool ─► AiSelector ──┬─┤
//!                                          (timeout / error: fallback) ┘ │
//!                                                                        ▼
//!                                  prompt ◄── insert_into_prompt ◄── format_memories
//! ```

pub mod algorithmic;
pub mod context;
pub mod format;
pub mod selector;

pub use context::{ContextExtractor, ConversationContext, RecentMessage};
pub use format::{format_memories, insert_into_prompt, CONVERSATION_MARKER};
pub use selector::{AiSelector, SelectionError};

use crate::config::{MemoryInjectionConfig, SelectionStrategy};
use crate::error::Result;
use crate::llm::{Message, TextGenerator};
use crate::memory::{MemoryManager, ScoredMemory};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Selects relevant memories and formats them into prompts
pub struct MemoryInjector {
    manager: Arc<MemoryManager>,
    extractor: ContextExtractor,
    selector: Option<AiSelector>,
    /// Replaced wholesale on update, never mutated in place
    config: RwLock<Arc<MemoryInjectionConfig>>,
}

impl MemoryInjector {
    /// Without a generator the AI-assisted strategy degrades to algorithmic
    /// selection.
    pub fn new(
        manager: Arc<MemoryManager>,
        config: MemoryInjectionConfig,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Result<Self> {
        Ok(Self {
            manager,
            extractor: ContextExtractor::new()?,
            selector: generator.map(AiSelector::new),
            config: RwLock::new(Arc::new(config)),
        })
    }

    pub async fn config(&self) -> Arc<MemoryInjectionConfig> {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: MemoryInjectionConfig) {
        *self.config.write().await = Arc::new(config);
    }

    /// Return `prompt` enriched with the memories relevant to
    /// `conversation`. Disabled injection, an empty selection or any failure
    /// returns `prompt` byte-identical.
    pub async fn inject_memories(&self, prompt: &str, conversation: &[Message]) -> String {
        let config = self.config().await;
        if !config.enabled {
            return prompt.to_string();
        }

        match self.select_memories(conversation, &config).await {
            Ok(selected) => match format_memories(&selected) {
                Some(block) => {
                    tracing::debug!("Injecting {} memories into prompt", selected.len());
                    insert_into_prompt(prompt, &block)
                }
                None => prompt.to_string(),
            },
            Err(e) => {
                tracing::warn!("Memory injection failed, using original prompt: {}", e);
                prompt.to_string()
            }
        }
    }

    /// Memories selected for `conversation` under `config`
    pub async fn select_memories(
        &self,
        conversation: &[Message],
        config: &MemoryInjectionConfig,
    ) -> Result<Vec<ScoredMemory>> {
        let context = self
            .extractor
            .extract(conversation, config.use_conversation_context);
        if context.is_empty() {
            return Ok(Vec::new());
        }

        match (config.selection_strategy, &self.selector) {
            (SelectionStrategy::AiAssisted, Some(selector)) => {
                let pool = algorithmic::candidate_pool(&self.manager, &context, config).await?;
                match selector.select(&pool, &context, &config.ai_selector).await {
                    Ok(selected) => Ok(selected),
                    Err(e) => {
                        tracing::warn!("AI memory selection failed, using algorithmic: {}", e);
                        algorithmic::select(&self.manager, &context, config).await
                    }
                }
            }
            (SelectionStrategy::AiAssisted, None) => {
                tracing::debug!("No text generator for AI selection, using algorithmic");
                algorithmic::select(&self.manager, &context, config).await
            }
            (SelectionStrategy::Algorithmic, _) => {
                algorithmic::select(&self.manager, &context, config).await
            }
        }
    }
}
