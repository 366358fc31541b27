//! Memory service facade
//!
//! Composes configuration, store, manager, injector and evaluator into one
//! object. The host constructs it once at startup and passes it to whatever
//! needs it; there is no process-wide instance.
//!
//! ```ignore
//! let config = MemoryConfigManager::new(MemoryConfigManager::default_path());
//! let service = Arc::new(MemoryService::initialize(config, Some(generator)).await?);
//!
//! let prompt = service.inject_memories(&system_prompt, &conversation).await;
//! // ... generate the reply ...
//! service.schedule_evaluation(user_message, reply, conversation);
//!
//! service.close().await?;
//! ```

use crate::config::{MemoryConfigManager, MemorySystemConfig};
use crate::error::Result;
use crate::evaluator::{EvaluationOutcome, MemoryEvaluator};
use crate::injection::MemoryInjector;
use crate::llm::{Message, TextGenerator};
use crate::memory::{FileMemoryStore, MemoryManager, MemoryStats};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Lifecycle-managed entry point to the memory subsystem
pub struct MemoryService {
    config: MemoryConfigManager,
    manager: Arc<MemoryManager>,
    injector: MemoryInjector,
    /// Present only when a text generator was supplied
    evaluator: Option<Arc<MemoryEvaluator>>,
}

impl MemoryService {
    /// Load the configuration, open the file store it names and wire the
    /// components together. Without a generator, evaluation is unavailable
    /// and AI-assisted selection degrades to algorithmic.
    pub async fn initialize(
        config: MemoryConfigManager,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Result<Self> {
        let system = config.load().await?;
        let store_config = &system.store.config;

        let store = Arc::new(FileMemoryStore::new(
            store_config.memory_dir.clone(),
            store_config.backup_enabled,
        ));
        let manager = Arc::new(MemoryManager::new(store));
        manager.initialize().await?;

        let injector =
            MemoryInjector::new(manager.clone(), system.injection.clone(), generator.clone())?;
        let evaluator = generator.map(|generator| {
            Arc::new(MemoryEvaluator::new(
                manager.clone(),
                generator,
                system.evaluator.clone(),
            ))
        });

        tracing::info!(
            "Memory service ready (dir: {}, strategy: {:?}, evaluator: {})",
            store_config.memory_dir.display(),
            system.injection.selection_strategy,
            evaluator.is_some()
        );

        Ok(Self {
            config,
            manager,
            injector,
            evaluator,
        })
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    pub fn config_manager(&self) -> &MemoryConfigManager {
        &self.config
    }

    /// See `MemoryInjector::inject_memories`. Never fails.
    pub async fn inject_memories(&self, prompt: &str, conversation: &[Message]) -> String {
        self.injector.inject_memories(prompt, conversation).await
    }

    /// Evaluate a completed turn in place. `Disabled` when no generator is
    /// configured.
    pub async fn evaluate_turn(
        &self,
        user_message: &str,
        ai_response: &str,
        conversation: &[Message],
    ) -> EvaluationOutcome {
        match &self.evaluator {
            Some(evaluator) => {
                evaluator
                    .evaluate_conversation(user_message, ai_response, conversation)
                    .await
            }
            None => EvaluationOutcome::Disabled,
        }
    }

    /// Evaluate a completed turn on a background task so turn completion
    /// does not wait for it. `None` when no generator is configured.
    pub fn schedule_evaluation(
        &self,
        user_message: String,
        ai_response: String,
        conversation: Vec<Message>,
    ) -> Option<JoinHandle<EvaluationOutcome>> {
        let evaluator = self.evaluator.clone()?;
        Some(tokio::spawn(async move {
            evaluator
                .evaluate_conversation(&user_message, &ai_response, &conversation)
                .await
        }))
    }

    pub async fn get_stats(&self) -> Result<MemoryStats> {
        self.manager.get_stats().await
    }

    /// Delete every stored memory
    pub async fn reset_memories(&self) -> Result<()> {
        self.manager.reset_memories().await?;
        tracing::info!("All memories reset");
        Ok(())
    }

    /// Merge `patch` into the configuration, persist it and hand the new
    /// injection and evaluator settings to the running components. Store
    /// settings apply the next time the service is initialized.
    pub async fn update_config(&self, patch: Value) -> Result<Arc<MemorySystemConfig>> {
        let previous = self.config.get_config().await;
        let updated = self.config.update_config(patch).await?;

        self.injector.update_config(updated.injection.clone()).await;
        if let Some(evaluator) = &self.evaluator {
            evaluator.update_config(updated.evaluator.clone()).await;
        }
        if updated.store != previous.store {
            tracing::info!("Memory store settings changed; they apply after restart");
        }
        Ok(updated)
    }

    pub async fn close(&self) -> Result<()> {
        self.manager.close().await?;
        tracing::info!("Memory service closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::llm::testing::ScriptedGenerator;
    use crate::memory::{MemoryType, RememberOptions, SearchCriteria};
    use serde_json::json;
    use tempfile::TempDir;

    async fn make_service(
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> (MemoryService, TempDir) {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(CONFIG_FILE);
        let memory_dir = dir.path().join("memories");
        tokio::fs::write(
            &config_path,
            json!({"store": {"config": {"memoryDir": memory_dir}}}).to_string(),
        )
        .await
        .unwrap();

        let service = MemoryService::initialize(MemoryConfigManager::new(config_path), generator)
            .await
            .unwrap();
        (service, dir)
    }

    #[tokio::test]
    async fn test_initialize_uses_configured_directory() {
        let (service, dir) = make_service(None).await;
        service
            .manager()
            .remember(RememberOptions::new(MemoryType::Fact, "User lives in Copenhagen"))
            .await
            .unwrap();

        assert!(dir.path().join("memories").join("memories.json").exists());
        let found = service
            .manager()
            .search(&SearchCriteria::content("copenhagen"))
            .await
            .unwrap();
        assert_eq!(found.total, 1);
    }

    #[tokio::test]
    async fn test_inject_and_reset() {
        let (service, _dir) = make_service(None).await;
        service
            .manager()
            .remember(RememberOptions::new(MemoryType::Preference, "Enjoys Italian cooking"))
            .await
            .unwrap();

        let prompt = "Be concise.";
        let conversation = [Message::user("Give me an Italian cooking idea")];
        let enhanced = service.inject_memories(prompt, &conversation).await;
        assert!(enhanced.contains("Enjoys Italian cooking"));

        service.reset_memories().await.unwrap();
        assert_eq!(service.get_stats().await.unwrap().total_memories, 0);
        assert_eq!(service.inject_memories(prompt, &conversation).await, prompt);
    }

    #[tokio::test]
    async fn test_evaluation_without_generator_is_disabled() {
        let (service, _dir) = make_service(None).await;
        assert_eq!(
            service.evaluate_turn("hi", "hello", &[]).await,
            EvaluationOutcome::Disabled
        );
        assert!(service
            .schedule_evaluation("hi".into(), "hello".into(), Vec::new())
            .is_none());
    }

    #[tokio::test]
    async fn test_scheduled_evaluation_stores_memory() {
        let reply = json!({
            "hasMemorableContent": true,
            "memories": [{
                "type": "goal",
                "content": "Wants to learn Portuguese",
                "tags": ["language"],
                "confidence": 0.9,
                "reasoning": "said so"
            }]
        })
        .to_string();
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::new().reply(reply));
        let (service, _dir) = make_service(Some(generator)).await;

        let handle = service
            .schedule_evaluation(
                "I want to learn Portuguese".into(),
                "Great goal!".into(),
                Vec::new(),
            )
            .unwrap();
        assert_eq!(handle.await.unwrap(), EvaluationOutcome::Completed { created: 1 });

        let stats = service.get_stats().await.unwrap();
        assert_eq!(stats.by_type[&MemoryType::Goal], 1);
    }

    #[tokio::test]
    async fn test_update_config_reaches_components() {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::new());
        let (service, dir) = make_service(Some(generator)).await;

        let updated = service
            .update_config(json!({"injection": {"enabled": false}, "evaluator": {"enabled": false}}))
            .await
            .unwrap();
        assert!(!updated.injection.enabled);

        service
            .manager()
            .remember(RememberOptions::new(MemoryType::Fact, "Plays the cello"))
            .await
            .unwrap();
        let conversation = [Message::user("cello practice tips")];
        assert_eq!(service.inject_memories("P", &conversation).await, "P");
        assert_eq!(
            service.evaluate_turn("a", "b", &conversation).await,
            EvaluationOutcome::Disabled
        );

        let on_disk = tokio::fs::read_to_string(dir.path().join(CONFIG_FILE))
            .await
            .unwrap();
        let on_disk: Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(on_disk["injection"]["enabled"], json!(false));
    }

    #[tokio::test]
    async fn test_invalid_update_rejected() {
        let (service, _dir) = make_service(None).await;
        assert!(service
            .update_config(json!({"retention": {"shortTermDays": 0}}))
            .await
            .is_err());
        assert!(service.config_manager().get_config().await.injection.enabled);
    }

    #[tokio::test]
    async fn test_close() {
        let (service, _dir) = make_service(None).await;
        service.close().await.unwrap();
    }
}
