//! Business rules over the memory store
//!
//! The manager validates input, folds near-duplicate restatements into the
//! existing record instead of piling up copies, and exposes the similarity
//! lookup shared with the injector.

use super::similarity::{jaccard_similarity, tokenize};
use super::store::MemoryStore;
use super::types::{
    normalize_tags, Memory, MemoryMetadata, MemorySearchResult, MemorySource, MemoryStats,
    MemoryType, MemoryUpdate, ScoredMemory, SearchCriteria,
};
use crate::error::{Error, Result};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Minimum similarity for a new memory to be merged into an existing one
pub const MERGE_SIMILARITY_THRESHOLD: f32 = 0.8;

/// At or above this similarity the merged content replaces the old content;
/// below it the new content is appended as a dated addendum.
pub const OVERWRITE_SIMILARITY_THRESHOLD: f32 = 0.9;

/// Only records accessed within this many hours are merge candidates
pub const MERGE_WINDOW_HOURS: i64 = 24;

/// Shortest keyword used to widen a similarity search
const MIN_KEYWORD_LEN: usize = 3;

/// Input to `MemoryManager::remember`
#[derive(Debug, Clone)]
pub struct RememberOptions {
    pub memory_type: MemoryType,
    pub content: String,
    pub tags: Vec<String>,
    pub source: MemorySource,
    pub conversation_id: Option<String>,
    /// Provenance fields (`confidence`, `reasoning`, ...) to attach
    pub metadata: Option<MemoryMetadata>,
}

impl RememberOptions {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            memory_type,
            content: content.into(),
            tags: Vec::new(),
            source: MemorySource::User,
            conversation_id: None,
            metadata: None,
        }
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(Error::Validation(
                "memory content must not be empty".to_string(),
            ));
        }
        if let Some(confidence) = self.metadata.as_ref().and_then(|m| m.confidence) {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(Error::Validation(format!(
                    "confidence {confidence} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Memory business layer over a `MemoryStore`
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    /// Serializes the merge-or-create decision in `remember`
    remember_lock: Mutex<()>,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            remember_lock: Mutex::new(()),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        self.store.initialize().await
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    /// Store a new memory, or evolve a recent near-identical one of the same
    /// type. Returns the created or evolved record.
    pub async fn remember(&self, options: RememberOptions) -> Result<Memory> {
        options.validate()?;
        let content = options.content.trim().to_string();
        let tags = normalize_tags(&options.tags);

        let _guard = self.remember_lock.lock().await;

        if let Some((existing, similarity)) = self
            .find_merge_candidate(options.memory_type, &content)
            .await?
        {
            tracing::debug!(
                "Merging new {} memory into {} (similarity {:.2})",
                options.memory_type,
                existing.id,
                similarity
            );
            // The evolved record keeps its original source; the conversation
            // of the restatement is carried over.
            let mut incoming = options.metadata.unwrap_or_default();
            if options.conversation_id.is_some() {
                incoming.conversation_id = options.conversation_id;
            }
            return self
                .merge_into(existing, similarity, content, tags, incoming)
                .await;
        }

        let mut metadata = options.metadata.unwrap_or_default();
        metadata.source = options.source;
        if options.conversation_id.is_some() {
            metadata.conversation_id = options.conversation_id;
        }

        let memory = Memory::new(options.memory_type, content, options.source)
            .with_tags(tags)
            .with_metadata(metadata);
        let created = self.store.create(memory).await?;
        tracing::info!("Remembered {} memory {}", created.memory_type, created.id);
        Ok(created)
    }

    /// Most similar same-type record accessed within the merge window
    async fn find_merge_candidate(
        &self,
        memory_type: MemoryType,
        content: &str,
    ) -> Result<Option<(Memory, f32)>> {
        let window_start = Utc::now() - Duration::hours(MERGE_WINDOW_HOURS);
        let same_type = self
            .store
            .search(&SearchCriteria::default().with_type(memory_type))
            .await?;

        Ok(same_type
            .memories
            .into_iter()
            .filter(|m| m.last_accessed >= window_start)
            .map(|m| {
                let similarity = jaccard_similarity(content, &m.content);
                (m, similarity)
            })
            .filter(|(_, similarity)| *similarity >= MERGE_SIMILARITY_THRESHOLD)
            .fold(None, |best: Option<(Memory, f32)>, candidate| match best {
                Some(b) if b.1 >= candidate.1 => Some(b),
                _ => Some(candidate),
            }))
    }

    async fn merge_into(
        &self,
        existing: Memory,
        similarity: f32,
        content: String,
        tags: Vec<String>,
        incoming: MemoryMetadata,
    ) -> Result<Memory> {
        let merged_content = if similarity >= OVERWRITE_SIMILARITY_THRESHOLD {
            content
        } else {
            format!(
                "{}\n[{}] {}",
                existing.content,
                Utc::now().format("%Y-%m-%d"),
                content
            )
        };

        let merged_tags = normalize_tags(existing.tags.iter().chain(tags.iter()));

        let mut metadata = existing.metadata.clone();
        metadata.merge_from(incoming);
        metadata.previous_content = Some(existing.content.clone());
        metadata.evolution_count = Some(existing.metadata.evolution_count() + 1);

        self.store
            .update(
                &existing.id,
                MemoryUpdate {
                    content: Some(merged_content),
                    tags: Some(merged_tags),
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await
    }

    /// Fetch a memory by id
    pub async fn recall(&self, id: &str) -> Result<Memory> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Change a memory in place. A content change records the previous
    /// content and bumps `evolutionCount`.
    pub async fn evolve(&self, id: &str, mut updates: MemoryUpdate) -> Result<Memory> {
        let existing = self.recall(id).await?;

        if let Some(content) = updates.content.take() {
            let content = content.trim().to_string();
            if content.is_empty() {
                return Err(Error::Validation(
                    "memory content must not be empty".to_string(),
                ));
            }
            if content != existing.content {
                let metadata = updates.metadata.get_or_insert_with(MemoryMetadata::default);
                metadata.previous_content = Some(existing.content.clone());
                metadata.evolution_count = Some(existing.metadata.evolution_count() + 1);
            }
            updates.content = Some(content);
        }

        let evolved = self.store.update(id, updates).await?;
        tracing::debug!("Evolved memory {}", evolved.id);
        Ok(evolved)
    }

    /// Delete a memory
    pub async fn forget(&self, id: &str) -> Result<()> {
        if self.store.delete(id).await? {
            tracing::info!("Forgot memory {}", id);
            Ok(())
        } else {
            Err(Error::NotFound(id.to_string()))
        }
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Result<MemorySearchResult> {
        self.store.search(criteria).await
    }

    pub async fn find_by_tags(&self, tags: &[String], limit: Option<usize>) -> Result<Vec<Memory>> {
        self.store.find_by_tags(tags, limit).await
    }

    pub async fn get_recent(&self, limit: usize) -> Result<Vec<Memory>> {
        self.store.get_recent(limit).await
    }

    pub async fn get_all(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Memory>> {
        self.store.get_all(limit, offset).await
    }

    /// The `top_k` memories whose content is most similar to `query`.
    ///
    /// Candidates come from a content search on the whole query and on each
    /// of its keywords, each widened to `top_k * 2` hits, then re-ranked by
    /// token-set Jaccard similarity. Records with no token overlap are
    /// dropped.
    pub async fn find_similar(&self, query: &str, top_k: usize) -> Result<Vec<ScoredMemory>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let widened = top_k.saturating_mul(2);

        let mut probes = vec![query.trim().to_string()];
        let mut seen_keywords = HashSet::new();
        for token in tokenize(query) {
            if token.chars().count() >= MIN_KEYWORD_LEN && seen_keywords.insert(token.clone()) {
                probes.push(token);
            }
        }

        let mut seen_ids = HashSet::new();
        let mut scored = Vec::new();
        for probe in probes {
            let hits = self
                .store
                .search(&SearchCriteria::content(probe).with_limit(widened))
                .await?;
            for memory in hits.memories {
                if !seen_ids.insert(memory.id.clone()) {
                    continue;
                }
                let similarity = jaccard_similarity(query, &memory.content);
                if similarity > 0.0 {
                    scored.push(ScoredMemory::new(memory, similarity, "token overlap"));
                }
            }
        }

        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Aggregate statistics, recomputed on every call
    pub async fn get_stats(&self) -> Result<MemoryStats> {
        let all = self.store.get_all(None, None).await?;
        Ok(MemoryStats::from_memories(&all))
    }

    /// Remove every memory
    pub async fn reset_memories(&self) -> Result<()> {
        self.store.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::FileMemoryStore;
    use tempfile::TempDir;

    async fn make_manager() -> (MemoryManager, Arc<FileMemoryStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileMemoryStore::new(dir.path(), false));
        let manager = MemoryManager::new(store.clone());
        manager.initialize().await.unwrap();
        (manager, store, dir)
    }

    /// Insert a record directly with a last access `hours_ago` in the past
    async fn insert_stale(store: &FileMemoryStore, content: &str, hours_ago: i64) -> Memory {
        let mut memory = Memory::new(MemoryType::Fact, content, MemorySource::User);
        memory.timestamp = Utc::now() - Duration::hours(hours_ago);
        memory.last_accessed = memory.timestamp;
        store.create(memory).await.unwrap()
    }

    #[tokio::test]
    async fn test_remember_then_search() {
        let (manager, _store, _dir) = make_manager().await;
        manager
            .remember(
                RememberOptions::new(MemoryType::Fact, "User lives in Copenhagen")
                    .tags(["location"]),
            )
            .await
            .unwrap();

        let result = manager
            .search(&SearchCriteria::content("Copenhagen"))
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.memories[0].tags, vec!["location".to_string()]);
    }

    #[tokio::test]
    async fn test_remember_validates() {
        let (manager, _store, _dir) = make_manager().await;
        let err = manager
            .remember(RememberOptions::new(MemoryType::Fact, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let bad_confidence = MemoryMetadata {
            confidence: Some(2.0),
            ..Default::default()
        };
        let err = manager
            .remember(RememberOptions::new(MemoryType::Fact, "ok").metadata(bad_confidence))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_remember_records_source_and_conversation() {
        let (manager, _store, _dir) = make_manager().await;
        let memory = manager
            .remember(
                RememberOptions::new(MemoryType::Preference, "Prefers short answers")
                    .source(MemorySource::Ai)
                    .conversation_id("conv-7"),
            )
            .await
            .unwrap();
        assert_eq!(memory.metadata.source, MemorySource::Ai);
        assert_eq!(memory.metadata.conversation_id.as_deref(), Some("conv-7"));
        assert!(memory.metadata.evolution_count.is_none());
    }

    #[tokio::test]
    async fn test_similar_restatement_evolves_existing() {
        let (manager, _store, _dir) = make_manager().await;
        let first = manager
            .remember(
                RememberOptions::new(MemoryType::Fact, "User works as a nurse in Oslo")
                    .tags(["work"]),
            )
            .await
            .unwrap();
        let second = manager
            .remember(
                RememberOptions::new(MemoryType::Fact, "user works as a nurse in oslo")
                    .tags(["job"]),
            )
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        let all = manager.get_all(None, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metadata.evolution_count, Some(1));
        assert_eq!(
            all[0].metadata.previous_content.as_deref(),
            Some("User works as a nurse in Oslo")
        );
        assert_eq!(all[0].content, "user works as a nurse in oslo");
        assert_eq!(all[0].tags, vec!["work".to_string(), "job".to_string()]);
    }

    #[tokio::test]
    async fn test_restatement_carries_conversation_id() {
        let (manager, _store, _dir) = make_manager().await;
        let first = manager
            .remember(
                RememberOptions::new(MemoryType::Fact, "User works as a nurse in Oslo")
                    .conversation_id("conv-1"),
            )
            .await
            .unwrap();
        let evolved = manager
            .remember(
                RememberOptions::new(MemoryType::Fact, "User works as a nurse in Oslo")
                    .source(MemorySource::Ai)
                    .conversation_id("conv-2"),
            )
            .await
            .unwrap();

        assert_eq!(evolved.id, first.id);
        assert_eq!(evolved.metadata.conversation_id.as_deref(), Some("conv-2"));
        assert_eq!(evolved.metadata.source, MemorySource::User);
        assert_eq!(evolved.metadata.evolution_count, Some(1));
    }

    #[tokio::test]
    async fn test_merge_below_overwrite_threshold_appends_addendum() {
        let (manager, _store, _dir) = make_manager().await;
        // 9 shared tokens out of 11 distinct ones: similarity ~0.82
        let first = manager
            .remember(RememberOptions::new(
                MemoryType::Goal,
                "wants to run a full marathon next spring in Berlin",
            ))
            .await
            .unwrap();
        let merged = manager
            .remember(RememberOptions::new(
                MemoryType::Goal,
                "wants to run a full marathon next autumn in Berlin",
            ))
            .await
            .unwrap();

        assert_eq!(merged.id, first.id);
        assert!(merged
            .content
            .starts_with("wants to run a full marathon next spring in Berlin\n["));
        assert!(merged
            .content
            .ends_with("] wants to run a full marathon next autumn in Berlin"));
        assert_eq!(merged.metadata.evolution_count, Some(1));
    }

    #[tokio::test]
    async fn test_different_type_is_not_merged() {
        let (manager, _store, _dir) = make_manager().await;
        manager
            .remember(RememberOptions::new(MemoryType::Fact, "Likes green tea"))
            .await
            .unwrap();
        manager
            .remember(RememberOptions::new(MemoryType::Preference, "Likes green tea"))
            .await
            .unwrap();
        assert_eq!(manager.get_all(None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_candidate_is_not_merged() {
        let (manager, store, _dir) = make_manager().await;
        insert_stale(&store, "Likes green tea", 48).await;

        manager
            .remember(RememberOptions::new(MemoryType::Fact, "Likes green tea"))
            .await
            .unwrap();
        assert_eq!(manager.get_all(None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dissimilar_content_creates_new_record() {
        let (manager, _store, _dir) = make_manager().await;
        manager
            .remember(RememberOptions::new(MemoryType::Fact, "Likes green tea"))
            .await
            .unwrap();
        manager
            .remember(RememberOptions::new(MemoryType::Fact, "Likes black coffee"))
            .await
            .unwrap();
        assert_eq!(manager.get_all(None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recall_and_forget() {
        let (manager, _store, _dir) = make_manager().await;
        let memory = manager
            .remember(RememberOptions::new(MemoryType::Fact, "Has two kids"))
            .await
            .unwrap();

        assert_eq!(manager.recall(&memory.id).await.unwrap().content, "Has two kids");
        manager.forget(&memory.id).await.unwrap();
        assert!(matches!(manager.recall(&memory.id).await, Err(Error::NotFound(_))));
        assert!(matches!(manager.forget(&memory.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_evolve_tracks_content_changes() {
        let (manager, store, _dir) = make_manager().await;
        let memory = insert_stale(&store, "Drives a Volvo", 5).await;

        let evolved = manager
            .evolve(&memory.id, MemoryUpdate::content("Drives a Tesla"))
            .await
            .unwrap();
        assert_eq!(evolved.content, "Drives a Tesla");
        assert_eq!(evolved.metadata.evolution_count, Some(1));
        assert_eq!(evolved.metadata.previous_content.as_deref(), Some("Drives a Volvo"));
        assert!(evolved.last_accessed > memory.last_accessed);

        let again = manager
            .evolve(&memory.id, MemoryUpdate::content("Drives a bicycle"))
            .await
            .unwrap();
        assert_eq!(again.metadata.evolution_count, Some(2));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evolve_without_content_change() {
        let (manager, store, _dir) = make_manager().await;
        let memory = insert_stale(&store, "Drives a Volvo", 5).await;

        let evolved = manager
            .evolve(
                &memory.id,
                MemoryUpdate {
                    tags: Some(vec!["car".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(evolved.tags, vec!["car".to_string()]);
        assert!(evolved.metadata.evolution_count.is_none());
        assert!(evolved.last_accessed > memory.last_accessed);
    }

    #[tokio::test]
    async fn test_evolve_unknown_id() {
        let (manager, _store, _dir) = make_manager().await;
        let err = manager
            .evolve("missing", MemoryUpdate::content("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_similar_ranks_by_overlap() {
        let (manager, _store, _dir) = make_manager().await;
        for content in [
            "User plays guitar in a band",
            "User plays piano",
            "User has a dog named Rex",
            "Favourite food is sushi",
        ] {
            manager
                .remember(RememberOptions::new(MemoryType::Fact, content))
                .await
                .unwrap();
        }

        let similar = manager.find_similar("does the user play guitar", 2).await.unwrap();
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].memory.content, "User plays guitar in a band");
        assert!(similar[0].relevance_score >= similar[1].relevance_score);
        assert!(similar.iter().all(|s| s.relevance_score > 0.0));

        assert!(manager.find_similar("   ", 3).await.unwrap().is_empty());
        assert!(manager.find_similar("guitar", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_stats_and_reset() {
        let (manager, _store, _dir) = make_manager().await;
        manager
            .remember(RememberOptions::new(MemoryType::Fact, "Lives in Rome").tags(["location"]))
            .await
            .unwrap();
        manager
            .remember(
                RememberOptions::new(MemoryType::Goal, "Learn Italian")
                    .tags(["language", "location"])
                    .source(MemorySource::Ai),
            )
            .await
            .unwrap();

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.by_type[&MemoryType::Goal], 1);
        assert_eq!(stats.by_source[&MemorySource::Ai], 1);
        assert_eq!(stats.top_tags[0].tag, "location");
        assert_eq!(stats.top_tags[0].count, 2);

        manager.reset_memories().await.unwrap();
        assert_eq!(manager.get_stats().await.unwrap().total_memories, 0);
    }
}
