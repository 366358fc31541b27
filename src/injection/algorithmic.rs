//! Algorithmic relevance scoring
//!
//! Candidates come from three sources, in order:
//!
//! 1. similarity to each recent user message (`MemoryManager::find_similar`)
//! 2. tag and content hits on the extracted topics
//! 3. the most recent memories, only when 1 and 2 found too little
//!
//! The first score seen for a memory is the one kept.

use super::context::ConversationContext;
use crate::config::MemoryInjectionConfig;
use crate::error::Result;
use crate::memory::{
    jaccard_similarity, Memory, MemoryManager, MemoryType, ScoredMemory, SearchCriteria,
};
use std::collections::{HashMap, HashSet};

/// Tags that mark a fact as describing who the user is
pub const IDENTITY_TAGS: &[&str] = &["identity", "name", "user-profile", "about", "personal"];

/// Score given to identity facts when the user asks about themselves
pub const IDENTITY_SCORE: f32 = 0.9;

/// Flat score of the recent-memories fallback
pub const RECENT_FALLBACK_SCORE: f32 = 0.2;

pub const TAG_HIT_WEIGHT: f32 = 0.5;
pub const CONTENT_HIT_WEIGHT: f32 = 0.3;

/// Multiplier applied to similarity scores per memory type
pub fn type_boost(memory_type: MemoryType) -> f32 {
    match memory_type {
        MemoryType::Fact => 1.3,
        MemoryType::Preference => 1.2,
        MemoryType::Goal => 1.1,
        MemoryType::ShortTerm | MemoryType::LongTerm => 1.0,
    }
}

fn is_identity_fact(memory: &Memory) -> bool {
    memory.memory_type == MemoryType::Fact && IDENTITY_TAGS.iter().any(|t| memory.has_tag(t))
}

/// Every scored candidate from the three sources, unfiltered and in source
/// order. A memory may appear more than once.
pub async fn gather_candidates(
    manager: &MemoryManager,
    context: &ConversationContext,
    config: &MemoryInjectionConfig,
) -> Result<Vec<ScoredMemory>> {
    let mut candidates = similarity_candidates(manager, context, config).await?;
    candidates.extend(topic_candidates(manager, context, config).await?);

    let distinct = candidates
        .iter()
        .map(|c| c.memory.id.as_str())
        .collect::<HashSet<_>>()
        .len();
    if distinct < config.max_memories / 2 {
        tracing::debug!(
            "Only {} candidates from similarity and topics, adding recent memories",
            distinct
        );
        candidates.extend(
            manager
                .get_recent(config.max_memories)
                .await?
                .into_iter()
                .map(|m| ScoredMemory::new(m, RECENT_FALLBACK_SCORE, "recent memory")),
        );
    }

    Ok(candidates)
}

/// Select the memories to inject: allowed types only, first score per id,
/// at or above the relevance threshold, best first, at most `maxMemories`.
pub async fn select(
    manager: &MemoryManager,
    context: &ConversationContext,
    config: &MemoryInjectionConfig,
) -> Result<Vec<ScoredMemory>> {
    let candidates = gather_candidates(manager, context, config).await?;
    Ok(rank(candidates, config))
}

/// Filtering and ordering applied to gathered candidates
pub fn rank(candidates: Vec<ScoredMemory>, config: &MemoryInjectionConfig) -> Vec<ScoredMemory> {
    let mut selected = dedupe(allowed_types(candidates, config));
    selected.retain(|c| c.relevance_score >= config.relevance_threshold);
    sort_by_score(&mut selected);
    selected.truncate(config.max_memories);
    selected
}

/// Unscored candidate pool for the AI-assisted selector
pub async fn candidate_pool(
    manager: &MemoryManager,
    context: &ConversationContext,
    config: &MemoryInjectionConfig,
) -> Result<Vec<Memory>> {
    let mut candidates = dedupe(allowed_types(
        gather_candidates(manager, context, config).await?,
        config,
    ));
    sort_by_score(&mut candidates);
    candidates.truncate(config.ai_selector.candidate_pool_size);
    Ok(candidates.into_iter().map(|c| c.memory).collect())
}

async fn similarity_candidates(
    manager: &MemoryManager,
    context: &ConversationContext,
    config: &MemoryInjectionConfig,
) -> Result<Vec<ScoredMemory>> {
    let per_message = futures::future::try_join_all(
        context
            .recent_messages
            .iter()
            .map(|m| manager.find_similar(&m.text, config.max_memories)),
    )
    .await?;

    let mut out = Vec::new();
    for (message, similar_memories) in context.recent_messages.iter().zip(per_message) {
        for similar in similar_memories {
            let memory = similar.memory;
            if message.identity_query && is_identity_fact(&memory) {
                out.push(ScoredMemory::new(memory, IDENTITY_SCORE, "identity question"));
                continue;
            }
            let score = jaccard_similarity(&message.text, &memory.content)
                * type_boost(memory.memory_type);
            out.push(ScoredMemory::new(memory, score, "similar to recent message"));
        }
    }

    if context.has_identity_query() {
        let tags: Vec<String> = IDENTITY_TAGS.iter().map(|t| t.to_string()).collect();
        for memory in manager.find_by_tags(&tags, Some(config.max_memories)).await? {
            if is_identity_fact(&memory) {
                out.push(ScoredMemory::new(memory, IDENTITY_SCORE, "identity question"));
            }
        }
    }

    Ok(out)
}

async fn topic_candidates(
    manager: &MemoryManager,
    context: &ConversationContext,
    config: &MemoryInjectionConfig,
) -> Result<Vec<ScoredMemory>> {
    if context.topics.is_empty() {
        return Ok(Vec::new());
    }

    let mut found: HashMap<String, Memory> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut absorb = |memories: Vec<Memory>| {
        for memory in memories {
            if !found.contains_key(&memory.id) {
                order.push(memory.id.clone());
                found.insert(memory.id.clone(), memory);
            }
        }
    };

    for topic in &context.topics {
        absorb(
            manager
                .find_by_tags(std::slice::from_ref(topic), Some(config.max_memories))
                .await?,
        );
        let by_content = manager
            .search(&SearchCriteria::content(topic.clone()).with_limit(config.max_memories))
            .await?;
        absorb(by_content.memories);
    }

    let topic_count = context.topics.len() as f32;
    Ok(order
        .into_iter()
        .filter_map(|id| found.remove(&id))
        .map(|memory| {
            let content = memory.content.to_lowercase();
            let mut hits = Vec::new();
            let raw: f32 = context
                .topics
                .iter()
                .map(|topic| {
                    let mut score = 0.0;
                    if memory.has_tag(topic) {
                        score += TAG_HIT_WEIGHT;
                    }
                    if content.contains(topic.as_str()) {
                        score += CONTENT_HIT_WEIGHT;
                    }
                    if score > 0.0 {
                        hits.push(topic.as_str());
                    }
                    score
                })
                .sum();
            let score = raw / topic_count * type_boost(memory.memory_type);
            let reason = format!("matched topics: {}", hits.join(", "));
            ScoredMemory::new(memory, score, reason)
        })
        .collect())
}

fn allowed_types(candidates: Vec<ScoredMemory>, config: &MemoryInjectionConfig) -> Vec<ScoredMemory> {
    candidates
        .into_iter()
        .filter(|c| config.memory_types.contains(&c.memory.memory_type))
        .collect()
}

fn dedupe(candidates: Vec<ScoredMemory>) -> Vec<ScoredMemory> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.memory.id.clone()))
        .collect()
}

fn sort_by_score(candidates: &mut [ScoredMemory]) {
    candidates.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
