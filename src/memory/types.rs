//! Memory record data types
//!
//! A `Memory` is a small typed fact about the user extracted from a
//! conversation. Records serialize as camelCase JSON so the on-disk
//! `memories.json` array stays readable by other tooling.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kind of information a memory holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryType {
    /// Stable fact about the user (name, location, job)
    Fact,
    /// Something the user likes or dislikes
    Preference,
    /// Something the user wants to achieve
    Goal,
    /// Context only relevant for a short while
    ShortTerm,
    /// Context worth keeping indefinitely
    LongTerm,
}

impl MemoryType {
    /// All memory types in display order
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Goal,
        MemoryType::LongTerm,
        MemoryType::ShortTerm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Goal => "goal",
            MemoryType::ShortTerm => "short-term",
            MemoryType::LongTerm => "long-term",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fact" => Ok(MemoryType::Fact),
            "preference" => Ok(MemoryType::Preference),
            "goal" => Ok(MemoryType::Goal),
            "short-term" => Ok(MemoryType::ShortTerm),
            "long-term" => Ok(MemoryType::LongTerm),
            other => Err(Error::Validation(format!("unknown memory type '{other}'"))),
        }
    }
}

/// Who produced a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Stated directly by the user
    #[default]
    User,
    /// Extracted by a model
    Ai,
    /// Created by the application itself
    System,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::User => "user",
            MemorySource::Ai => "ai",
            MemorySource::System => "system",
        }
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known metadata fields plus a residual map for forward compatibility
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetadata {
    pub source: MemorySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator_generated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolution_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Model that produced an evaluator-generated memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Any other keys found on disk or supplied by callers
    #[serde(flatten, default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl MemoryMetadata {
    pub fn new(source: MemorySource) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn evolution_count(&self) -> u32 {
        self.evolution_count.unwrap_or(0)
    }

    /// Overlay every optional field that is set in `other` onto `self`.
    /// `source` is left alone; it only changes through `MemoryUpdate::source`.
    pub fn merge_from(&mut self, other: MemoryMetadata) {
        if other.conversation_id.is_some() {
            self.conversation_id = other.conversation_id;
        }
        if other.evaluator_generated.is_some() {
            self.evaluator_generated = other.evaluator_generated;
        }
        if other.confidence.is_some() {
            self.confidence = other.confidence;
        }
        if other.evolution_count.is_some() {
            self.evolution_count = other.evolution_count;
        }
        if other.previous_content.is_some() {
            self.previous_content = other.previous_content;
        }
        if other.reasoning.is_some() {
            self.reasoning = other.reasoning;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        self.extra.extend(other.extra);
    }
}

/// A durable memory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Unique, immutable identifier
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Refreshed on reads by id and on every write
    pub last_accessed: DateTime<Utc>,
    pub metadata: MemoryMetadata,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Memory {
    /// Create a fresh record with a generated id and current timestamps
    pub fn new(memory_type: MemoryType, content: impl Into<String>, source: MemorySource) -> Self {
        let now = Utc::now();
        Self {
            id: format!("mem-{}", uuid::Uuid::new_v4()),
            memory_type,
            content: content.into(),
            timestamp: now,
            last_accessed: now,
            metadata: MemoryMetadata::new(source),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check the record-level invariants
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("memory id must not be empty".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(Error::Validation(
                "memory content must not be empty".to_string(),
            ));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Validation("memory tags must not be empty".to_string()));
        }
        if let Some(confidence) = self.metadata.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(Error::Validation(format!(
                    "confidence {confidence} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// Case-insensitive tag membership
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| tags_match(t, tag))
    }
}

/// Tag equality used everywhere tags are compared: Unicode lowercase forms
pub fn tags_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Normalize a caller-supplied tag list: trim, drop empties, dedupe
/// case-insensitively, keep first-seen order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() || out.iter().any(|t| tags_match(t, tag)) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

/// Partial update applied by `MemoryStore::update`
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub memory_type: Option<MemoryType>,
    pub source: Option<MemorySource>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Merged over the existing metadata, not replacing it
    pub metadata: Option<MemoryMetadata>,
}

impl MemoryUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

/// Search filters; every set field must hold for a record to match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MemorySource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Record must carry every tag (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Case-insensitive substring of `content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl SearchCriteria {
    pub fn content(query: impl Into<String>) -> Self {
        Self {
            content: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Validation("search tags must not be empty".to_string()));
        }
        if let Some(id) = &self.conversation_id {
            if id.trim().is_empty() {
                return Err(Error::Validation(
                    "conversationId filter must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether `memory` satisfies every predicate
    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(t) = self.memory_type {
            if memory.memory_type != t {
                return false;
            }
        }
        if let Some(s) = self.source {
            if memory.metadata.source != s {
                return false;
            }
        }
        if let Some(cid) = &self.conversation_id {
            if memory.metadata.conversation_id.as_deref() != Some(cid.as_str()) {
                return false;
            }
        }
        if !self.tags.iter().all(|tag| memory.has_tag(tag.trim())) {
            return false;
        }
        if let Some(q) = &self.content {
            if !memory.content.to_lowercase().contains(&q.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Paginated search output; `total` is the match count before pagination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchResult {
    pub memories: Vec<Memory>,
    pub total: usize,
}

/// Tag frequency entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Aggregate statistics over the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_memories: usize,
    pub by_type: HashMap<MemoryType, usize>,
    pub by_source: HashMap<MemorySource, usize>,
    pub top_tags: Vec<TagCount>,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
}

/// Number of entries kept in `MemoryStats::top_tags`
pub const TOP_TAGS_LIMIT: usize = 10;

impl MemoryStats {
    /// Aggregate counts by type/source, the ten most frequent tags
    /// (count desc, then tag asc) and the creation-time range.
    pub fn from_memories<'a>(memories: impl IntoIterator<Item = &'a Memory>) -> Self {
        let mut stats = MemoryStats::default();
        let mut tag_counts: HashMap<String, usize> = HashMap::new();

        for memory in memories {
            stats.total_memories += 1;
            *stats.by_type.entry(memory.memory_type).or_default() += 1;
            *stats.by_source.entry(memory.metadata.source).or_default() += 1;
            for tag in &memory.tags {
                *tag_counts.entry(tag.to_lowercase()).or_default() += 1;
            }
            stats.oldest_memory = Some(match stats.oldest_memory {
                Some(t) if t <= memory.timestamp => t,
                _ => memory.timestamp,
            });
            stats.newest_memory = Some(match stats.newest_memory {
                Some(t) if t >= memory.timestamp => t,
                _ => memory.timestamp,
            });
        }

        let mut top_tags: Vec<TagCount> = tag_counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        top_tags.truncate(TOP_TAGS_LIMIT);
        stats.top_tags = top_tags;

        stats
    }
}

/// A memory paired with its relevance for the current turn. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub memory: Memory,
    /// In `[0, 1]`
    pub relevance_score: f32,
    pub reason: String,
}

impl ScoredMemory {
    pub fn new(memory: Memory, relevance_score: f32, reason: impl Into<String>) -> Self {
        Self {
            memory,
            relevance_score: relevance_score.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }
}
