//! Memory store with file-based JSON persistence
//!
//! Directory layout:
//! ```text
//! <memoryDir>/
//! ├── memories.json          full record array, rewritten on every mutation
//! ├── memories.json.backup   previous memories.json (when backups are enabled)
//! └── index.json             derived counts, best-effort
//! ```
//!
//! The whole record set is held in memory. Mutations are applied to a copy,
//! written out via temp file + rename, and only then swapped in, so a failed
//! write leaves both disk and memory at the previous state. The store
//! assumes it is the only writer of its directory.

use super::types::{
    normalize_tags, Memory, MemorySearchResult, MemoryStats, MemoryUpdate, SearchCriteria,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Record file name
pub const MEMORIES_FILE: &str = "memories.json";

/// Derived index file name
pub const INDEX_FILE: &str = "index.json";

/// Suffix appended to the record file for the pre-write backup
pub const BACKUP_SUFFIX: &str = ".backup";

/// Durable record storage
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Load persisted records. Must succeed before any other call.
    async fn initialize(&self) -> Result<()>;

    /// Insert a new record
    async fn create(&self, memory: Memory) -> Result<Memory>;

    /// Fetch a record by id, refreshing its `last_accessed`
    async fn get_by_id(&self, id: &str) -> Result<Option<Memory>>;

    /// Apply a partial update, refreshing `last_accessed`
    async fn update(&self, id: &str, update: MemoryUpdate) -> Result<Memory>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Filter newest-first with pagination
    async fn search(&self, criteria: &SearchCriteria) -> Result<MemorySearchResult>;

    /// All records newest-first with optional pagination
    async fn get_all(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Memory>>;

    /// Records carrying any of `tags`, best tag coverage first
    async fn find_by_tags(&self, tags: &[String], limit: Option<usize>) -> Result<Vec<Memory>>;

    /// The `limit` most recently created records
    async fn get_recent(&self, limit: usize) -> Result<Vec<Memory>>;

    async fn count(&self) -> Result<usize>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;

    /// Release the store; later calls fail until `initialize()` runs again
    async fn close(&self) -> Result<()>;
}

/// `MemoryStore` backed by a single JSON file
pub struct FileMemoryStore {
    dir: PathBuf,
    backup_enabled: bool,
    records: RwLock<Option<Vec<Memory>>>,
}

impl FileMemoryStore {
    /// Create a store rooted at `dir`. Nothing is read until `initialize()`.
    pub fn new(dir: impl Into<PathBuf>, backup_enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            backup_enabled,
            records: RwLock::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn memories_path(&self) -> PathBuf {
        self.dir.join(MEMORIES_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(format!("{MEMORIES_FILE}{BACKUP_SUFFIX}"))
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    async fn load_from_disk(&self) -> Result<Vec<Memory>> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Store(format!("failed to create {}: {e}", self.dir.display()))
        })?;

        let path = self.memories_path();
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Store(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<Memory> = serde_json::from_str(&data)
            .map_err(|e| Error::Store(format!("failed to parse {}: {e}", path.display())))?;

        let mut seen = std::collections::HashSet::new();
        for record in &records {
            record
                .validate()
                .map_err(|e| Error::Store(format!("invalid record in {}: {e}", path.display())))?;
            if !seen.insert(record.id.as_str()) {
                return Err(Error::Store(format!(
                    "duplicate id {} in {}",
                    record.id,
                    path.display()
                )));
            }
        }

        Ok(records)
    }

    /// Rewrite the record file, then refresh the index
    async fn save(&self, records: &[Memory]) -> Result<()> {
        let path = self.memories_path();
        let json = serde_json::to_vec_pretty(records)?;

        if self.backup_enabled && tokio::fs::try_exists(&path).await? {
            tokio::fs::copy(&path, self.backup_path()).await?;
        }
        write_atomic(&path, &json).await?;

        if let Err(e) = self.write_index(records).await {
            tracing::warn!("Failed to refresh {}: {}", self.index_path().display(), e);
        }
        Ok(())
    }

    async fn write_index(&self, records: &[Memory]) -> Result<()> {
        let stats = MemoryStats::from_memories(records);
        let index = serde_json::json!({
            "lastUpdated": Utc::now(),
            "totalMemories": stats.total_memories,
            "stats": {
                "byType": stats.by_type,
                "bySource": stats.by_source,
                "topTags": stats.top_tags,
                "oldestMemory": stats.oldest_memory,
                "newestMemory": stats.newest_memory,
            }
        });
        write_atomic(&self.index_path(), &serde_json::to_vec_pretty(&index)?).await
    }

    /// Run a mutation against a copy of the records, persist it and commit.
    async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Memory>) -> Result<T> + Send,
        T: Send,
    {
        let mut guard = self.records.write().await;
        let current = guard.as_ref().ok_or_else(Error::not_initialized)?;

        let mut next = current.clone();
        let out = op(&mut next)?;
        self.save(&next).await?;
        *guard = Some(next);
        Ok(out)
    }

    /// Run a read-only query against the records
    async fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&[Memory]) -> T + Send,
    {
        let guard = self.records.read().await;
        let records = guard.as_ref().ok_or_else(Error::not_initialized)?;
        Ok(op(records))
    }
}

/// Records newest-first by creation time; among equal timestamps the later
/// inserted record comes first.
fn newest_first<'a>(records: impl DoubleEndedIterator<Item = &'a Memory>) -> Vec<&'a Memory> {
    let mut sorted: Vec<&Memory> = records.rev().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted
}

fn paginate(records: Vec<&Memory>, limit: Option<usize>, offset: Option<usize>) -> Vec<Memory> {
    records
        .into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn initialize(&self) -> Result<()> {
        let mut guard = self.records.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let records = self.load_from_disk().await?;
        tracing::info!(
            "Memory store loaded {} records from {}",
            records.len(),
            self.dir.display()
        );
        *guard = Some(records);
        Ok(())
    }

    async fn create(&self, memory: Memory) -> Result<Memory> {
        memory.validate()?;
        let created = self
            .mutate(move |records| {
                if records.iter().any(|m| m.id == memory.id) {
                    return Err(Error::DuplicateId(memory.id));
                }
                records.push(memory.clone());
                Ok(memory)
            })
            .await?;
        tracing::debug!("Created memory {} ({})", created.id, created.memory_type);
        Ok(created)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Memory>> {
        {
            let guard = self.records.read().await;
            let records = guard.as_ref().ok_or_else(Error::not_initialized)?;
            if !records.iter().any(|m| m.id == id) {
                return Ok(None);
            }
        }

        self.mutate(|records| {
            Ok(records.iter_mut().find(|m| m.id == id).map(|m| {
                m.last_accessed = Utc::now();
                m.clone()
            }))
        })
        .await
    }

    async fn update(&self, id: &str, update: MemoryUpdate) -> Result<Memory> {
        if let Some(content) = &update.content {
            if content.trim().is_empty() {
                return Err(Error::Validation(
                    "memory content must not be empty".to_string(),
                ));
            }
        }

        self.mutate(|records| {
            let memory = records
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            if let Some(memory_type) = update.memory_type {
                memory.memory_type = memory_type;
            }
            if let Some(source) = update.source {
                memory.metadata.source = source;
            }
            if let Some(content) = update.content {
                memory.content = content;
            }
            if let Some(tags) = update.tags {
                memory.tags = normalize_tags(tags);
            }
            if let Some(metadata) = update.metadata {
                memory.metadata.merge_from(metadata);
            }
            memory.last_accessed = Utc::now();
            memory.validate()?;
            Ok(memory.clone())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        {
            let guard = self.records.read().await;
            let records = guard.as_ref().ok_or_else(Error::not_initialized)?;
            if !records.iter().any(|m| m.id == id) {
                return Ok(false);
            }
        }

        self.mutate(|records| {
            records.retain(|m| m.id != id);
            Ok(true)
        })
        .await
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<MemorySearchResult> {
        criteria.validate()?;
        self.read(|records| {
            let matched = newest_first(records.iter().filter(|m| criteria.matches(m)));
            let total = matched.len();
            MemorySearchResult {
                memories: paginate(matched, criteria.limit, criteria.offset),
                total,
            }
        })
        .await
    }

    async fn get_all(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Memory>> {
        self.read(|records| paginate(newest_first(records.iter()), limit, offset))
            .await
    }

    async fn find_by_tags(&self, tags: &[String], limit: Option<usize>) -> Result<Vec<Memory>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        self.read(|records| {
            let hits = |m: &Memory| tags.iter().filter(|t| m.has_tag(t)).count();
            let mut matched = newest_first(records.iter().filter(|m| hits(*m) > 0));
            matched.sort_by_key(|m| std::cmp::Reverse(hits(*m)));
            paginate(matched, limit, None)
        })
        .await
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<Memory>> {
        self.get_all(Some(limit), None).await
    }

    async fn count(&self) -> Result<usize> {
        self.read(|records| records.len()).await
    }

    async fn clear(&self) -> Result<()> {
        self.mutate(|records| {
            let removed = records.len();
            records.clear();
            tracing::info!("Cleared {} memories", removed);
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.records.write().await.take();
        tracing::debug!("Memory store at {} closed", self.dir.display());
        Ok(())
    }
}

/// Write `bytes` to `path` through a sibling temp file and an atomic rename
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Internal(format!("invalid file path {}", path.display())))?;
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
