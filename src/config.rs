//! Memory subsystem configuration management
//!
//! The configuration lives in `memory-config.json`. On load the file is
//! deep-merged over the built-in defaults (which themselves honour a few
//! environment variables); when no file exists the defaults are written out
//! so operators have something to edit.

use crate::error::{Error, Result};
use crate::memory::store::write_atomic;
use crate::memory::MemoryType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration file name inside the memory directory
pub const CONFIG_FILE: &str = "memory-config.json";

/// Store kinds this build knows how to open
pub const KNOWN_STORE_TYPES: &[&str] = &["file"];

/// Complete memory subsystem configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySystemConfig {
    /// Store backend and its settings
    pub store: StoreConfig,

    /// Retention windows (data only, not enforced here)
    pub retention: RetentionConfig,

    /// Prompt injection settings
    pub injection: MemoryInjectionConfig,

    /// Post-turn evaluator settings
    pub evaluator: EvaluatorConfig,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Backend type; only `file` is known
    #[serde(rename = "type")]
    pub store_type: String,

    /// Backend settings
    pub config: FileStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: "file".to_string(),
            config: FileStoreConfig::default(),
        }
    }
}

/// File store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileStoreConfig {
    /// Directory holding `memories.json`, `index.json` and the config file
    pub memory_dir: PathBuf,

    /// Copy the previous `memories.json` to `.backup` before each rewrite
    pub backup_enabled: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            memory_dir: default_memory_dir(),
            backup_enabled: true,
        }
    }
}

/// Retention windows in days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionConfig {
    /// How long `short-term` memories are meant to live
    pub short_term_days: u32,

    /// How long everything else is meant to live
    pub long_term_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            short_term_days: 7,
            long_term_days: 365,
        }
    }
}

/// How the injector picks memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Token-overlap scoring
    #[default]
    Algorithmic,
    /// Delegate the relevance judgement to the text generator
    AiAssisted,
}

impl std::str::FromStr for SelectionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "algorithmic" => Ok(Self::Algorithmic),
            "ai-assisted" | "ai_assisted" | "ai" => Ok(Self::AiAssisted),
            other => Err(Error::Config(format!("unknown selection strategy '{other}'"))),
        }
    }
}

/// Prompt injection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryInjectionConfig {
    /// Disabled injection returns the prompt untouched
    pub enabled: bool,

    /// Upper bound on injected memories
    pub max_memories: usize,

    /// Minimum algorithmic relevance in `[0, 1]`
    pub relevance_threshold: f32,

    /// Allow-list of memory types eligible for injection
    pub memory_types: Vec<MemoryType>,

    /// Use the last few user messages instead of only the latest one
    pub use_conversation_context: bool,

    pub selection_strategy: SelectionStrategy,

    pub ai_selector: AiSelectorConfig,
}

impl Default for MemoryInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memories: 10,
            relevance_threshold: 0.2,
            memory_types: MemoryType::ALL.to_vec(),
            use_conversation_context: true,
            selection_strategy: SelectionStrategy::Algorithmic,
            ai_selector: AiSelectorConfig::default(),
        }
    }
}

/// AI-assisted selector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiSelectorConfig {
    /// Maximum number of candidates sent to the model
    pub candidate_pool_size: usize,

    /// Hard deadline for the model call
    pub timeout_ms: u64,

    /// Minimum model-assigned relevance in `[0, 1]`
    pub relevance_threshold: f32,

    /// Upper bound on memories kept from the model's selection
    pub max_memories: usize,
}

impl Default for AiSelectorConfig {
    fn default() -> Self {
        Self {
            candidate_pool_size: 30,
            timeout_ms: 5_000,
            relevance_threshold: 0.5,
            max_memories: 8,
        }
    }
}

/// Memory evaluator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluatorConfig {
    pub enabled: bool,

    /// Minimum spacing between evaluation starts
    pub debounce_ms: u64,

    /// Extracted memories below this confidence are dropped
    pub confidence_threshold: f32,

    /// Upper bound on memories stored per turn
    pub max_memories_per_turn: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 2_000,
            confidence_threshold: 0.7,
            max_memories_per_turn: 3,
        }
    }
}

/// Default memory directory (~/.chat-memory/)
pub fn default_memory_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chat-memory")
}

impl MemorySystemConfig {
    /// Built-in defaults adjusted by `MEMORY_*` environment variables
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable lookup.
    /// Unparsable values are ignored with a warning.
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("MEMORY_DIR").filter(|d| !d.trim().is_empty()) {
            config.store.config.memory_dir = PathBuf::from(dir);
        }
        if let Some(v) = parse_env(&lookup, "MEMORY_BACKUP_ENABLED") {
            config.store.config.backup_enabled = v;
        }
        if let Some(v) = parse_env(&lookup, "MEMORY_SHORT_TERM_DAYS") {
            config.retention.short_term_days = v;
        }
        if let Some(v) = parse_env(&lookup, "MEMORY_LONG_TERM_DAYS") {
            config.retention.long_term_days = v;
        }
        if let Some(v) = parse_env(&lookup, "MEMORY_INJECTION_ENABLED") {
            config.injection.enabled = v;
        }
        if let Some(v) = parse_env(&lookup, "MEMORY_SELECTION_STRATEGY") {
            config.injection.selection_strategy = v;
        }
        if let Some(v) = parse_env(&lookup, "MEMORY_EVALUATOR_ENABLED") {
            config.evaluator.enabled = v;
        }

        config
    }

    /// Check the configuration for values the subsystem cannot run with
    pub fn validate(&self) -> Result<()> {
        if !KNOWN_STORE_TYPES.contains(&self.store.store_type.as_str()) {
            return Err(Error::Config(format!(
                "unknown store type '{}'",
                self.store.store_type
            )));
        }
        if self.store.config.memory_dir.as_os_str().is_empty() {
            return Err(Error::Config("store.config.memoryDir must not be empty".to_string()));
        }
        if self.retention.short_term_days == 0 || self.retention.long_term_days == 0 {
            return Err(Error::Config("retention windows must be positive".to_string()));
        }
        if self.retention.short_term_days > self.retention.long_term_days {
            return Err(Error::Config(
                "retention.shortTermDays must not exceed retention.longTermDays".to_string(),
            ));
        }

        let injection = &self.injection;
        check_unit_interval("injection.relevanceThreshold", injection.relevance_threshold)?;
        check_unit_interval(
            "injection.aiSelector.relevanceThreshold",
            injection.ai_selector.relevance_threshold,
        )?;
        check_unit_interval(
            "evaluator.confidenceThreshold",
            self.evaluator.confidence_threshold,
        )?;
        if injection.max_memories == 0 || injection.ai_selector.max_memories == 0 {
            return Err(Error::Config("maxMemories must be positive".to_string()));
        }
        if injection.ai_selector.candidate_pool_size == 0 {
            return Err(Error::Config(
                "injection.aiSelector.candidatePoolSize must be positive".to_string(),
            ));
        }
        if injection.ai_selector.timeout_ms == 0 {
            return Err(Error::Config(
                "injection.aiSelector.timeoutMs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be within [0, 1], got {value}")))
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value in `overlay` replaces the one in `base`. `null` overlays are
/// ignored so a sparse file never erases a default.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None if value.is_null() => {}
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

/// Merge a JSON overlay over `base` and deserialize the result
fn merge_config(base: &MemorySystemConfig, overlay: Value) -> Result<MemorySystemConfig> {
    let mut merged = serde_json::to_value(base)?;
    deep_merge(&mut merged, overlay);
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("invalid memory configuration: {e}")))
}

/// Loads, merges, validates and persists `memory-config.json`
pub struct MemoryConfigManager {
    path: PathBuf,
    config: RwLock<Arc<MemorySystemConfig>>,
}

impl MemoryConfigManager {
    /// Create a manager for the config file at `path`. Until `load()` runs
    /// the environment-derived defaults are served.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: RwLock::new(Arc::new(MemorySystemConfig::from_env())),
        }
    }

    /// Config file inside the environment-derived memory directory
    pub fn default_path() -> PathBuf {
        MemorySystemConfig::from_env()
            .store
            .config
            .memory_dir
            .join(CONFIG_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config file, or create it from defaults when absent.
    pub async fn load(&self) -> Result<Arc<MemorySystemConfig>> {
        let defaults = MemorySystemConfig::from_env();

        let config = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => {
                let overlay: Value = serde_json::from_str(&data).map_err(|e| {
                    Error::Config(format!("failed to parse {}: {e}", self.path.display()))
                })?;
                let config = merge_config(&defaults, overlay)?;
                tracing::debug!("Loaded memory config from {}", self.path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "No memory config at {}, writing defaults",
                    self.path.display()
                );
                persist(&self.path, &defaults).await?;
                defaults
            }
            Err(e) => return Err(e.into()),
        };

        config.validate()?;
        let config = Arc::new(config);
        *self.config.write().await = config.clone();
        Ok(config)
    }

    /// Current configuration snapshot
    pub async fn get_config(&self) -> Arc<MemorySystemConfig> {
        self.config.read().await.clone()
    }

    pub async fn get_store_config(&self) -> StoreConfig {
        self.config.read().await.store.clone()
    }

    pub async fn get_retention_settings(&self) -> RetentionConfig {
        self.config.read().await.retention.clone()
    }

    /// Validate the current configuration
    pub async fn validate_config(&self) -> Result<()> {
        self.config.read().await.validate()
    }

    /// Deep-merge `patch` into the current configuration, validate, swap it
    /// in and persist it. An invalid patch leaves the configuration as is.
    pub async fn update_config(&self, patch: Value) -> Result<Arc<MemorySystemConfig>> {
        let mut guard = self.config.write().await;
        let updated = merge_config(&guard, patch)?;
        updated.validate()?;
        persist(&self.path, &updated).await?;
        let updated = Arc::new(updated);
        *guard = updated.clone();
        Ok(updated)
    }

    /// Write the current configuration to disk
    pub async fn save(&self) -> Result<()> {
        let config = self.get_config().await;
        persist(&self.path, &config).await
    }
}

async fn persist(path: &Path, config: &MemorySystemConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(config)?;
    write_atomic(path, &json).await
}
