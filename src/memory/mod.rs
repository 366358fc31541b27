//! Memory records, persistence and the manager's business rules
//!
//! - [`types`]: the `Memory` record, search criteria and statistics
//! - [`similarity`]: token-set Jaccard similarity
//! - [`store`]: the `MemoryStore` contract and the JSON file store
//! - [`manager`]: validation, merge-on-remember and similarity lookup

pub mod manager;
pub mod similarity;
pub mod store;
pub mod types;

pub use manager::{MemoryManager, RememberOptions};
pub use similarity::{jaccard_similarity, tokenize};
pub use store::{FileMemoryStore, MemoryStore};
pub use types::{
    normalize_tags, Memory, MemoryMetadata, MemorySearchResult, MemorySource, MemoryStats,
    MemoryType, MemoryUpdate, ScoredMemory, SearchCriteria, TagCount,
};
