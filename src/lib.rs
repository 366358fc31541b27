//! chat-memory - long-term memory for conversational assistants
//!
//! Stores small typed records ("memories") extracted from conversations and
//! re-injects the most relevant ones into later prompts, so a stateless text
//! generation call can act as if it remembers the user.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          MemoryService                             │
//! │                                                                    │
//! │   before a turn                          after a turn              │
//! │  ┌──────────────────────┐              ┌──────────────────────┐    │
//! │  │    MemoryInjector    │              │   MemoryEvaluator    │    │
//! │  │ - context & topics   │              │ - debounce           │    │
//! │  │ - algorithmic score  │              │ - single flight      │    │
//! │  │ - AI selector ───────┼──┐      ┌────┼─ extraction         │    │
//! │  │ - prompt formatting  │  │      │    └──────────┬───────────┘    │
//! │  └──────────┬───────────┘  ▼      ▼               │                │
//! │             │          TextGenerator              │                │
//! │             ▼            (external)               ▼                │
//! │  ┌─────────────────────────────────────────────────────────────┐   │
//! │  │                      MemoryManager                          │   │
//! │  │  validation · merge-on-remember · similarity · statistics   │   │
//! │  └──────────────────────────────┬──────────────────────────────┘   │
//! │                                 ▼                                  │
//! │  ┌─────────────────────────────────────────────────────────────┐   │
//! │  │            FileMemoryStore (memories.json, index.json)      │   │
//! │  └─────────────────────────────────────────────────────────────┘   │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure policy
//!
//! Store and manager errors reach their direct callers as [`Error`].
//! Injection and evaluation never fail the conversation: the injector
//! returns the original prompt and the evaluator stores nothing.
//!
//! ## Modules
//!
//! - [`memory`]: records, file store, manager
//! - [`injection`]: memory selection and prompt formatting
//! - [`evaluator`]: post-turn memory extraction
//! - [`llm`]: the text generation capability consumed by both
//! - [`service`]: the facade composing everything
//! - [`config`]: configuration management

pub mod config;
pub mod error;
pub mod evaluator;
pub mod injection;
pub mod llm;
pub mod memory;
pub mod service;

pub use config::{MemoryConfigManager, MemorySystemConfig};
pub use error::{Error, Result};
pub use evaluator::{EvaluationOutcome, MemoryEvaluator};
pub use injection::MemoryInjector;
pub use llm::{GenerateOptions, Message, Role, TextGenerator};
pub use memory::{Memory, MemoryManager, MemoryType, RememberOptions};
pub use service::MemoryService;
