//! # lore-inference
//!
//! Generation backends and enrichment providers for lorekeep.
//!
//! This crate provides:
//! - Response recovery: turning prose-wrapped or slightly broken model
//!   output into valid JSON
//! - Ollama backend (default, feature `ollama`)
//! - OpenAI-compatible backend (optional, feature `openai`)
//! - The [`GenerationProvider`] capability trait with an LLM-backed
//!   implementation and a deterministic mock
//! - Inference configuration loaded from TOML or the environment
//!
//! # Example
//!
//! ```rust,no_run
//! use lore_inference::{build_provider, ClassifyOptions, InferenceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = InferenceConfig::load().unwrap();
//!     let provider = build_provider(&config).unwrap();
//!     let results = provider
//!         .classify_notes(&[], None, &ClassifyOptions::default())
//!         .await;
//!     assert!(results.is_empty());
//! }
//! ```

pub mod config;
pub mod mock;
pub mod prompts;
pub mod provider;
pub mod recovery;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

// Re-export core types
pub use lore_core::*;

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};

pub use config::{build_backend, build_provider, BackendKind, ConfigError, InferenceConfig, ProviderKind};
pub use mock::{MockGenerationBackend, MockProvider};
pub use provider::{
    ClassifyOptions, EntityExtraction, EntityType, ExistingNoteRef, ExtractedEntity,
    ExtractedEntityRelationship, GenerationProvider, LlmProvider, ProgressCallback,
    ProgressUpdate, ProviderSettings,
};
pub use recovery::{extract_structured_payload, parse_lenient, parse_value, repair_syntax, RecoveryError};
