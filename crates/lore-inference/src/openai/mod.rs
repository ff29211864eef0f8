//! OpenAI-compatible generation backend.
//!
//! Works with any endpoint that speaks `/chat/completions`: OpenAI itself,
//! vLLM, LocalAI, LM Studio, or Ollama in compatibility mode.
//!
//! # Example
//!
//! ```rust,no_run
//! use lore_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use lore_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(),
//!         api_key: None,
//!         gen_model: "llama3".to_string(),
//!         timeout_seconds: 120,
//!     };
//!     let backend = OpenAIBackend::new(config).unwrap();
//!     let reply = backend.generate_json("Return {}").await.unwrap();
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_GEN_MODEL, DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS,
};
pub use error::{to_lore_error, OpenAIErrorCode};
pub use types::*;
