//! LLM module - Language Model integrations
//!
//! Provides abstractions for different LLM backends with Ollama as the primary,
//! and the model oracle the task loop asks for candidate actions.

pub mod ollama;
pub mod oracle;
pub mod provider;
pub mod traits;

pub use ollama::OllamaClient;
pub use oracle::{parse_candidates, LlmOracle, ModelOracle};
pub use provider::create_provider;
pub use traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};
