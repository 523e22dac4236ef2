//! # agent-runtime
//!
//! Runtime providers for the sales agent system.
//!
//! ## Providers
//!
//! - **Ollama** (default): Local LLM inference via Ollama
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::OllamaProvider;
//!
//! let provider = Arc::new(OllamaProvider::from_env());
//! let agent = Agent::with_defaults(provider, tools);
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

// Re-export core types for convenience
pub use agent_core::{Agent, AgentError, Conversation, LlmProvider, Result, Role, Tool, ToolRegistry, Turn};
