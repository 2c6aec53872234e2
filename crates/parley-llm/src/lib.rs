//! Model runtime backends for Parley.
//!
//! Each backend implements [`parley_core::LlmRuntime`]. Only the local
//! Ollama backend ships today, behind the default `ollama` feature.

pub mod backends;

#[cfg(feature = "ollama")]
pub use backends::ollama::{OllamaConfig, OllamaRuntime};
