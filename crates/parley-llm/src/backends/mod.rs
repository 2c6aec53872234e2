//! Backend implementations.

#[cfg(feature = "ollama")]
pub mod ollama;
