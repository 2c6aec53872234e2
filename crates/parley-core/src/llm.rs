//! Abstract model runtime.
//!
//! The agent never talks to a concrete backend; it only sees [`LlmRuntime`],
//! which a backend crate (for example `parley-llm`) implements.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

use crate::message::Message;
use crate::tools::ToolDefinition;

/// Generation parameters.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,

    /// Top-p sampling (0.0 - 1.0)
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Stop sequences
    pub stop: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(0.9),
            max_tokens: None,
            stop: None,
        }
    }
}

/// Model input.
#[derive(Debug, Clone, Default)]
pub struct LlmInput {
    /// Messages for the conversation
    pub messages: Vec<Message>,

    /// Generation parameters
    pub params: GenerationParams,

    /// Model identifier (backend-specific)
    pub model: Option<String>,

    /// Stream response
    pub stream: bool,

    /// Tool definitions for native function calling
    pub tools: Option<Vec<ToolDefinition>>,
}

impl LlmInput {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }
}

/// A tool call returned through a backend's native function-calling API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Model output.
#[derive(Debug, Clone)]
pub struct LlmOutput {
    /// Generated text content
    pub text: String,

    /// Finish reason (stop, length, error)
    pub finish_reason: FinishReason,

    /// Thinking content reported out-of-band by the backend
    pub thinking: Option<String>,

    /// Structured tool calls, only populated in native tool-calling mode
    pub tool_calls: Vec<NativeToolCall>,
}

impl LlmOutput {
    /// Plain text output with a natural stop.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            thinking: None,
            tool_calls: Vec::new(),
        }
    }
}

/// Finish reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Model stopped naturally
    Stop,

    /// Max tokens reached
    Length,

    /// Model hit an error
    Error,
}

/// Stream chunk.
/// Contains the text content and a flag telling whether it came from a
/// backend's dedicated thinking field rather than the content field.
pub type StreamChunk = Result<(String, bool), LlmError>;

/// Boxed chunk stream returned by [`LlmRuntime::generate_stream`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Model runtime error.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Backend not available
    #[error("Backend {0} not available")]
    BackendUnavailable(String),

    /// Model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generation error
    #[error("Generation error: {0}")]
    Generation(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout
    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a caller-side retry policy could reasonably try again.
    ///
    /// The agent itself never retries model calls.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::Timeout(_) | LlmError::BackendUnavailable(_)
        )
    }
}

/// Abstract model runtime backend.
#[async_trait]
pub trait LlmRuntime: Send + Sync {
    /// Backend identifier, e.g. `"ollama"`.
    fn backend_id(&self) -> &str;

    /// Get the current model name.
    fn model_name(&self) -> &str;

    /// Check if the backend is available.
    async fn is_available(&self) -> bool {
        true
    }

    /// Generate a response (non-streaming).
    async fn generate(&self, input: LlmInput) -> Result<LlmOutput, LlmError>;

    /// Generate a response (streaming).
    async fn generate_stream(&self, input: LlmInput) -> Result<ChunkStream, LlmError>;
}

/// Shared model runtime handle.
pub type DynLlmRuntime = Arc<dyn LlmRuntime>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_input_builder() {
        let input = LlmInput::new(vec![Message::user("Hello")])
            .with_model("qwen2.5")
            .with_temperature(0.2)
            .with_streaming(true)
            .with_tools(Vec::new());

        assert_eq!(input.messages.len(), 1);
        assert_eq!(input.model.as_deref(), Some("qwen2.5"));
        assert_eq!(input.params.temperature, Some(0.2));
        assert!(input.stream);
        assert!(input.tools.is_none());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(LlmError::Timeout(10).is_retryable());
        assert!(!LlmError::ModelNotFound("x".into()).is_retryable());
    }
}
