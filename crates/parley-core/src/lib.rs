//! Core traits and types for Parley.
//!
//! This crate defines the abstractions shared by the model backends and the
//! agent: messages, the model runtime trait, tools, capability tiers,
//! configuration defaults and the unified error type.

pub mod capability;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod message;
pub mod tools;

pub use capability::{CapabilityLookup, HeuristicCapabilityLookup, ToolCompatibility};
pub use error::{Error, Result};
pub use llm::{
    ChunkStream, DynLlmRuntime, FinishReason, GenerationParams, LlmError, LlmInput, LlmOutput,
    LlmRuntime, NativeToolCall, StreamChunk,
};
pub use memory::{ConversationMemory, InMemoryConversation};
pub use message::{Message, MessageRole};
pub use tools::{
    DynTool, Tool, ToolCatalog, ToolDefinition, ToolError, ToolExecution, ToolExecutor,
    ToolOutput, ToolRegistry,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::capability::{CapabilityLookup, ToolCompatibility};
    pub use crate::config::env_vars;
    pub use crate::error::{Error, Result};
    pub use crate::llm::{LlmError, LlmInput, LlmOutput, LlmRuntime};
    pub use crate::message::{Message, MessageRole};
    pub use crate::tools::{Tool, ToolCatalog, ToolDefinition, ToolExecutor, ToolOutput};
}
