//! Conversational tool-calling agent for Parley.
//!
//! Routes each user turn to a direct answer or a tool-calling mode,
//! interprets free-form model output (reasoning blocks, JSON calls,
//! `Action:` pairs, natural-language commands), executes the requested
//! tools and streams the result as [`AgentEvent`]s.

pub mod agent;
pub mod config;
pub mod error;
pub mod interpret;
pub mod prompts;

pub use agent::{
    Agent, AgentDecision, AgentEvent, AgentEventStream, AgentMode, AgentRouter, Resolution,
    ToolExecutionCoordinator, ToolResult, TurnOutcome,
};
pub use config::{default_config, set_default_config, AgentConfig};
pub use error::{Error, Result};
pub use interpret::{
    interpret, interpret_with, InterpretOptions, InterpretedOutput, StreamDelta,
    StreamingInterpreter, ToolCall,
};
pub use prompts::PromptBuilder;

// Runtime backends, re-exported for convenience.
pub use parley_llm as llm;
