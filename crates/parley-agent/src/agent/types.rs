//! Agent types - modes, decisions, events and turn responses.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::interpret::ToolCall;

/// Interaction strategy for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Plain generation, no tool execution.
    Direct,
    /// The model receives tool schemas and returns structured calls.
    NativeToolCalling,
    /// Tools are described in the prompt and calls are parsed from text.
    ConversationalToolCalling,
}

impl AgentMode {
    pub fn uses_tools(&self) -> bool {
        !matches!(self, AgentMode::Direct)
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentMode::Direct => write!(f, "direct"),
            AgentMode::NativeToolCalling => write!(f, "native_tool_calling"),
            AgentMode::ConversationalToolCalling => write!(f, "conversational_tool_calling"),
        }
    }
}

/// Routing result for one user turn. Never cached across turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub mode: AgentMode,
    /// Implies `mode` is not [`AgentMode::Direct`].
    pub needs_tools: bool,
    /// Describe the catalog in the prompt without executing anything.
    #[serde(default)]
    pub tools_for_reference: bool,
}

impl AgentDecision {
    pub fn direct() -> Self {
        Self {
            mode: AgentMode::Direct,
            needs_tools: false,
            tools_for_reference: false,
        }
    }

    pub fn with_tools(mode: AgentMode) -> Self {
        Self {
            mode,
            needs_tools: mode.uses_tools(),
            tools_for_reference: false,
        }
    }

    /// Direct answer that may mention tools but never runs them.
    pub fn reference_only() -> Self {
        Self {
            tools_for_reference: true,
            ..Self::direct()
        }
    }
}

/// Agent event emitted during streaming processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Routing decision for the turn. Always first.
    Decision { mode: AgentMode, needs_tools: bool },
    /// Completed reasoning text.
    Thinking { content: String },
    /// User-facing content chunk.
    Content { content: String },
    /// Progress line for a tool the model is using.
    ToolUsage { display: String },
    /// A tool call is starting.
    ToolCallStart { tool: String, arguments: Value },
    /// A tool call finished.
    ToolCallEnd {
        tool: String,
        result: String,
        success: bool,
    },
    /// Terminal error for the turn.
    Error { message: String },
    /// Stream ended. Always last.
    End,
}

impl AgentEvent {
    pub fn decision(decision: &AgentDecision) -> Self {
        Self::Decision {
            mode: decision.mode,
            needs_tools: decision.needs_tools,
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking {
            content: content.into(),
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self::Content {
            content: content.into(),
        }
    }

    pub fn tool_usage(display: impl Into<String>) -> Self {
        Self::ToolUsage {
            display: display.into(),
        }
    }

    pub fn tool_call_start(tool: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCallStart {
            tool: tool.into(),
            arguments,
        }
    }

    pub fn tool_call_end(
        tool: impl Into<String>,
        result: impl Into<String>,
        success: bool,
    ) -> Self {
        Self::ToolCallEnd {
            tool: tool.into(),
            result: result.into(),
            success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn end() -> Self {
        Self::End
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

/// One executed tool call and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call: ToolCall,
    /// Result text, or the error message on failure.
    pub output: String,
    pub success: bool,
}

/// Outcome of a non-streaming turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub answer: String,
    /// Reasoning removed from the model output, empty when there was none.
    pub reasoning: String,
    pub decision: AgentDecision,
    pub tool_results: Vec<ToolResult>,
    /// The answer came from the direct fallback call.
    pub fell_back: bool,
}
