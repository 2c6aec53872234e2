//! Model output interpretation.
//!
//! Turns raw model text into an [`InterpretedOutput`]: the user-facing
//! content, the reasoning that was removed from it, and any tool calls the
//! text expressed. The same pipeline runs on complete responses
//! ([`interpret`]) and at the end of a stream
//! ([`StreamingInterpreter::finalize`]).

pub mod react;
pub mod streaming;
pub mod thinking;
pub mod tool_parser;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use parley_core::llm::NativeToolCall;
use parley_core::tools::ToolDefinition;

use crate::error::{Error, Result};

pub use react::{convert_to_react, ToolIntentDetector};
pub use streaming::{StreamDelta, StreamingInterpreter, StreamingParserState};
pub use thinking::{extract_thinking, ThinkingExtraction};
pub use tool_parser::{extract_tool_calls, ExtractionStrategy, SHELL_TOOL};

/// Metadata key an `Observation:` line is stored under.
pub const OBSERVATION_KEY: &str = "_observation";

/// Message fragment marking an output that could not be interpreted.
pub const UNINTERPRETABLE: &str = "could not interpret output";

/// A structured tool invocation recovered from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Never absent; a call without arguments has an empty map.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Human-readable primary argument, for progress display only.
    pub display_argument: String,
    /// Non-authoritative extras such as an attached observation.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        let display_argument = display_argument(&arguments);
        Self {
            name: name.into(),
            arguments,
            display_argument,
            metadata: Map::new(),
        }
    }

    /// Build a call from loosely-typed JSON arguments.
    pub fn from_value(name: impl Into<String>, arguments: Value) -> Self {
        Self::new(name, arguments_from_value(arguments))
    }

    pub fn observation(&self) -> Option<&str> {
        self.metadata.get(OBSERVATION_KEY).and_then(Value::as_str)
    }
}

impl From<&NativeToolCall> for ToolCall {
    fn from(call: &NativeToolCall) -> Self {
        Self::from_value(call.name.clone(), call.arguments.clone())
    }
}

/// Normalise any JSON value into an argument map.
pub fn arguments_from_value(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ if s.trim().is_empty() => Map::new(),
            _ => single_argument("input", Value::String(s)),
        },
        other => single_argument("input", other),
    }
}

pub(crate) fn single_argument(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

const DISPLAY_KEYS: [&str; 5] = ["command", "path", "input", "url", "query"];

fn display_argument(arguments: &Map<String, Value>) -> String {
    let picked = DISPLAY_KEYS
        .iter()
        .find_map(|k| arguments.get(*k))
        .or_else(|| {
            if arguments.len() == 1 {
                arguments.values().next()
            } else {
                None
            }
        });

    match picked {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None if arguments.is_empty() => String::new(),
        None => Value::Object(arguments.clone()).to_string(),
    }
}

/// The interpretation of one model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpretedOutput {
    pub content: String,
    pub reasoning: String,
    pub has_reasoning: bool,
    pub tool_calls: Vec<ToolCall>,
}

impl InterpretedOutput {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Knobs for one interpretation pass.
///
/// The aggressive retry after a failed first pass is expressed as a second
/// call with [`InterpretOptions::aggressive`], never as state on a
/// long-lived parser.
#[derive(Debug, Clone, Default)]
pub struct InterpretOptions {
    /// Resolve unbalanced reasoning delimiters instead of leaving them.
    pub force_strip_reasoning: bool,
    /// Rewrite natural-language tool intent into action pairs first.
    pub convert_react: bool,
    /// Known tools, used for argument binding and name validation.
    pub tools: Vec<ToolDefinition>,
}

impl InterpretOptions {
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }

    pub fn aggressive(mut self) -> Self {
        self.force_strip_reasoning = true;
        self.convert_react = true;
        self
    }
}

/// Interpret a complete response with default options.
pub fn interpret(text: &str) -> InterpretedOutput {
    interpret_with(text, &InterpretOptions::default())
}

/// Interpret a complete response.
///
/// Never fails: ambiguity resolves to fewer tool calls and the text is
/// returned as content.
pub fn interpret_with(text: &str, options: &InterpretOptions) -> InterpretedOutput {
    let extraction = if options.force_strip_reasoning {
        thinking::force_strip(text)
    } else {
        thinking::extract_thinking(text)
    };

    let source = if options.convert_react {
        convert_to_react(&extraction.cleaned, &options.tools)
    } else {
        extraction.cleaned.clone()
    };

    let extracted = tool_parser::extract(&source, &options.tools);
    if let Some(strategy) = extracted.strategy {
        tracing::debug!(
            ?strategy,
            count = extracted.calls.len(),
            "Extracted tool calls from model output"
        );
    }

    let mut content = extraction.cleaned.clone();
    if !extracted.matched_json.is_empty() {
        for block in &extracted.matched_json {
            content = content.replacen(block.as_str(), "", 1);
        }
        content = thinking::collapse_blank_lines(&content);
    }
    let content = thinking::strip_agent_format(&content);

    InterpretedOutput {
        content,
        reasoning: extraction.reasoning(),
        has_reasoning: extraction.has_reasoning(),
        tool_calls: extracted.calls,
    }
}

/// Reject a tool-mode interpretation that found nothing because reasoning
/// markup was left in place.
pub fn check_tool_output(output: &InterpretedOutput) -> Result<()> {
    if output.has_tool_calls() {
        return Ok(());
    }
    match thinking::find_delimiter(&output.content) {
        Some(delimiter) => Err(Error::Parse {
            location: "model output".to_string(),
            message: format!(
                "{UNINTERPRETABLE}: unresolved reasoning delimiter {delimiter} in {:?}",
                preview(&output.content, 120)
            ),
        }),
        None => Ok(()),
    }
}

/// Whether `err` is the parse failure produced by [`check_tool_output`].
pub fn is_reasoning_interference(err: &Error) -> bool {
    match err {
        Error::Parse { message, .. } => {
            message.contains(UNINTERPRETABLE) && thinking::contains_delimiter(message)
        }
        _ => false,
    }
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}
