//! Tool call extraction from free text.
//!
//! Three passes, first success wins:
//! 1. a JSON object carrying a `tool_calls` array,
//! 2. `Action:` / `Action Input:` line pairs,
//! 3. a small ordered list of natural-language patterns.
//!
//! Finding nothing is a normal outcome, never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use parley_core::tools::ToolDefinition;

use super::{single_argument, thinking, ToolCall, OBSERVATION_KEY};

/// Canonical name of the shell execution tool.
pub const SHELL_TOOL: &str = "execute_bash";

/// Which pass produced the calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtractionStrategy {
    Json,
    ActionPairs,
    NaturalLanguage,
}

/// Calls plus the bookkeeping callers need to clean content.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub calls: Vec<ToolCall>,
    pub strategy: Option<ExtractionStrategy>,
    /// Exact JSON blocks that carried tool calls.
    pub matched_json: Vec<String>,
}

/// Extract tool calls from `text`.
pub fn extract_tool_calls(text: &str, tools: &[ToolDefinition]) -> Vec<ToolCall> {
    extract(text, tools).calls
}

/// Extract tool calls, reporting which pass matched.
pub fn extract(text: &str, tools: &[ToolDefinition]) -> Extraction {
    let cleaned = thinking::extract_thinking(text).cleaned;

    if let Some((calls, matched_json)) = parse_json_tool_calls(&cleaned) {
        return Extraction {
            calls,
            strategy: Some(ExtractionStrategy::Json),
            matched_json,
        };
    }

    let calls = parse_action_pairs(&cleaned, tools);
    if !calls.is_empty() {
        return Extraction {
            calls,
            strategy: Some(ExtractionStrategy::ActionPairs),
            matched_json: Vec::new(),
        };
    }

    if let Some(call) = parse_natural_language(&cleaned, tools) {
        return Extraction {
            calls: vec![call],
            strategy: Some(ExtractionStrategy::NaturalLanguage),
            matched_json: Vec::new(),
        };
    }

    Extraction::default()
}

// ============================================================================
// JSON pass
// ============================================================================

#[derive(Deserialize)]
struct Envelope {
    tool_calls: Vec<RawCall>,
}

#[derive(Deserialize)]
struct RawCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Value,
    /// OpenAI-style `{"function": {"name", "arguments"}}` entries.
    #[serde(default)]
    function: Option<RawFunction>,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl RawCall {
    fn into_call(self) -> Option<ToolCall> {
        let (name, arguments) = match (self.name, self.function) {
            (Some(name), _) if !name.trim().is_empty() => (name, self.arguments),
            (_, Some(function)) => {
                let arguments = if self.arguments.is_null() {
                    function.arguments
                } else {
                    self.arguments
                };
                (function.name, arguments)
            }
            _ => return None,
        };
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(ToolCall::from_value(name, arguments))
    }
}

fn calls_from_candidate(candidate: &str) -> Option<Vec<ToolCall>> {
    let envelope: Envelope = serde_json::from_str(candidate).ok()?;
    let calls: Vec<ToolCall> = envelope
        .tool_calls
        .into_iter()
        .filter_map(RawCall::into_call)
        .collect();
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Try the JSON candidates in order: whole text, first-`{`-to-last-`}`, then
/// each standalone JSON line.
///
/// Returns the calls of the first candidate that yields any, plus every
/// block that carried tool calls.
pub fn parse_json_tool_calls(text: &str) -> Option<(Vec<ToolCall>, Vec<String>)> {
    let whole = text.trim();
    if whole.is_empty() {
        return None;
    }
    if let Some(calls) = calls_from_candidate(whole) {
        return Some((calls, vec![whole.to_string()]));
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            let span = &text[start..=end];
            if let Some(calls) = calls_from_candidate(span) {
                return Some((calls, vec![span.to_string()]));
            }
        }
    }

    let mut accepted = None;
    let mut matched = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !(line.starts_with('{') && line.ends_with('}')) {
            continue;
        }
        if let Some(calls) = calls_from_candidate(line) {
            matched.push(line.to_string());
            if accepted.is_none() {
                accepted = Some(calls);
            }
        }
    }
    accepted.map(|calls| (calls, matched))
}

// ============================================================================
// Action pair pass
// ============================================================================

const FORMAT_MARKERS: [&str; 5] = ["Action:", "Action Input:", "Observation:", "Thought:", "AI:"];

/// Scan for `Action:` / `Action Input:` pairs.
///
/// An `Observation:` line is attached to the most recent call as metadata.
pub fn parse_action_pairs(text: &str, tools: &[ToolDefinition]) -> Vec<ToolCall> {
    let lines: Vec<&str> = text.lines().collect();
    let mut calls: Vec<ToolCall> = Vec::new();
    let mut pending: Option<String> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();

        if let Some(rest) = line.strip_prefix("Action Input:") {
            let (value, consumed) = action_input_value(rest, &lines[i + 1..]);
            i += consumed;
            if let Some(name) = pending.take() {
                let arguments = bind_arguments(&name, &value, tools);
                calls.push(ToolCall::new(name, arguments));
            }
        } else if let Some(rest) = line.strip_prefix("Action:") {
            let name = clean_tool_name(rest);
            if !name.is_empty() {
                pending = Some(name);
            }
        } else if let Some(rest) = line.strip_prefix("Observation:") {
            if let Some(last) = calls.last_mut() {
                last.metadata.insert(
                    OBSERVATION_KEY.to_string(),
                    Value::String(rest.trim().to_string()),
                );
            }
        }

        i += 1;
    }

    calls
}

/// A JSON action input may span several lines; gather them until it parses.
fn action_input_value(first: &str, following: &[&str]) -> (String, usize) {
    let first = first.trim();
    if !first.starts_with('{') || serde_json::from_str::<Value>(first).is_ok() {
        return (first.to_string(), 0);
    }

    let mut value = first.to_string();
    for (n, line) in following.iter().enumerate() {
        let trimmed = line.trim();
        if FORMAT_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
            break;
        }
        value.push('\n');
        value.push_str(line);
        if serde_json::from_str::<Value>(&value).is_ok() {
            return (value, n + 1);
        }
    }
    (first.to_string(), 0)
}

fn clean_tool_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '*' | '[' | ']'))
        .trim()
        .to_string()
}

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s*=\s*(.*?)\s*$").expect("valid regex"));

/// Bind a free-form action input to an argument map.
///
/// JSON objects are used as-is, `key=value` lists become pairs, anything else
/// is stored under the tool's primary parameter.
pub fn bind_arguments(tool: &str, raw: &str, tools: &[ToolDefinition]) -> Map<String, Value> {
    let value = raw.trim();
    if value.is_empty() {
        return Map::new();
    }

    if value.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(value) {
            return map;
        }
    }

    let parameter = primary_parameter(tool, tools);
    // Shell commands legitimately contain `=`; never split them.
    if parameter != "command" {
        if let Some(map) = key_value_pairs(value) {
            return map;
        }
    }

    let unquoted = trim_quotes(value);
    if unquoted.is_empty() {
        return Map::new();
    }
    single_argument(&parameter, Value::String(unquoted.to_string()))
}

fn key_value_pairs(value: &str) -> Option<Map<String, Value>> {
    let mut map = Map::new();
    for part in value.split(',') {
        let caps = KEY_VALUE.captures(part)?;
        map.insert(
            caps[1].to_string(),
            Value::String(trim_quotes(&caps[2]).to_string()),
        );
    }
    Some(map)
}

fn trim_quotes(value: &str) -> &str {
    value
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
        .trim()
}

/// Parameter a single free-form value binds to for `tool`.
pub fn primary_parameter(tool: &str, tools: &[ToolDefinition]) -> String {
    tools
        .iter()
        .find(|d| d.name == tool)
        .and_then(ToolDefinition::primary_parameter)
        .unwrap_or_else(|| default_parameter(tool).to_string())
}

fn default_parameter(tool: &str) -> &'static str {
    let lower = tool.to_lowercase();
    if is_shell_tool(&lower) {
        "command"
    } else if lower.contains("file") || lower.contains("dir") {
        "path"
    } else if lower.contains("search") || lower.contains("grep") {
        "query"
    } else if lower.contains("web") || lower.contains("fetch") || lower.contains("browse") {
        "url"
    } else {
        "input"
    }
}

/// Names commonly used for a shell execution tool.
pub fn is_shell_tool(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "execute_bash" | "bash" | "shell" | "terminal" | "run_command" | "execute_command"
    )
}

// ============================================================================
// Natural-language pass
// ============================================================================

type NaturalLanguagePattern = fn(&str, &[ToolDefinition]) -> Option<(String, String)>;

/// Ordered fallback patterns. Each yields a `(tool, command)` guess.
const NATURAL_LANGUAGE_PATTERNS: [(&str, NaturalLanguagePattern); 6] = [
    ("run_phrase", run_phrase),
    ("backtick_command", backtick_command),
    ("tool_phrase", tool_phrase),
    ("prefixed_command", prefixed_command),
    ("count_pipeline", count_pipeline),
    ("function_call", function_call),
];

/// Recover a single best-guess call when no structured form is present.
///
/// The guessed tool must be known: listed in `tools`, or the shell tool when
/// no catalog is given.
pub fn parse_natural_language(text: &str, tools: &[ToolDefinition]) -> Option<ToolCall> {
    for (pattern, matcher) in NATURAL_LANGUAGE_PATTERNS {
        let Some((tool, command)) = matcher(text, tools) else {
            continue;
        };
        if !is_known_tool(&tool, tools) {
            tracing::trace!(pattern, tool = %tool, "Ignoring guess for unknown tool");
            continue;
        }
        tracing::trace!(pattern, tool = %tool, "Natural-language tool guess");
        let arguments = bind_arguments(&tool, &command, tools);
        return Some(ToolCall::new(tool, arguments));
    }
    None
}

pub fn is_known_tool(name: &str, tools: &[ToolDefinition]) -> bool {
    if tools.is_empty() {
        name == SHELL_TOOL
    } else {
        tools.iter().any(|d| d.name == name)
    }
}

static RUN_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:i'll|i will|let me|i'm going to)\s+(?:run|execute)\s+(?:the\s+)?(?:command\s+)?["`]?([^"`\n]+)["`]?"#,
    )
    .expect("valid regex")
});

static BACKTICKED: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));

static SHELL_UTILITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:ls|wc|grep)\b").expect("valid regex"));

static TOOL_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:using|use|with)\s+(?:the\s+)?(\w+)\s+tool.*?:\s*(.+)").expect("valid regex")
});

static PREFIXED_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:bash|shell|execute)\s*:\s*(.+?)\s*$").expect("valid regex")
});

static COUNT_PIPELINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(ls\b[^\n|]*\|\s*wc\s+-l)").expect("valid regex"));

static FUNCTION_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*)\(([^()\n]*)\)").expect("valid regex"));

/// "I'll run `ls -la`", "let me execute the command df -h".
fn run_phrase(text: &str, _tools: &[ToolDefinition]) -> Option<(String, String)> {
    let caps = RUN_PHRASE.captures(text)?;
    let command = caps[1].trim().trim_end_matches(['.', ',', ';']).trim();
    // "I'll run the following command:" introduces a block, it is not one.
    if command.is_empty() || command.ends_with(':') {
        return None;
    }
    Some((SHELL_TOOL.to_string(), command.to_string()))
}

/// A backticked span containing a pipe or a common shell utility.
fn backtick_command(text: &str, _tools: &[ToolDefinition]) -> Option<(String, String)> {
    BACKTICKED
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .find(|cmd| cmd.contains('|') || SHELL_UTILITY.is_match(cmd))
        .map(|cmd| (SHELL_TOOL.to_string(), cmd))
}

/// "Using the bash tool: ls".
fn tool_phrase(text: &str, _tools: &[ToolDefinition]) -> Option<(String, String)> {
    let caps = TOOL_PHRASE.captures(text)?;
    let tool = match caps[1].to_lowercase().as_str() {
        "bash" | "shell" | "terminal" | "command" => SHELL_TOOL.to_string(),
        "file" | "read" => "read_file".to_string(),
        "web" | "fetch" => "web_fetch".to_string(),
        _ => caps[1].to_string(),
    };
    Some((tool, caps[2].trim().to_string()))
}

/// A `bash: <command>` line.
fn prefixed_command(text: &str, _tools: &[ToolDefinition]) -> Option<(String, String)> {
    let caps = PREFIXED_COMMAND.captures(text)?;
    Some((SHELL_TOOL.to_string(), caps[1].to_string()))
}

/// A bare `ls ... | wc -l` counting pipeline.
fn count_pipeline(text: &str, _tools: &[ToolDefinition]) -> Option<(String, String)> {
    let caps = COUNT_PIPELINE.captures(text)?;
    Some((SHELL_TOOL.to_string(), caps[1].trim().to_string()))
}

/// `read_file("notes.txt")` for a tool the catalog knows.
fn function_call(text: &str, tools: &[ToolDefinition]) -> Option<(String, String)> {
    FUNCTION_CALL
        .captures_iter(text)
        .find(|c| is_known_tool(&c[1], tools))
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
}
