//! Rewrites natural-language tool intent into `Action:` pairs.
//!
//! Models without structured tool support often announce what they would do
//! ("I'll run `ls | wc -l`") instead of emitting a call. When that happens
//! the text is rewritten into the agent format so the action-pair pass can
//! pick it up.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use parley_core::tools::ToolDefinition;

use super::tool_parser;

const INTENT_PHRASES: [&str; 10] = [
    "i'll run",
    "i will run",
    "let me run",
    "let me execute",
    "i'll execute",
    "i need to run",
    "i'm going to run",
    "run the command",
    "execute the command",
    "using the",
];

static COMMAND_SHAPES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?m)^\s*\$\s+\S",
        r"(?m)^\s*>\s+\S",
        r"(?im)^\s*(?:bash|shell|execute)\s*:",
        r"`[^`\n]*\|[^`\n]*`",
        r"ls\b[^\n|]*\|\s*wc\s+-l",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

const REACT_PREAMBLE: &str = "I need to use a tool to help with this task.";

/// Detects text that talks about running a tool without calling it.
#[derive(Debug, Clone)]
pub struct ToolIntentDetector {
    phrases: Vec<&'static str>,
}

impl Default for ToolIntentDetector {
    fn default() -> Self {
        Self {
            phrases: INTENT_PHRASES.to_vec(),
        }
    }
}

impl ToolIntentDetector {
    pub fn detect(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p))
            || COMMAND_SHAPES.iter().any(|re| re.is_match(text))
    }
}

/// Whether `text` already carries an `Action:` / `Action Input:` pair.
pub fn has_action_pair(text: &str) -> bool {
    let mut saw_action = false;
    for line in text.lines().map(str::trim_start) {
        if line.starts_with("Action Input:") {
            if saw_action {
                return true;
            }
        } else if line.starts_with("Action:") {
            saw_action = true;
        }
    }
    false
}

/// Rewrite tool intent into a single action pair.
///
/// Text that is already structured, shows no intent, or names no known tool
/// is returned unchanged.
pub fn convert_to_react(text: &str, tools: &[ToolDefinition]) -> String {
    if has_action_pair(text) || text.contains("\"tool_calls\"") {
        return text.to_string();
    }
    if !ToolIntentDetector::default().detect(text) {
        return text.to_string();
    }
    let Some(call) = tool_parser::parse_natural_language(text, tools) else {
        return text.to_string();
    };

    let input = match call.arguments.values().next() {
        Some(Value::String(s)) if call.arguments.len() == 1 => s.clone(),
        _ => Value::Object(call.arguments.clone()).to_string(),
    };
    tracing::debug!(tool = %call.name, "Converted tool intent to action format");

    format!(
        "{REACT_PREAMBLE}\n\nAction: {}\nAction Input: {}",
        call.name, input
    )
}
