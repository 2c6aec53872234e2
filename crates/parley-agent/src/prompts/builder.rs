//! Prompt builder for tool-aware turns.
//!
//! Every prompt is built from the tool catalog at call time, so a registry
//! change is visible on the next turn.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use parley_core::tools::ToolDefinition;

use crate::agent::types::ToolResult;

/// Examples appended to the tool preamble.
pub const TOOL_CALL_EXAMPLES: [(&str, &str); 2] = [
    (
        "list files",
        r#"{"tool_calls":[{"name":"execute_bash","arguments":{"command":"ls -la"}}]}"#,
    ),
    (
        "count files",
        r#"{"tool_calls":[{"name":"execute_bash","arguments":{"command":"ls | wc -l"}}]}"#,
    ),
];

const JSON_FORMAT: &str = r#"To use a tool, reply with ONLY a JSON object in exactly this shape:
{
  "tool_calls": [
    {
      "name": "tool_name",
      "arguments": {
        "param1": "value1"
      }
    }
  ]
}"#;

const JSON_RULES: &str = "Do not write anything before or after the JSON and do not use thinking blocks.";

const FOLLOW_UP_INSTRUCTIONS: &str = "Write a natural, helpful reply for the user that:
1. Says that tools were run to get this information
2. Presents the results clearly
3. Answers the question directly
4. Uses markdown where it helps, such as code blocks for command output

Do not repeat the raw output verbatim. Explain what it shows.";

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid regex"));

/// Remove terminal colour and cursor escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Builds the prompts of one turn from the current catalog.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    tools: Vec<ToolDefinition>,
    include_examples: bool,
}

impl PromptBuilder {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            include_examples: true,
        }
    }

    pub fn with_examples(mut self, include: bool) -> Self {
        self.include_examples = include;
        self
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Tool listing plus the JSON call instruction. Empty without tools.
    pub fn tool_context(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }

        let mut prompt = String::from("You have access to the following tools:\n\n");
        prompt.push_str(&self.tool_listing());
        prompt.push_str(JSON_FORMAT);
        prompt.push_str("\n\n");

        if self.include_examples {
            prompt.push_str("Examples:\n");
            for (task, example) in TOOL_CALL_EXAMPLES {
                let _ = writeln!(prompt, "- To {task}: {example}");
            }
            prompt.push('\n');
        }

        prompt.push_str(JSON_RULES);
        prompt
    }

    /// Tool listing for a model that cannot call tools. Empty without tools.
    pub fn tool_reference(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }

        let mut prompt = String::from(
            "The following tools exist in this environment. You cannot run them yourself; \
             mention them only when telling the user how they could get the answer.\n\n",
        );
        prompt.push_str(&self.tool_listing());
        prompt.trim_end().to_string()
    }

    /// System prompt for the explain call after tools have run.
    pub fn follow_up(question: &str, results: &[ToolResult]) -> String {
        let mut prompt = format!(
            "Tools were executed to answer the user's question: \"{question}\"\n\nTool Execution Results:\n"
        );
        for (i, result) in results.iter().enumerate() {
            let _ = write!(
                prompt,
                "Tool {} Output:\n{}\n\n",
                i + 1,
                strip_ansi(&result.output)
            );
        }
        prompt.push_str(FOLLOW_UP_INSTRUCTIONS);
        prompt
    }

    fn tool_listing(&self) -> String {
        let mut listing = String::new();
        for tool in &self.tools {
            let _ = writeln!(listing, "Tool: {}", tool.name);
            let _ = writeln!(listing, "Description: {}", tool.description);
            let params = tool.parameter_descriptions();
            if !params.is_empty() {
                listing.push_str("Parameters:\n");
                for (name, description) in params {
                    let _ = writeln!(listing, "  - {name}: {description}");
                }
            }
            listing.push('\n');
        }
        listing
    }
}
