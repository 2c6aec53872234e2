//! Per-turn mode selection.
//!
//! Deliberately heuristic: a keyword hit or an interrogative opener is
//! enough to try tools, and anything else gets a direct answer.

use parley_core::capability::{normalize_model_name, ToolCompatibility};

use super::types::{AgentDecision, AgentMode};

/// Keyword families, checked in order against the lower-cased input.
const KEYWORD_FAMILIES: [(&str, &[&str]); 5] = [
    (
        "file",
        &[
            "how many files",
            "list files",
            "list the files",
            "count files",
            "show files",
            "create file",
            "write file",
            "read file",
            "delete file",
            "what's in",
            "show me the contents",
            "open file",
        ],
    ),
    (
        "command",
        &[
            "run command",
            "execute",
            "terminal",
            "bash",
            "shell",
            "docker",
            "git",
            "npm",
            "go run",
            "python",
        ],
    ),
    (
        "system",
        &[
            "disk usage",
            "memory usage",
            "cpu usage",
            "system info",
            "process",
            "running",
            "status",
        ],
    ),
    (
        "web",
        &[
            "fetch",
            "download",
            "web page",
            "url",
            "website",
            "search for",
            "look up",
            "find information about",
        ],
    ),
    (
        "code",
        &["grep", "search code", "find in files", "locate"],
    ),
];

const INTERROGATIVE_PREFIXES: [&str; 7] = [
    "how many",
    "what is the",
    "show me",
    "can you check",
    "what's running",
    "is there",
    "do we have",
];

/// Model families whose runtimes accept structured tool schemas.
const NATIVE_FAMILIES: [&str; 8] = [
    "llama", "qwen", "mistral", "deepseek", "command-r", "granite", "gemma2", "phi3",
];

/// Chooses the interaction mode for each user turn.
///
/// Stateless: the decision is a pure function of the input text, the
/// capability tier and the registered tool names.
#[derive(Debug, Clone, Default)]
pub struct AgentRouter {
    model: String,
}

impl AgentRouter {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: normalize_model_name(&model.into()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the model's runtime takes structured tool schemas.
    pub fn supports_native_calls(&self) -> bool {
        NATIVE_FAMILIES.iter().any(|f| self.model.contains(f))
    }

    pub fn decide(
        &self,
        user_text: &str,
        tier: ToolCompatibility,
        tool_names: &[String],
    ) -> AgentDecision {
        let Some(reason) = tool_reason(user_text, tool_names) else {
            tracing::debug!("No tool signal, answering directly");
            return AgentDecision::direct();
        };

        let decision = match tier {
            // Tools are described for reference only.
            ToolCompatibility::None => AgentDecision::reference_only(),
            ToolCompatibility::Excellent if self.supports_native_calls() => {
                AgentDecision::with_tools(AgentMode::NativeToolCalling)
            }
            _ => AgentDecision::with_tools(AgentMode::ConversationalToolCalling),
        };

        tracing::debug!(
            reason = %reason,
            %tier,
            mode = %decision.mode,
            "Routed turn"
        );
        decision
    }

    pub fn describe(mode: AgentMode) -> &'static str {
        match mode {
            AgentMode::Direct => "Direct answer without tool execution",
            AgentMode::NativeToolCalling => "Structured tool calls through the model runtime",
            AgentMode::ConversationalToolCalling => {
                "Tools described in the prompt, calls parsed from the reply"
            }
        }
    }
}

/// First rule that asks for tools, as a short label for logs.
fn tool_reason(user_text: &str, tool_names: &[String]) -> Option<String> {
    let lower = user_text.trim().to_lowercase();

    if let Some((family, _)) = KEYWORD_FAMILIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
    {
        return Some(format!("{family} keyword"));
    }

    if INTERROGATIVE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Some("interrogative prefix".to_string());
    }

    tool_names
        .iter()
        .map(|n| n.to_lowercase())
        .find(|n| !n.is_empty() && lower.contains(n.as_str()))
        .map(|n| format!("tool name {n}"))
}
