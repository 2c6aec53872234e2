//! Model tool-calling capability tiers.
//!
//! Routing only needs a coarse answer to "how reliably does this model call
//! tools?", so capabilities are reduced to three tiers. The lookup is
//! read-only after construction and safe to share across turns.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How reliably a model supports structured tool calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCompatibility {
    /// The model cannot call tools; tools are only described for reference.
    None,
    /// Tool calls work through conversational prompting and text parsing.
    Partial,
    /// The model emits well-formed structured tool calls.
    Excellent,
}

impl fmt::Display for ToolCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCompatibility::None => write!(f, "none"),
            ToolCompatibility::Partial => write!(f, "partial"),
            ToolCompatibility::Excellent => write!(f, "excellent"),
        }
    }
}

/// Source of capability tiers, keyed by model name.
pub trait CapabilityLookup: Send + Sync {
    fn tier(&self, model: &str) -> ToolCompatibility;
}

/// Lowercase, trim and drop the default `:latest` tag.
pub fn normalize_model_name(model: &str) -> String {
    let lower = model.trim().to_lowercase();
    match lower.strip_suffix(":latest") {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

/// Name-based capability inference with explicit overrides.
#[derive(Debug, Clone, Default)]
pub struct HeuristicCapabilityLookup {
    overrides: HashMap<String, ToolCompatibility>,
}

impl HeuristicCapabilityLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a tier for one model, bypassing the heuristics.
    pub fn with_override(mut self, model: &str, tier: ToolCompatibility) -> Self {
        self.overrides.insert(normalize_model_name(model), tier);
        self
    }

    /// Infer a tier purely from the model family and version in its name.
    pub fn infer(model: &str) -> ToolCompatibility {
        let name = normalize_model_name(model);

        if name.contains("llama") {
            return if ["3.1", "3.2", "3.3"].iter().any(|v| name.contains(v)) {
                ToolCompatibility::Excellent
            } else {
                // llama 3.0 and older families still follow prompted formats
                ToolCompatibility::Partial
            };
        }

        if name.contains("qwen") {
            return if name.contains("qwen2.5") || name.contains("qwen3") {
                ToolCompatibility::Excellent
            } else {
                ToolCompatibility::Partial
            };
        }

        if name.contains("mixtral") {
            return ToolCompatibility::Excellent;
        }
        if name.contains("mistral") {
            return ToolCompatibility::Partial;
        }

        if name.contains("gemma") || name.contains("phi") {
            return ToolCompatibility::None;
        }

        // deepseek, coder and anything unrecognised: prompted tool use only
        ToolCompatibility::Partial
    }
}

impl CapabilityLookup for HeuristicCapabilityLookup {
    fn tier(&self, model: &str) -> ToolCompatibility {
        let name = normalize_model_name(model);
        if let Some(tier) = self.overrides.get(&name) {
            return *tier;
        }
        let tier = Self::infer(&name);
        tracing::trace!(model = %name, %tier, "Inferred tool compatibility");
        tier
    }
}

/// A lookup that reports the same tier for every model.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapability(pub ToolCompatibility);

impl CapabilityLookup for FixedCapability {
    fn tier(&self, _model: &str) -> ToolCompatibility {
        self.0
    }
}
