//! Agent configuration.
//!
//! Every field has a serde default so partial configs deserialize, and every
//! default can be overridden from the environment via [`AgentConfig::from_env`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use parley_core::config::{agent, env_vars, models};

use crate::error::{invalid_input, Result};

/// Per-agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model name, used for capability lookup and request routing.
    #[serde(default = "default_model")]
    pub model: String,

    /// Bound of the per-turn event channel. A full channel pauses the turn.
    #[serde(default = "default_stream_channel_capacity")]
    pub stream_channel_capacity: usize,

    /// Upper bound on a single tool execution.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Calls beyond this count in one turn are dropped.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Characters of a tool result shown in progress updates.
    #[serde(default = "default_result_preview_chars")]
    pub result_preview_chars: usize,
}

fn default_model() -> String {
    models::OLLAMA_DEFAULT.to_string()
}
fn default_stream_channel_capacity() -> usize {
    agent::DEFAULT_STREAM_CHANNEL_CAPACITY
}
fn default_tool_timeout_secs() -> u64 {
    agent::DEFAULT_TOOL_TIMEOUT_SECS
}
fn default_max_tool_calls() -> usize {
    agent::DEFAULT_MAX_TOOL_CALLS
}
fn default_temperature() -> f32 {
    agent::DEFAULT_TEMPERATURE
}
fn default_result_preview_chars() -> usize {
    crate::interpret::streaming::RESULT_PREVIEW_CHARS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            stream_channel_capacity: default_stream_channel_capacity(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_tool_calls: default_max_tool_calls(),
            temperature: default_temperature(),
            result_preview_chars: default_result_preview_chars(),
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `PARLEY_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            model: env_vars::model(),
            stream_channel_capacity: env_vars::stream_channel_capacity(),
            tool_timeout_secs: env_vars::tool_timeout_secs(),
            max_tool_calls: env_vars::max_tool_calls(),
            temperature: env_vars::temperature(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_stream_channel_capacity(mut self, capacity: usize) -> Self {
        self.stream_channel_capacity = capacity;
        self
    }

    pub fn with_tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    pub fn with_max_tool_calls(mut self, max: usize) -> Self {
        self.max_tool_calls = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(invalid_input("model must not be empty"));
        }
        if self.stream_channel_capacity == 0 {
            return Err(invalid_input("stream_channel_capacity must be at least 1"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(invalid_input("tool_timeout_secs must be at least 1"));
        }
        if self.max_tool_calls == 0 {
            return Err(invalid_input("max_tool_calls must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid_input("temperature must be between 0.0 and 2.0"));
        }
        Ok(())
    }
}

static DEFAULT_CONFIG: std::sync::OnceLock<AgentConfig> = std::sync::OnceLock::new();

/// Process-wide default, read from the environment on first use.
pub fn default_config() -> &'static AgentConfig {
    DEFAULT_CONFIG.get_or_init(AgentConfig::from_env)
}

/// Install the process-wide default. Must run before the first read.
pub fn set_default_config(config: AgentConfig) -> Result<()> {
    config.validate()?;
    DEFAULT_CONFIG
        .set(config)
        .map_err(|_| invalid_input("default config already set"))
}
