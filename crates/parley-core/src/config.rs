//! Shared defaults and environment variable helpers.
//!
//! Configuration files are the embedding application's business; this
//! module only knows the defaults and how to override them from the
//! environment.

/// Default endpoint constants.
pub mod endpoints {
    pub const OLLAMA: &str = "http://localhost:11434";
}

/// Default model constants.
pub mod models {
    pub const OLLAMA_DEFAULT: &str = "qwen2.5:7b";
}

/// Agent defaults.
pub mod agent {
    /// Bounded capacity of the per-turn streaming channel.
    pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 32;
    /// Per-tool execution timeout.
    pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;
    /// Upper bound on tool calls executed in one turn.
    pub const DEFAULT_MAX_TOOL_CALLS: usize = 8;
    /// Default model temperature.
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    /// Default model request timeout.
    pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
}

/// Environment variable names and typed accessors.
pub mod env_vars {
    use super::{agent, endpoints, models};

    pub const OLLAMA_ENDPOINT: &str = "PARLEY_OLLAMA_ENDPOINT";
    pub const MODEL: &str = "PARLEY_MODEL";
    pub const STREAM_CHANNEL_CAPACITY: &str = "PARLEY_STREAM_CHANNEL_CAPACITY";
    pub const TOOL_TIMEOUT_SECS: &str = "PARLEY_TOOL_TIMEOUT_SECS";
    pub const MAX_TOOL_CALLS: &str = "PARLEY_MAX_TOOL_CALLS";
    pub const TEMPERATURE: &str = "PARLEY_TEMPERATURE";
    pub const LLM_TIMEOUT_SECS: &str = "PARLEY_LLM_TIMEOUT_SECS";
    pub const LOG_JSON: &str = "PARLEY_LOG_JSON";

    fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }

    pub fn ollama_endpoint() -> String {
        std::env::var(OLLAMA_ENDPOINT).unwrap_or_else(|_| endpoints::OLLAMA.to_string())
    }

    pub fn model() -> String {
        std::env::var(MODEL).unwrap_or_else(|_| models::OLLAMA_DEFAULT.to_string())
    }

    pub fn stream_channel_capacity() -> usize {
        parsed::<usize>(STREAM_CHANNEL_CAPACITY)
            .filter(|n| *n > 0)
            .unwrap_or(agent::DEFAULT_STREAM_CHANNEL_CAPACITY)
    }

    pub fn tool_timeout_secs() -> u64 {
        parsed(TOOL_TIMEOUT_SECS).unwrap_or(agent::DEFAULT_TOOL_TIMEOUT_SECS)
    }

    pub fn max_tool_calls() -> usize {
        parsed(MAX_TOOL_CALLS).unwrap_or(agent::DEFAULT_MAX_TOOL_CALLS)
    }

    pub fn temperature() -> f32 {
        parsed(TEMPERATURE).unwrap_or(agent::DEFAULT_TEMPERATURE)
    }

    pub fn llm_timeout_secs() -> u64 {
        parsed(LLM_TIMEOUT_SECS).unwrap_or(agent::DEFAULT_LLM_TIMEOUT_SECS)
    }

    /// `1`, `true` or `yes` enable JSON log output.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

/// Strip a trailing slash and an OpenAI-compatible `/v1` suffix.
pub fn normalize_ollama_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/v1")
        .unwrap_or(trimmed)
        .to_string()
}
