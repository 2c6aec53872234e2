//! Ollama backend.
//!
//! Talks to Ollama's native `/api/chat` endpoint. Streaming responses are
//! newline-delimited JSON objects; each is decoded into a
//! [`StreamChunk`]. Native tool calls, when the request carried tool
//! definitions, are re-emitted as a `{"tool_calls": [...]}` JSON block so the
//! text interpreter downstream sees them in its canonical structured form.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use parley_core::config::{endpoints, normalize_ollama_endpoint};
use parley_core::llm::{
    ChunkStream, FinishReason, LlmError, LlmInput, LlmOutput, LlmRuntime, NativeToolCall,
    StreamChunk,
};
use parley_core::message::Message;
use parley_core::tools::ToolDefinition;

/// Ollama configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    /// Ollama endpoint (default: http://localhost:11434)
    pub endpoint: String,

    /// Model name (e.g., "qwen2.5:7b", "llama3.1:8b")
    pub model: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    parley_core::config::agent::DEFAULT_LLM_TIMEOUT_SECS
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn new(model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoints::OLLAMA.to_string(),
            model: model.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Endpoint and model from `PARLEY_OLLAMA_ENDPOINT` / `PARLEY_MODEL`.
    pub fn from_env() -> Self {
        use parley_core::config::env_vars;

        Self::new(env_vars::model())
            .with_endpoint(env_vars::ollama_endpoint())
            .with_timeout_secs(env_vars::llm_timeout_secs())
    }

    /// Set a custom endpoint. A `/v1` suffix is stripped since only the
    /// native API is used.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = normalize_ollama_endpoint(&endpoint.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::new(parley_core::config::models::OLLAMA_DEFAULT)
    }
}

/// Ollama runtime backend.
pub struct OllamaRuntime {
    config: OllamaConfig,
    client: Client,
}

impl OllamaRuntime {
    pub fn new(config: OllamaConfig) -> Result<Self, LlmError> {
        tracing::debug!("Creating Ollama runtime with endpoint: {}", config.endpoint);

        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.endpoint)
    }

    fn build_request(&self, input: LlmInput, stream: bool) -> OllamaChatRequest {
        let model = input.model.unwrap_or_else(|| self.config.model.clone());
        let tools = input
            .tools
            .filter(|t| !t.is_empty())
            .map(|defs| defs.iter().map(OllamaTool::from).collect());

        OllamaChatRequest {
            model,
            messages: input.messages.iter().map(OllamaMessage::from).collect(),
            stream,
            options: Some(OllamaOptions {
                temperature: input.params.temperature,
                top_p: input.params.top_p,
                num_predict: input.params.max_tokens,
                stop: input.params.stop,
            }),
            tools,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout_secs)
        } else if e.is_connect() {
            LlmError::BackendUnavailable(format!("ollama at {}: {}", self.config.endpoint, e))
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl LlmRuntime for OllamaRuntime {
    fn backend_id(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.config.endpoint))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(&self, input: LlmInput) -> Result<LlmOutput, LlmError> {
        let request = self.build_request(input, false);
        tracing::debug!(model = %request.model, "Ollama: calling {}", self.chat_url());

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(LlmError::ModelNotFound(request.model));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Generation(format!(
                "Ollama error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Generation(format!("invalid Ollama response: {e}")))?;

        body.into_output()
    }

    async fn generate_stream(&self, input: LlmInput) -> Result<ChunkStream, LlmError> {
        let request = self.build_request(input, true);
        let url = self.chat_url();

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Generation(format!(
                "Ollama error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let (tx, rx) = mpsc::channel::<StreamChunk>(64);
        let model = request.model;

        tokio::spawn(async move {
            use futures::StreamExt as _;

            tracing::debug!(%model, "Ollama stream started");
            let mut byte_stream = response.bytes_stream();
            let mut decoder = NdjsonDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Network(e.to_string()))).await;
                        return;
                    }
                };

                for frame in decoder.push(&bytes) {
                    let failed = frame.error().is_some();
                    for item in frame.items() {
                        // Receiver dropped: the consumer stopped reading.
                        if tx.send(item).await.is_err() {
                            tracing::debug!("Ollama stream receiver closed, stopping");
                            return;
                        }
                    }
                    if failed || frame.done {
                        return;
                    }
                }
            }

            if let Some(frame) = decoder.finish() {
                for item in frame.items() {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Splits a byte stream into complete NDJSON frames.
#[derive(Debug, Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<OllamaStreamResponse> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = Self::decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left once the body ends without a trailing newline.
    fn finish(&mut self) -> Option<OllamaStreamResponse> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&rest)
    }

    fn decode_line(line: &[u8]) -> Option<OllamaStreamResponse> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let json = text
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(text);
        match serde_json::from_str::<OllamaStreamResponse>(json) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!("Skipping undecodable Ollama frame: {} ({})", json, e);
                None
            }
        }
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaTool>>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OllamaToolFunction,
}

#[derive(Debug, Serialize)]
struct OllamaToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDefinition> for OllamaTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: OllamaToolFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

/// Failure reported inside a 200 response body.
fn reported_error(error: Option<&str>) -> Option<LlmError> {
    error
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| LlmError::Generation(format!("Ollama error: {e}")))
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: OllamaResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaChatResponse {
    fn into_output(self) -> Result<LlmOutput, LlmError> {
        if let Some(err) = reported_error(self.error.as_deref()) {
            tracing::error!(error = %err, "Ollama reported a generation failure");
            return Err(err);
        }

        let finish_reason = match self.done_reason.as_deref() {
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };
        let thinking = Some(self.message.thinking).filter(|t| !t.trim().is_empty());
        let tool_calls = self
            .message
            .tool_calls
            .into_iter()
            .map(OllamaToolCall::into_native)
            .collect();

        Ok(LlmOutput {
            text: self.message.content,
            finish_reason,
            thinking,
            tool_calls,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaStreamResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    message: OllamaResponseMessage,
    /// Set on the frame Ollama sends when generation fails mid-stream.
    #[serde(default)]
    error: Option<String>,
}

impl OllamaStreamResponse {
    fn error(&self) -> Option<LlmError> {
        reported_error(self.error.as_deref())
    }

    /// What this frame sends downstream: its chunks, or the reported error.
    fn items(&self) -> Vec<StreamChunk> {
        match self.error() {
            Some(err) => {
                tracing::error!(error = %err, "Ollama stream failed");
                vec![Err(err)]
            }
            None => self.chunks().into_iter().map(Ok).collect(),
        }
    }

    /// Thinking first, then content, then any native tool calls.
    fn chunks(&self) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        if !self.message.thinking.is_empty() {
            out.push((self.message.thinking.clone(), true));
        }
        if !self.message.content.is_empty() {
            out.push((self.message.content.clone(), false));
        }
        if !self.message.tool_calls.is_empty() {
            let calls: Vec<Value> = self
                .message
                .tool_calls
                .iter()
                .map(|c| {
                    let native = c.clone().into_native();
                    serde_json::json!({ "name": native.name, "arguments": native.arguments })
                })
                .collect();
            tracing::info!("Ollama streamed {} native tool calls", calls.len());
            out.push((serde_json::json!({ "tool_calls": calls }).to_string(), false));
        }
        out
    }
}

#[derive(Debug, Deserialize, Default)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaToolCall {
    function: OllamaToolCallFunction,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OllamaToolCall {
    fn into_native(self) -> NativeToolCall {
        // Some models return arguments as a JSON-encoded string.
        let arguments = match self.function.arguments {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        };
        NativeToolCall {
            name: self.function.name,
            arguments,
        }
    }
}
