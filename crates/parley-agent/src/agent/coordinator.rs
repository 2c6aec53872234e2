//! Tool execution and the explain follow-up.
//!
//! Calls run strictly in order. A failing tool becomes an inline error
//! string for the follow-up prompt; it never ends the turn.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use parley_core::llm::{ChunkStream, DynLlmRuntime, LlmInput};
use parley_core::message::Message;
use parley_core::tools::{not_found_message, ToolDefinition, ToolExecutor};

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::interpret::{
    check_tool_output, interpret, interpret_with, is_reasoning_interference, preview,
    InterpretOptions, InterpretedOutput, ToolCall,
};
use crate::prompts::PromptBuilder;

use super::types::{AgentEvent, ToolResult};

/// How a tool-mode model output should be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Tool calls were found; execute them.
    Calls(InterpretedOutput),
    /// No tool was requested; the content is the answer.
    Answer(InterpretedOutput),
    /// Nothing usable even after the retry; ask again without tools.
    Fallback,
}

/// Executes tool calls and asks the model to explain the results.
#[derive(Clone)]
pub struct ToolExecutionCoordinator {
    executor: Arc<dyn ToolExecutor>,
    llm: DynLlmRuntime,
    config: AgentConfig,
}

impl ToolExecutionCoordinator {
    pub fn new(executor: Arc<dyn ToolExecutor>, llm: DynLlmRuntime, config: AgentConfig) -> Self {
        Self {
            executor,
            llm,
            config,
        }
    }

    /// Interpret a tool-mode output, retrying once with reasoning stripped.
    pub fn resolve(&self, raw: &str, tools: &[ToolDefinition]) -> Resolution {
        let options = InterpretOptions::with_tools(tools.to_vec());
        let first = interpret_with(raw, &options);
        self.resolve_output(raw, first, &options)
    }

    /// Like [`resolve`](Self::resolve) for an output that was already
    /// interpreted once, e.g. by a streaming interpreter.
    pub fn resolve_output(
        &self,
        raw: &str,
        first: InterpretedOutput,
        options: &InterpretOptions,
    ) -> Resolution {
        match check_tool_output(&first) {
            Ok(()) if first.has_tool_calls() => Resolution::Calls(first),
            Ok(()) if first.content.trim().is_empty() => {
                tracing::warn!("Tool-mode output had neither calls nor content, falling back");
                Resolution::Fallback
            }
            Ok(()) => Resolution::Answer(first),
            Err(err) if is_reasoning_interference(&err) => {
                tracing::debug!(error = %err, "Retrying interpretation with reasoning stripped");
                let retry = interpret_with(raw, &options.clone().aggressive());
                if retry.has_tool_calls() {
                    Resolution::Calls(retry)
                } else {
                    tracing::warn!("Retry found no tool calls, falling back to a direct answer");
                    Resolution::Fallback
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "Uninterpretable output kept as content");
                Resolution::Answer(first)
            }
        }
    }

    /// Run one call under the configured timeout.
    pub async fn execute_one(&self, call: &ToolCall) -> ToolResult {
        tracing::info!(
            tool = %call.name,
            argument = %preview(&call.display_argument, 80),
            "Executing tool"
        );

        let execution = tokio::time::timeout(
            self.config.tool_timeout(),
            self.executor.execute(&call.name, call.arguments.clone()),
        )
        .await;

        let (output, success) = match execution {
            Ok(execution) if execution.success => (execution.result, true),
            Ok(execution) => {
                let error = execution
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or(execution.result);
                if error == not_found_message(&call.name) {
                    (error, false)
                } else {
                    (format!("Error executing {}: {}", call.name, error), false)
                }
            }
            Err(_) => (
                format!(
                    "Error executing {}: timed out after {}s",
                    call.name, self.config.tool_timeout_secs
                ),
                false,
            ),
        };

        if !success {
            tracing::warn!(tool = %call.name, error = %output, "Tool execution failed");
        }

        ToolResult {
            call: call.clone(),
            output,
            success,
        }
    }

    /// Run every call in order.
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<ToolResult>> {
        self.execute_all_with(calls, cancel, |_| async { true }).await
    }

    /// Run every call in order, reporting start and end events.
    ///
    /// Calls not yet started when `cancel` turns true are skipped; a call in
    /// flight finishes but its result is discarded. `on_event` returning
    /// `false` means nobody is listening and is treated as cancellation.
    pub async fn execute_all_with<F, Fut>(
        &self,
        calls: &[ToolCall],
        cancel: Option<&watch::Receiver<bool>>,
        mut on_event: F,
    ) -> Result<Vec<ToolResult>>
    where
        F: FnMut(AgentEvent) -> Fut,
        Fut: Future<Output = bool>,
    {
        let limit = self.config.max_tool_calls;
        if calls.len() > limit {
            tracing::warn!(
                requested = calls.len(),
                limit,
                "Dropping tool calls beyond the per-turn limit"
            );
        }

        let cancelled = || cancel.map(|rx| *rx.borrow()).unwrap_or(false);
        let mut results = Vec::with_capacity(calls.len().min(limit));

        for call in calls.iter().take(limit) {
            if cancelled() {
                return Err(Error::Cancelled("turn cancelled before tool execution".into()));
            }

            let arguments = serde_json::Value::Object(call.arguments.clone());
            if !on_event(AgentEvent::tool_call_start(&call.name, arguments)).await {
                return Err(Error::Cancelled("event receiver closed".into()));
            }

            let result = self.execute_one(call).await;

            if cancelled() {
                tracing::info!(tool = %call.name, "Discarding result of cancelled turn");
                return Err(Error::Cancelled("turn cancelled during tool execution".into()));
            }

            let end = AgentEvent::tool_call_end(
                &call.name,
                preview(&result.output, self.config.result_preview_chars),
                result.success,
            );
            results.push(result);
            if !on_event(end).await {
                return Err(Error::Cancelled("event receiver closed".into()));
            }
        }

        Ok(results)
    }

    /// Input of the single explain call.
    pub fn explain_input(&self, question: &str, results: &[ToolResult]) -> LlmInput {
        LlmInput::new(vec![
            Message::user(question),
            Message::system(PromptBuilder::follow_up(question, results)),
        ])
        .with_model(&self.config.model)
        .with_temperature(self.config.temperature)
    }

    /// Ask the model to explain the tool results.
    pub async fn explain(&self, question: &str, results: &[ToolResult]) -> Result<InterpretedOutput> {
        let input = self.explain_input(question, results);
        let output = self.llm.generate(input).await.map_err(|e| {
            tracing::error!(error = %e, "Explain call failed");
            Error::from(e)
        })?;

        let mut explained = interpret(&output.text);
        if let Some(thinking) = output.thinking.filter(|t| !t.trim().is_empty()) {
            explained.reasoning = join_reasoning(&thinking, &explained.reasoning);
            explained.has_reasoning = true;
        }
        Ok(explained)
    }

    /// Streaming variant of [`explain`](Self::explain).
    pub async fn explain_stream(&self, question: &str, results: &[ToolResult]) -> Result<ChunkStream> {
        let input = self.explain_input(question, results).with_streaming(true);
        self.llm.generate_stream(input).await.map_err(|e| {
            tracing::error!(error = %e, "Explain stream failed");
            Error::from(e)
        })
    }
}

/// Out-of-band reasoning first, then reasoning found in the text.
pub(crate) fn join_reasoning(out_of_band: &str, inline: &str) -> String {
    match (out_of_band.trim(), inline.trim()) {
        (a, "") => a.to_string(),
        ("", b) => b.to_string(),
        (a, b) => format!("{a}\n\n{b}"),
    }
}
