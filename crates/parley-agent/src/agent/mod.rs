//! The turn-level agent.
//!
//! [`Agent`] ties routing, interpretation and tool execution together:
//!
//! ```text
//! user text -> AgentRouter -> model call -> interpret / StreamingInterpreter
//!           -> ToolExecutionCoordinator -> explain call -> answer
//! ```
//!
//! Every turn computes its own decision and owns its own parser state; the
//! agent itself only holds shared read-only collaborators.

pub mod coordinator;
pub mod router;
pub mod types;

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use parley_core::capability::{CapabilityLookup, HeuristicCapabilityLookup};
use parley_core::llm::{ChunkStream, DynLlmRuntime, LlmError, LlmInput, LlmOutput};
use parley_core::memory::{ConversationMemory, InMemoryConversation};
use parley_core::message::Message;
use parley_core::tools::{ToolCatalog, ToolDefinition, ToolExecutor, ToolRegistry};

use crate::config::AgentConfig;
use crate::error::{invalid_input, Error, Result};
use crate::interpret::{
    interpret, InterpretOptions, InterpretedOutput, StreamDelta, StreamingInterpreter, ToolCall,
};
use crate::prompts::PromptBuilder;

pub use coordinator::{Resolution, ToolExecutionCoordinator};
pub use router::AgentRouter;
pub use types::{AgentDecision, AgentEvent, AgentMode, ToolResult, TurnOutcome};

use coordinator::join_reasoning;

/// Event stream of one streamed turn. Always ends with [`AgentEvent::End`].
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Turn-level agent over a model runtime and a tool set.
///
/// Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct Agent {
    llm: DynLlmRuntime,
    executor: Arc<dyn ToolExecutor>,
    catalog: Arc<dyn ToolCatalog>,
    capabilities: Arc<dyn CapabilityLookup>,
    memory: Arc<dyn ConversationMemory>,
    router: AgentRouter,
    config: AgentConfig,
    /// Turns true to cancel the turn in progress.
    interrupt: Option<watch::Receiver<bool>>,
}

impl Agent {
    /// Agent whose registry is both catalog and executor.
    pub fn new(llm: DynLlmRuntime, tools: Arc<ToolRegistry>) -> Self {
        let config = AgentConfig::default().with_model(llm.model_name());
        Self {
            router: AgentRouter::for_model(&config.model),
            executor: tools.clone(),
            catalog: tools,
            capabilities: Arc::new(HeuristicCapabilityLookup::new()),
            memory: Arc::new(InMemoryConversation::default()),
            llm,
            config,
            interrupt: None,
        }
    }

    /// Agent on a local Ollama runtime configured from `PARLEY_*` variables.
    #[cfg(feature = "ollama")]
    pub fn from_env(tools: Arc<ToolRegistry>) -> Result<Self> {
        use parley_llm::{OllamaConfig, OllamaRuntime};

        let config = AgentConfig::from_env();
        config.validate()?;
        let mut ollama = OllamaConfig::from_env();
        ollama.model = config.model.clone();
        let runtime = OllamaRuntime::new(ollama)?;
        Ok(Self::new(Arc::new(runtime), tools).with_config(config))
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilityLookup>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.router = AgentRouter::for_model(&config.model);
        self.config = config;
        self
    }

    /// Cancel the current turn when `interrupt` turns true.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<dyn ConversationMemory> {
        &self.memory
    }

    /// Routing decision for `text` under the current model and catalog.
    pub fn decide(&self, text: &str) -> AgentDecision {
        let tier = self.capabilities.tier(&self.config.model);
        self.router.decide(text, tier, &self.catalog.names())
    }

    /// Run one turn to completion.
    pub async fn run_turn(&self, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(invalid_input("empty user turn"));
        }

        let span = tracing::info_span!(
            "turn",
            id = %uuid::Uuid::new_v4(),
            model = %self.config.model
        );
        async move {
            let decision = self.decide(text);
            if decision.mode.uses_tools() {
                self.run_tool_turn(text, decision).await
            } else {
                let answer = self.direct(text, &decision).await?;
                self.memory.record(text, &answer.content);
                Ok(TurnOutcome {
                    answer: answer.content,
                    reasoning: answer.reasoning,
                    decision,
                    tool_results: Vec::new(),
                    fell_back: false,
                })
            }
        }
        .instrument(span)
        .await
    }

    /// Tool-mode turn with the retry/fallback cascade.
    pub async fn run_tool_turn(&self, text: &str, decision: AgentDecision) -> Result<TurnOutcome> {
        let tools = self.catalog.definitions();
        let input = self.tool_input(text, &decision, &tools);
        let output = self.llm.generate(input).await.map_err(model_error)?;

        let coordinator = self.coordinator();
        let thinking = output.thinking.clone().unwrap_or_default();
        let resolution = match native_resolution(&output) {
            Some(resolution) => resolution,
            None => coordinator.resolve(&output.text, &tools),
        };

        match resolution {
            Resolution::Calls(interpreted) => {
                let results = coordinator
                    .execute_all(&interpreted.tool_calls, self.interrupt.as_ref())
                    .await?;
                let explained = coordinator.explain(text, &results).await?;
                self.memory.record(text, &explained.content);
                let reasoning = join_reasoning(
                    &join_reasoning(&thinking, &interpreted.reasoning),
                    &explained.reasoning,
                );
                Ok(TurnOutcome {
                    answer: explained.content,
                    reasoning,
                    decision,
                    tool_results: results,
                    fell_back: false,
                })
            }
            Resolution::Answer(interpreted) => {
                self.memory.record(text, &interpreted.content);
                Ok(TurnOutcome {
                    answer: interpreted.content,
                    reasoning: join_reasoning(&thinking, &interpreted.reasoning),
                    decision,
                    tool_results: Vec::new(),
                    fell_back: false,
                })
            }
            Resolution::Fallback => {
                let answer = match self.direct(text, &AgentDecision::direct()).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        self.memory.record(text, "");
                        return Err(e);
                    }
                };
                self.memory.record(text, &answer.content);
                Ok(TurnOutcome {
                    answer: answer.content,
                    reasoning: answer.reasoning,
                    decision,
                    tool_results: Vec::new(),
                    fell_back: true,
                })
            }
        }
    }

    /// Run one turn, streaming events as they happen.
    ///
    /// Delivery is back-pressured by a bounded channel. Dropping the stream
    /// or firing the interrupt stops the turn.
    pub fn run_turn_stream(&self, text: &str) -> AgentEventStream {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Box::pin(async_stream::stream! {
                yield AgentEvent::error(invalid_input("empty user turn").to_string());
                yield AgentEvent::end();
            });
        }

        let (tx, rx) = mpsc::channel(self.config.stream_channel_capacity.max(1));
        let agent = self.clone();
        let span = tracing::info_span!(
            "turn_stream",
            id = %uuid::Uuid::new_v4(),
            model = %self.config.model
        );

        tokio::spawn(
            async move {
                let sink = EventSink::new(tx, agent.interrupt.clone());
                match agent.stream_turn(&text, &sink).await {
                    Ok(()) => {}
                    Err(Error::Cancelled(reason)) => {
                        tracing::info!(%reason, "Streamed turn stopped");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Streamed turn failed");
                        sink.send(AgentEvent::error(e.to_string())).await;
                    }
                }
                sink.finish().await;
            }
            .instrument(span),
        );

        Box::pin(ReceiverStream::new(rx))
    }

    async fn stream_turn(&self, text: &str, sink: &EventSink) -> Result<()> {
        let decision = self.decide(text);
        sink.emit(AgentEvent::decision(&decision)).await?;

        match decision.mode {
            AgentMode::Direct => {
                let content = self.stream_direct(text, &decision, sink).await?;
                self.memory.record(text, &content);
                Ok(())
            }
            AgentMode::NativeToolCalling => {
                let tools = self.catalog.definitions();
                let input = self.tool_input(text, &decision, &tools);
                let output = self.llm.generate(input).await.map_err(model_error)?;
                if let Some(thinking) = output.thinking.as_deref().filter(|t| !t.trim().is_empty()) {
                    sink.emit(AgentEvent::thinking(thinking)).await?;
                }

                let resolution = match native_resolution(&output) {
                    Some(resolution) => resolution,
                    None => self.coordinator().resolve(&output.text, &tools),
                };
                if let Resolution::Calls(interpreted) | Resolution::Answer(interpreted) = &resolution {
                    if interpreted.has_reasoning {
                        sink.emit(AgentEvent::thinking(&interpreted.reasoning)).await?;
                    }
                    if !interpreted.content.is_empty() {
                        sink.emit(AgentEvent::content(&interpreted.content)).await?;
                    }
                }
                self.stream_resolution(text, resolution, sink).await
            }
            AgentMode::ConversationalToolCalling => {
                let tools = self.catalog.definitions();
                let input = self.tool_input(text, &decision, &tools);
                let stream = self
                    .llm
                    .generate_stream(input.with_streaming(true))
                    .await
                    .map_err(model_error)?;

                let options = InterpretOptions::with_tools(tools);
                let streamed = self.consume_stream(stream, options.clone(), sink).await?;
                let resolution = self.coordinator().resolve_output(
                    streamed.interpreter.state().raw_buffer(),
                    streamed.output.clone(),
                    &options,
                );
                if let Resolution::Answer(_) = resolution {
                    streamed.flush(sink).await?;
                }
                self.stream_resolution(text, resolution, sink).await
            }
        }
    }

    /// Act on a resolved tool-mode output whose own text was already shown.
    async fn stream_resolution(
        &self,
        text: &str,
        resolution: Resolution,
        sink: &EventSink,
    ) -> Result<()> {
        match resolution {
            Resolution::Calls(interpreted) => {
                let coordinator = self.coordinator();
                let results = coordinator
                    .execute_all_with(&interpreted.tool_calls, self.interrupt.as_ref(), |event| {
                        sink.send(event)
                    })
                    .await?;

                let stream = coordinator.explain_stream(text, &results).await?;
                let streamed = self
                    .consume_stream(stream, InterpretOptions::default(), sink)
                    .await?;
                streamed.flush(sink).await?;
                self.memory.record(text, &streamed.output.content);
                Ok(())
            }
            Resolution::Answer(interpreted) => {
                self.memory.record(text, &interpreted.content);
                Ok(())
            }
            Resolution::Fallback => {
                match self.stream_direct(text, &AgentDecision::direct(), sink).await {
                    Ok(content) => {
                        self.memory.record(text, &content);
                        Ok(())
                    }
                    Err(e) => {
                        self.memory.record(text, "");
                        Err(e)
                    }
                }
            }
        }
    }

    async fn stream_direct(
        &self,
        text: &str,
        decision: &AgentDecision,
        sink: &EventSink,
    ) -> Result<String> {
        let input = self.direct_input(text, decision).with_streaming(true);
        let stream = self.llm.generate_stream(input).await.map_err(model_error)?;
        let streamed = self
            .consume_stream(stream, InterpretOptions::default(), sink)
            .await?;
        streamed.flush(sink).await?;
        Ok(streamed.output.content)
    }

    /// Feed a model stream through a fresh interpreter, forwarding deltas.
    async fn consume_stream(
        &self,
        mut stream: ChunkStream,
        options: InterpretOptions,
        sink: &EventSink,
    ) -> Result<Streamed> {
        let mut interpreter = StreamingInterpreter::with_options(options)
            .with_preview_chars(self.config.result_preview_chars);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = sink.cancelled() => {
                    return Err(Error::Cancelled("turn cancelled while streaming".into()));
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };

            let (text, is_thinking) = chunk.map_err(model_error)?;
            if is_thinking {
                if !text.is_empty() {
                    sink.emit(AgentEvent::thinking(text)).await?;
                }
                continue;
            }
            forward_delta(interpreter.feed(&text), sink).await?;
        }

        let output = interpreter.finalize();
        Ok(Streamed {
            interpreter,
            output,
        })
    }

    async fn direct(&self, text: &str, decision: &AgentDecision) -> Result<InterpretedOutput> {
        let input = self.direct_input(text, decision);
        let output = self.llm.generate(input).await.map_err(model_error)?;
        let mut answer = interpret(&output.text);
        if let Some(thinking) = output.thinking.as_deref() {
            answer.reasoning = join_reasoning(thinking, &answer.reasoning);
            answer.has_reasoning = !answer.reasoning.is_empty();
        }
        Ok(answer)
    }

    fn direct_input(&self, text: &str, decision: &AgentDecision) -> LlmInput {
        let mut messages = Vec::new();
        if decision.tools_for_reference {
            let reference = PromptBuilder::new(self.catalog.definitions()).tool_reference();
            if !reference.is_empty() {
                messages.push(Message::system(reference));
            }
        }
        messages.extend(self.memory.recent_messages());
        messages.push(Message::user(text));

        LlmInput::new(messages)
            .with_model(&self.config.model)
            .with_temperature(self.config.temperature)
    }

    fn tool_input(&self, text: &str, decision: &AgentDecision, tools: &[ToolDefinition]) -> LlmInput {
        let mut messages = Vec::new();
        if decision.mode == AgentMode::ConversationalToolCalling {
            let context = PromptBuilder::new(tools.to_vec()).tool_context();
            if !context.is_empty() {
                messages.push(Message::system(context));
            }
        }
        messages.extend(self.memory.recent_messages());
        messages.push(Message::user(text));

        let input = LlmInput::new(messages)
            .with_model(&self.config.model)
            .with_temperature(self.config.temperature);
        if decision.mode == AgentMode::NativeToolCalling {
            input.with_tools(tools.to_vec())
        } else {
            input
        }
    }

    fn coordinator(&self) -> ToolExecutionCoordinator {
        ToolExecutionCoordinator::new(self.executor.clone(), self.llm.clone(), self.config.clone())
    }
}

/// Structured calls returned by the runtime, if any.
fn native_resolution(output: &LlmOutput) -> Option<Resolution> {
    if output.tool_calls.is_empty() {
        return None;
    }
    let mut interpreted = interpret(&output.text);
    interpreted.tool_calls = output.tool_calls.iter().map(ToolCall::from).collect();
    Some(Resolution::Calls(interpreted))
}

fn model_error(err: LlmError) -> Error {
    tracing::error!(error = %err, "Model invocation failed");
    Error::from(err)
}

async fn forward_delta(delta: StreamDelta, sink: &EventSink) -> Result<()> {
    if let Some(reasoning) = delta.reasoning {
        sink.emit(AgentEvent::thinking(reasoning)).await?;
    }
    for usage in delta.tool_usage {
        sink.emit(AgentEvent::tool_usage(usage)).await?;
    }
    if let Some(display) = delta.display {
        sink.emit(AgentEvent::content(display)).await?;
    }
    Ok(())
}

/// A fully consumed model stream.
struct Streamed {
    interpreter: StreamingInterpreter,
    output: InterpretedOutput,
}

impl Streamed {
    /// Send final content that partial updates never showed.
    async fn flush(&self, sink: &EventSink) -> Result<()> {
        if let Some(rest) = self.interpreter.undisplayed(&self.output) {
            sink.emit(AgentEvent::content(rest)).await?;
        }
        Ok(())
    }
}

/// Bounded, cancellable event delivery for one streamed turn.
struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    cancel: Option<watch::Receiver<bool>>,
}

impl EventSink {
    fn new(tx: mpsc::Sender<AgentEvent>, cancel: Option<watch::Receiver<bool>>) -> Self {
        Self { tx, cancel }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once the turn is cancelled; never without a signal.
    async fn cancelled(&self) {
        let Some(rx) = &self.cancel else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone, the signal can never fire.
                return std::future::pending().await;
            }
        }
    }

    /// Deliver `event`. `false` when cancelled or the receiver is gone.
    async fn send(&self, event: AgentEvent) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    async fn emit(&self, event: AgentEvent) -> Result<()> {
        if self.send(event).await {
            Ok(())
        } else {
            Err(Error::Cancelled("event receiver closed or turn cancelled".into()))
        }
    }

    /// Close the stream with `End`, without waiting on a cancelled consumer.
    async fn finish(&self) {
        if self.is_cancelled() {
            let _ = self.tx.try_send(AgentEvent::end());
        } else {
            let _ = self.tx.send(AgentEvent::end()).await;
        }
    }
}
