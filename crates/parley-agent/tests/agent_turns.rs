//! End-to-end turns against a scripted model runtime.
//!
//! No network: every model reply is scripted up front and every request
//! the agent makes is recorded for inspection.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

use parley_agent::{Agent, AgentConfig, AgentEvent, AgentMode, Error};
use parley_core::capability::{FixedCapability, ToolCompatibility};
use parley_core::llm::{
    ChunkStream, LlmError, LlmInput, LlmOutput, LlmRuntime, NativeToolCall, StreamChunk,
};
use parley_core::memory::InMemoryConversation;
use parley_core::message::MessageRole;
use parley_core::tools::{object_schema, string_property, Tool, ToolOutput, ToolRegistry};

// ============================================================================
// Test doubles
// ============================================================================

enum Script {
    Chunks(Vec<StreamChunk>),
    /// Chunks, then a stream that never ends.
    Hang(Vec<StreamChunk>),
}

struct ScriptedLlm {
    model: String,
    replies: Mutex<VecDeque<Result<LlmOutput, LlmError>>>,
    streams: Mutex<VecDeque<Script>>,
    inputs: Mutex<Vec<LlmInput>>,
}

impl ScriptedLlm {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            replies: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    fn reply(self, text: &str) -> Self {
        self.replies.lock().push_back(Ok(LlmOutput::text(text)));
        self
    }

    fn reply_output(self, output: LlmOutput) -> Self {
        self.replies.lock().push_back(Ok(output));
        self
    }

    fn fail(self, err: LlmError) -> Self {
        self.replies.lock().push_back(Err(err));
        self
    }

    fn stream(self, chunks: &[&str]) -> Self {
        let chunks = chunks.iter().map(|c| Ok((c.to_string(), false))).collect();
        self.streams.lock().push_back(Script::Chunks(chunks));
        self
    }

    fn stream_chunks(self, chunks: Vec<StreamChunk>) -> Self {
        self.streams.lock().push_back(Script::Chunks(chunks));
        self
    }

    fn stream_then_hang(self, chunks: &[&str]) -> Self {
        let chunks = chunks.iter().map(|c| Ok((c.to_string(), false))).collect();
        self.streams.lock().push_back(Script::Hang(chunks));
        self
    }

    fn inputs(&self) -> Vec<LlmInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl LlmRuntime for ScriptedLlm {
    fn backend_id(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, input: LlmInput) -> Result<LlmOutput, LlmError> {
        self.inputs.lock().push(input);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Generation("no scripted reply".into())))
    }

    async fn generate_stream(&self, input: LlmInput) -> Result<ChunkStream, LlmError> {
        self.inputs.lock().push(input);
        match self.streams.lock().pop_front() {
            Some(Script::Chunks(chunks)) => Ok(Box::pin(futures::stream::iter(chunks))),
            Some(Script::Hang(chunks)) => Ok(Box::pin(
                futures::stream::iter(chunks).chain(futures::stream::pending()),
            )),
            None => Err(LlmError::Generation("no scripted stream".into())),
        }
    }
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Repeat the given text"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "text": string_property("Text to repeat") }),
            vec!["text".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> parley_core::tools::Result<ToolOutput> {
        let text = args["text"].as_str().unwrap_or_default().to_string();
        Ok(ToolOutput::success(text))
    }
}

fn registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new().with_tool(Arc::new(EchoTool)))
}

struct Harness {
    llm: Arc<ScriptedLlm>,
    memory: Arc<InMemoryConversation>,
    agent: Agent,
}

fn harness(llm: ScriptedLlm, tier: ToolCompatibility) -> Harness {
    parley_core::logging::init_test_tracing();
    let llm = Arc::new(llm);
    let memory = Arc::new(InMemoryConversation::default());
    let agent = Agent::new(llm.clone(), registry())
        .with_capabilities(Arc::new(FixedCapability(tier)))
        .with_memory(memory.clone());
    Harness { llm, memory, agent }
}

async fn collect(agent: &Agent, text: &str) -> Vec<AgentEvent> {
    agent.run_turn_stream(text).collect().await
}

fn content_of(events: &[AgentEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn assert_single_end_last(events: &[AgentEvent]) {
    assert!(events.last().map(AgentEvent::is_end).unwrap_or(false), "{events:?}");
    assert_eq!(events.iter().filter(|e| e.is_end()).count(), 1, "{events:?}");
}

// ============================================================================
// Non-streaming turns
// ============================================================================

#[tokio::test]
async fn test_direct_turn_strips_reasoning() {
    let h = harness(
        ScriptedLlm::new("mistral:7b").reply("<think>keep it short</think>Why did the crab never share? It was shellfish."),
        ToolCompatibility::Partial,
    );

    let outcome = h.agent.run_turn("tell me a joke").await.unwrap();

    assert_eq!(outcome.decision.mode, AgentMode::Direct);
    assert_eq!(outcome.answer, "Why did the crab never share? It was shellfish.");
    assert_eq!(outcome.reasoning, "keep it short");
    assert!(outcome.tool_results.is_empty());
    assert!(!outcome.fell_back);

    let exchanges = h.memory.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].input, "tell me a joke");

    let inputs = h.llm.inputs();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].tools.is_none());
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let h = harness(ScriptedLlm::new("mistral:7b"), ToolCompatibility::Partial);
    let err = h.agent.run_turn("   ").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(h.llm.inputs().is_empty());
}

#[tokio::test]
async fn test_conversational_json_call_is_executed_and_explained() {
    let h = harness(
        ScriptedLlm::new("mistral:7b")
            .reply(r#"{"name": "echo", "arguments": {"text": "hi"}}"#)
            .reply("The tool said hi."),
        ToolCompatibility::Partial,
    );

    let outcome = h.agent.run_turn("list files please").await.unwrap();

    assert_eq!(outcome.decision.mode, AgentMode::ConversationalToolCalling);
    assert!(outcome.decision.needs_tools);
    assert_eq!(outcome.tool_results.len(), 1);
    assert_eq!(outcome.tool_results[0].call.name, "echo");
    assert_eq!(outcome.tool_results[0].output, "hi");
    assert!(outcome.tool_results[0].success);
    assert_eq!(outcome.answer, "The tool said hi.");

    let inputs = h.llm.inputs();
    assert_eq!(inputs.len(), 2);
    // Tools are described in a system prompt, not passed as schemas.
    assert_eq!(inputs[0].messages[0].role, MessageRole::System);
    assert!(inputs[0].messages[0].content.contains("echo"));
    assert!(inputs[0].tools.is_none());
    // Explain call: the question, then the tool outputs.
    assert_eq!(inputs[1].messages[0].content, "list files please");
    assert!(inputs[1].messages[1].content.contains("hi"));

    assert_eq!(h.memory.exchanges()[0].output, "The tool said hi.");
}

#[tokio::test]
async fn test_native_calls_skip_text_parsing() {
    let output = LlmOutput {
        tool_calls: vec![NativeToolCall {
            name: "echo".to_string(),
            arguments: json!({"text": "native"}),
        }],
        ..LlmOutput::text("")
    };
    let h = harness(
        ScriptedLlm::new("qwen2.5:7b")
            .reply_output(output)
            .reply("It echoed native."),
        ToolCompatibility::Excellent,
    );

    let outcome = h.agent.run_turn("run command echo native").await.unwrap();

    assert_eq!(outcome.decision.mode, AgentMode::NativeToolCalling);
    assert_eq!(outcome.tool_results[0].output, "native");
    assert_eq!(outcome.answer, "It echoed native.");

    let inputs = h.llm.inputs();
    let tools = inputs[0].tools.as_ref().expect("schemas sent");
    assert_eq!(tools[0].name, "echo");
}

#[tokio::test]
async fn test_missing_tool_becomes_inline_error() {
    let h = harness(
        ScriptedLlm::new("mistral:7b")
            .reply(r#"{"name": "ghost", "arguments": {}}"#)
            .reply("That tool does not exist."),
        ToolCompatibility::Partial,
    );

    let outcome = h.agent.run_turn("list files please").await.unwrap();

    assert_eq!(outcome.tool_results.len(), 1);
    assert_eq!(outcome.tool_results[0].output, "tool ghost not found");
    assert!(!outcome.tool_results[0].success);
    assert_eq!(outcome.answer, "That tool does not exist.");
    assert!(h.llm.inputs()[1].messages[1].content.contains("tool ghost not found"));
}

#[tokio::test]
async fn test_plain_tool_mode_answer_is_kept() {
    let h = harness(
        ScriptedLlm::new("mistral:7b").reply("There are no files to list."),
        ToolCompatibility::Partial,
    );

    let outcome = h.agent.run_turn("list files please").await.unwrap();
    assert_eq!(outcome.answer, "There are no files to list.");
    assert!(outcome.tool_results.is_empty());
    assert!(!outcome.fell_back);
    assert_eq!(h.llm.inputs().len(), 1);
}

#[tokio::test]
async fn test_unresolved_reasoning_falls_back_to_direct() {
    let h = harness(
        ScriptedLlm::new("mistral:7b")
            .reply("<think>hmm, maybe")
            .reply("Here is a direct answer."),
        ToolCompatibility::Partial,
    );

    let outcome = h.agent.run_turn("list files please").await.unwrap();

    assert!(outcome.fell_back);
    assert_eq!(outcome.answer, "Here is a direct answer.");
    assert_eq!(outcome.decision.mode, AgentMode::ConversationalToolCalling);

    // The fallback call carries no tool prompt.
    let inputs = h.llm.inputs();
    assert_eq!(inputs.len(), 2);
    assert!(inputs[1].messages.iter().all(|m| m.role != MessageRole::System));
    assert_eq!(h.memory.exchanges()[0].output, "Here is a direct answer.");
}

#[tokio::test]
async fn test_failed_fallback_records_empty_answer() {
    let h = harness(
        ScriptedLlm::new("mistral:7b")
            .reply("<think>hmm, maybe")
            .fail(LlmError::Network("connection refused".into())),
        ToolCompatibility::Partial,
    );

    let err = h.agent.run_turn("list files please").await.unwrap_err();
    assert!(matches!(err, Error::Llm(_)));

    let exchanges = h.memory.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].output, "");
}

#[tokio::test]
async fn test_model_error_propagates() {
    let h = harness(
        ScriptedLlm::new("mistral:7b").fail(LlmError::Timeout(30)),
        ToolCompatibility::Partial,
    );

    let err = h.agent.run_turn("tell me a joke").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(h.memory.exchanges().is_empty());
}

#[tokio::test]
async fn test_no_tier_mentions_tools_without_running_them() {
    let h = harness(
        ScriptedLlm::new("phi3:mini").reply("You could use the echo tool for that."),
        ToolCompatibility::None,
    );

    let outcome = h.agent.run_turn("list files please").await.unwrap();

    assert_eq!(outcome.decision.mode, AgentMode::Direct);
    assert!(!outcome.decision.needs_tools);
    assert!(outcome.decision.tools_for_reference);
    assert!(outcome.tool_results.is_empty());

    let inputs = h.llm.inputs();
    assert_eq!(inputs[0].messages[0].role, MessageRole::System);
    assert!(inputs[0].messages[0].content.contains("echo"));
}

#[tokio::test]
async fn test_history_is_replayed_on_next_turn() {
    let h = harness(
        ScriptedLlm::new("mistral:7b")
            .reply("Hello Ada.")
            .reply("Your name is Ada."),
        ToolCompatibility::Partial,
    );

    h.agent.run_turn("hi, I am Ada").await.unwrap();
    h.agent.run_turn("what's my name").await.unwrap();

    let second = &h.llm.inputs()[1];
    let contents: Vec<_> = second.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hi, I am Ada", "Hello Ada.", "what's my name"]);
}

#[tokio::test]
async fn test_tool_call_limit() {
    let calls = r#"{"tool_calls": [
        {"name": "echo", "arguments": {"text": "1"}},
        {"name": "echo", "arguments": {"text": "2"}},
        {"name": "echo", "arguments": {"text": "3"}}
    ]}"#;
    let h = harness(
        ScriptedLlm::new("mistral:7b").reply(calls).reply("Done."),
        ToolCompatibility::Partial,
    );
    let agent = h
        .agent
        .clone()
        .with_config(AgentConfig::default().with_model("mistral:7b").with_max_tool_calls(2));

    let outcome = agent.run_turn("list files please").await.unwrap();
    let outputs: Vec<_> = outcome.tool_results.iter().map(|r| r.output.as_str()).collect();
    assert_eq!(outputs, vec!["1", "2"]);
}

// ============================================================================
// Streaming turns
// ============================================================================

#[tokio::test]
async fn test_stream_reasoning_split_across_chunks() {
    let h = harness(
        ScriptedLlm::new("mistral:7b").stream(&["<think>a", "b</think>answer"]),
        ToolCompatibility::Partial,
    );

    let events = collect(&h.agent, "tell me a joke").await;

    assert_eq!(
        events,
        vec![
            AgentEvent::Decision {
                mode: AgentMode::Direct,
                needs_tools: false,
            },
            AgentEvent::thinking("ab"),
            AgentEvent::content("answer"),
            AgentEvent::end(),
        ]
    );
    assert_eq!(h.memory.exchanges()[0].output, "answer");
}

#[tokio::test]
async fn test_stream_out_of_band_thinking() {
    let h = harness(
        ScriptedLlm::new("mistral:7b").stream_chunks(vec![
            Ok(("planning".to_string(), true)),
            Ok(("Hi ".to_string(), false)),
            Ok(("there".to_string(), false)),
        ]),
        ToolCompatibility::Partial,
    );

    let events = collect(&h.agent, "say hello").await;

    assert_eq!(events[1], AgentEvent::thinking("planning"));
    assert_eq!(content_of(&events), "Hi there");
    assert_single_end_last(&events);
}

#[tokio::test]
async fn test_stream_tool_turn_event_order() {
    let h = harness(
        ScriptedLlm::new("mistral:7b")
            .stream(&[r#"{"name": "echo", "#, r#""arguments": {"text": "hi"}}"#])
            .stream(&["It said ", "hi."]),
        ToolCompatibility::Partial,
    );

    let events = collect(&h.agent, "list files please").await;

    assert!(matches!(
        events[0],
        AgentEvent::Decision {
            mode: AgentMode::ConversationalToolCalling,
            needs_tools: true,
        }
    ));
    let start = events
        .iter()
        .position(|e| matches!(e, AgentEvent::ToolCallStart { .. }))
        .expect("tool start");
    let end = events
        .iter()
        .position(|e| matches!(e, AgentEvent::ToolCallEnd { .. }))
        .expect("tool end");
    assert!(start < end);
    assert_eq!(
        events[start],
        AgentEvent::tool_call_start("echo", json!({"text": "hi"}))
    );
    assert_eq!(events[end], AgentEvent::tool_call_end("echo", "hi", true));

    // The call JSON is never shown; only the explanation is.
    assert_eq!(content_of(&events), "It said hi.");
    assert!(events[..start]
        .iter()
        .all(|e| !matches!(e, AgentEvent::Content { .. })));
    assert_single_end_last(&events);
    assert_eq!(h.memory.exchanges()[0].output, "It said hi.");
}

#[tokio::test]
async fn test_stream_native_turn() {
    let output = LlmOutput {
        tool_calls: vec![NativeToolCall {
            name: "echo".to_string(),
            arguments: json!({"text": "n"}),
        }],
        ..LlmOutput::text("")
    };
    let h = harness(
        ScriptedLlm::new("qwen2.5:7b")
            .reply_output(output)
            .stream(&["Echoed n."]),
        ToolCompatibility::Excellent,
    );

    let events = collect(&h.agent, "run command echo n").await;

    assert!(events.contains(&AgentEvent::tool_call_end("echo", "n", true)));
    assert_eq!(content_of(&events), "Echoed n.");
    assert_single_end_last(&events);
}

#[tokio::test]
async fn test_stream_fallback() {
    let h = harness(
        ScriptedLlm::new("mistral:7b")
            .stream(&["<think>hmm, ", "maybe"])
            .stream(&["Direct ", "answer."]),
        ToolCompatibility::Partial,
    );

    let events = collect(&h.agent, "list files please").await;

    assert_eq!(content_of(&events), "Direct answer.");
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolCallStart { .. })));
    assert_single_end_last(&events);
}

#[tokio::test]
async fn test_stream_model_error_then_end() {
    let h = harness(ScriptedLlm::new("mistral:7b"), ToolCompatibility::Partial);

    let events = collect(&h.agent, "tell me a joke").await;

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], AgentEvent::Decision { .. }));
    assert!(matches!(&events[1], AgentEvent::Error { message } if message.contains("no scripted stream")));
    assert!(events[2].is_end());
}

#[tokio::test]
async fn test_stream_empty_input() {
    let h = harness(ScriptedLlm::new("mistral:7b"), ToolCompatibility::Partial);
    let events = collect(&h.agent, "").await;
    assert!(matches!(events[0], AgentEvent::Error { .. }));
    assert!(events[1].is_end());
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_stream_cancellation_ends_without_error() {
    let (tx, rx) = watch::channel(false);
    let h = harness(
        ScriptedLlm::new("mistral:7b").stream_then_hang(&["partial "]),
        ToolCompatibility::Partial,
    );
    let agent = h.agent.clone().with_interrupt(rx);

    let mut stream = agent.run_turn_stream("tell me a joke");
    assert!(matches!(stream.next().await, Some(AgentEvent::Decision { .. })));
    assert_eq!(stream.next().await, Some(AgentEvent::content("partial ")));

    tx.send(true).unwrap();
    let rest: Vec<_> = stream.collect().await;

    assert_eq!(rest, vec![AgentEvent::end()]);
    assert!(h.memory.exchanges().is_empty());
}

#[tokio::test]
async fn test_stream_small_channel_delivers_everything() {
    let h = harness(
        ScriptedLlm::new("mistral:7b").stream(&["a", "b", "c", "d", "e", "f"]),
        ToolCompatibility::Partial,
    );
    let agent = h
        .agent
        .clone()
        .with_config(AgentConfig::default().with_model("mistral:7b").with_stream_channel_capacity(1));

    let events = collect(&agent, "say letters").await;
    assert_eq!(content_of(&events), "abcdef");
    assert_single_end_last(&events);
}

#[tokio::test]
async fn test_concurrent_turns_are_independent() {
    let first = harness(
        ScriptedLlm::new("mistral:7b").stream(&["<think>x", "</think>one"]),
        ToolCompatibility::Partial,
    );
    let second = harness(
        ScriptedLlm::new("mistral:7b").stream(&["two"]),
        ToolCompatibility::Partial,
    );

    let (a, b) = tokio::join!(
        collect(&first.agent, "say one"),
        collect(&second.agent, "say two")
    );

    assert_eq!(content_of(&a), "one");
    assert_eq!(content_of(&b), "two");
    assert!(!b.iter().any(|e| matches!(e, AgentEvent::Thinking { .. })));
}
