//! Incremental interpretation of a streamed response.
//!
//! Content outside reasoning blocks is forwarded as soon as it arrives.
//! Reasoning is held until its block closes and is then emitted whole.
//! Agent-format lines are never displayed raw; completed `Action:` /
//! `Action Input:` / `Observation:` lines become short tool-usage updates.
//!
//! Partial updates are best-effort feedback. [`StreamingInterpreter::finalize`]
//! re-interprets the whole buffer and its result is authoritative.

use serde::Serialize;

use super::thinking::{self, Delimiters};
use super::{interpret_with, preview, InterpretOptions, InterpretedOutput};

const LINE_MARKERS: [&str; 5] = ["Thought:", "Action Input:", "Action:", "Observation:", "AI:"];

/// Default length of an observation shown in a tool-usage update.
pub const RESULT_PREVIEW_CHARS: usize = 100;

/// What one chunk made displayable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamDelta {
    /// New user-facing content.
    pub display: Option<String>,
    /// Newly completed reasoning.
    pub reasoning: Option<String>,
    /// Tool-usage progress lines, in the order they were seen.
    pub tool_usage: Vec<String>,
    /// An `AI:` final-answer line has been seen.
    pub complete: bool,
}

impl StreamDelta {
    pub fn is_empty(&self) -> bool {
        self.display.is_none() && self.reasoning.is_none() && self.tool_usage.is_empty()
    }

    fn push_display(&mut self, text: &str) {
        if !text.is_empty() {
            self.display.get_or_insert_with(String::new).push_str(text);
        }
    }

    fn push_reasoning(&mut self, text: &str) {
        let reasoning = self.reasoning.get_or_insert_with(String::new);
        if !reasoning.is_empty() {
            reasoning.push_str("\n\n");
        }
        reasoning.push_str(text);
    }
}

/// Per-stream parser state. Owned by exactly one interpreter.
#[derive(Debug, Clone, Default)]
pub struct StreamingParserState {
    raw_buffer: String,
    reasoning_buffer: String,
    content_buffer: String,
    /// Pair of the reasoning block currently open, with the opener's offset.
    open_block: Option<(Delimiters, usize)>,
    /// Byte ranges of closed reasoning blocks, delimiters included.
    reasoning_spans: Vec<(usize, usize)>,
    pending_action_name: Option<String>,
    /// Byte offset in `raw_buffer` up to which display has been decided.
    display_cursor: usize,
    /// Byte offset in `raw_buffer` up to which whole lines were tracked.
    line_cursor: usize,
    mid_line: bool,
    completed: bool,
}

impl StreamingParserState {
    pub fn raw_buffer(&self) -> &str {
        &self.raw_buffer
    }

    pub fn reasoning_buffer(&self) -> &str {
        &self.reasoning_buffer
    }

    pub fn content_buffer(&self) -> &str {
        &self.content_buffer
    }

    pub fn in_reasoning_block(&self) -> bool {
        self.open_block.is_some()
    }

    pub fn pending_action_name(&self) -> Option<&str> {
        self.pending_action_name.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Stateful chunk interpreter for one in-flight response.
#[derive(Debug, Clone)]
pub struct StreamingInterpreter {
    options: InterpretOptions,
    preview_chars: usize,
    state: StreamingParserState,
    finished: bool,
}

impl Default for StreamingInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingInterpreter {
    pub fn new() -> Self {
        Self::with_options(InterpretOptions::default())
    }

    pub fn with_options(options: InterpretOptions) -> Self {
        Self {
            options,
            preview_chars: RESULT_PREVIEW_CHARS,
            state: StreamingParserState::default(),
            finished: false,
        }
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn state(&self) -> &StreamingParserState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume one chunk and report what became displayable.
    pub fn feed(&mut self, chunk: &str) -> StreamDelta {
        if self.finished {
            tracing::warn!("Chunk fed to a finalized interpreter, call reset() first");
            return StreamDelta::default();
        }

        self.state.raw_buffer.push_str(chunk);

        let mut delta = StreamDelta::default();
        self.advance_display(&mut delta);
        self.track_actions(&mut delta);
        delta.complete = self.state.completed;
        delta
    }

    /// Interpret everything received so far as one complete response.
    pub fn finalize(&mut self) -> InterpretedOutput {
        self.finished = true;
        interpret_with(&self.state.raw_buffer, &self.options)
    }

    /// Clear all state so the interpreter can take a new stream.
    pub fn reset(&mut self) {
        self.state = StreamingParserState::default();
        self.finished = false;
    }

    /// Part of the final content that partial updates never showed.
    pub fn undisplayed<'a>(&self, output: &'a InterpretedOutput) -> Option<&'a str> {
        let shown = &self.state.content_buffer;
        let rest = output.content.strip_prefix(shown.trim_end())?;
        let rest = if shown.ends_with(char::is_whitespace) {
            rest.trim_start()
        } else {
            rest
        };
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    fn advance_display(&mut self, delta: &mut StreamDelta) {
        loop {
            let start = self.state.display_cursor;
            let rest = &self.state.raw_buffer[start..];

            if let Some((delimiters, opened_at)) = self.state.open_block {
                let Some(pos) = rest.find(delimiters.close) else {
                    break;
                };
                let segment = rest[..pos].trim().to_string();
                if !segment.is_empty() {
                    self.push_reasoning(delta, &segment);
                }
                let close_end = start + pos + delimiters.close.len();
                self.state.reasoning_spans.push((opened_at, close_end));
                self.state.display_cursor = close_end;
                self.state.open_block = None;
                self.state.mid_line = false;
            } else if let Some((pos, delimiters)) = first_opener(rest) {
                let before = rest[..pos].to_string();
                self.emit_content(&before, true, delta);
                self.state.display_cursor = start + pos + delimiters.open.len();
                self.state.open_block = Some((delimiters, start + pos));
            } else {
                let rest = rest.to_string();
                let consumed = self.emit_content(&rest, false, delta);
                self.state.display_cursor = start + consumed;
                break;
            }
        }
    }

    /// Display what can be shown of `text`; returns the bytes consumed.
    ///
    /// With `flush` the text is known to end at a reasoning opener, so a
    /// trailing partial line is decided now instead of held.
    fn emit_content(&mut self, text: &str, flush: bool, delta: &mut StreamDelta) -> usize {
        let mut out = String::new();
        let mut consumed = 0;

        for piece in text.split_inclusive('\n') {
            let complete = piece.ends_with('\n');
            let trimmed = piece.trim_start();
            let line_start = !self.state.mid_line;

            // Tool JSON is decided by finalize, never streamed.
            if line_start && holds_json(trimmed) {
                if flush {
                    consumed = text.len();
                }
                break;
            }

            if line_start {
                if let Some(answer) = trimmed.strip_prefix("AI:") {
                    self.state.completed = true;
                    out.push_str(answer.trim_start());
                    consumed += piece.len();
                    self.state.mid_line = !complete;
                    continue;
                }
            }

            if !complete && !flush {
                if line_start && is_marker_prefix(trimmed) {
                    break;
                }
                let keep = partial_open_len(piece);
                let shown = &piece[..piece.len() - keep];
                out.push_str(shown);
                consumed += shown.len();
                if !shown.is_empty() {
                    self.state.mid_line = true;
                }
                break;
            }

            consumed += piece.len();
            self.state.mid_line = !complete;
            if line_start && LINE_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
                continue;
            }
            out.push_str(piece);
        }

        let out = if self.state.content_buffer.is_empty() {
            out.trim_start()
        } else {
            out.as_str()
        };
        if !out.is_empty() {
            self.state.content_buffer.push_str(out);
            delta.push_display(out);
        }
        consumed
    }

    fn track_actions(&mut self, delta: &mut StreamDelta) {
        while let Some(nl) = self.state.raw_buffer[self.state.line_cursor..].find('\n') {
            let start = self.state.line_cursor;
            let line = self.state.raw_buffer[start..start + nl].trim().to_string();
            self.state.line_cursor = start + nl + 1;
            // Reasoning blocks are reported whole when they close.
            if self.in_reasoning(start) {
                continue;
            }
            self.track_line(&line, delta);
        }
    }

    fn in_reasoning(&self, offset: usize) -> bool {
        let in_open = self
            .state
            .open_block
            .map(|(_, opened_at)| offset >= opened_at)
            .unwrap_or(false);
        in_open
            || self
                .state
                .reasoning_spans
                .iter()
                .any(|&(from, to)| offset >= from && offset < to)
    }

    fn track_line(&mut self, line: &str, delta: &mut StreamDelta) {
        if let Some(rest) = line.strip_prefix("Action Input:") {
            let input = rest.trim();
            if let Some(tool) = self.state.pending_action_name.take() {
                if !input.is_empty() {
                    delta
                        .tool_usage
                        .push(format!("🔧 **{tool}**\n   Input: `{input}`"));
                }
            }
        } else if let Some(rest) = line.strip_prefix("Action:") {
            let tool = rest.trim().trim_matches(|c: char| matches!(c, '`' | '*' | '"'));
            if !tool.is_empty() {
                delta.tool_usage.push(format!("🔧 Using tool: **{tool}**"));
                self.state.pending_action_name = Some(tool.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("Observation:") {
            let observation = rest.trim();
            if !observation.is_empty() {
                delta.tool_usage.push(format!(
                    "   Result: {}",
                    preview(observation, self.preview_chars)
                ));
            }
        } else if let Some(rest) = line.strip_prefix("Thought:") {
            let thought = rest.trim();
            if !thought.is_empty() && !thinking::is_boilerplate_thought(thought) {
                self.push_reasoning(delta, thought);
            }
        }
    }

    fn push_reasoning(&mut self, delta: &mut StreamDelta, text: &str) {
        if !self.state.reasoning_buffer.is_empty() {
            self.state.reasoning_buffer.push_str("\n\n");
        }
        self.state.reasoning_buffer.push_str(text);
        delta.push_reasoning(text);
    }
}

fn is_marker_prefix(text: &str) -> bool {
    LINE_MARKERS
        .iter()
        .any(|m| m.starts_with(text) || text.starts_with(m))
}

fn holds_json(text: &str) -> bool {
    text.starts_with('{')
        || text.starts_with("```json")
        || (text.starts_with('`') && "```json".starts_with(text.trim_end()))
}

/// Earliest reasoning opener in `text`, of any recognised pair.
fn first_opener(text: &str) -> Option<(usize, Delimiters)> {
    thinking::all_delimiters()
        .filter_map(|d| text.find(d.open).map(|pos| (pos, d)))
        .min_by_key(|(pos, _)| *pos)
}

/// Length of the longest suffix of `text` that could begin a reasoning opener.
fn partial_open_len(text: &str) -> usize {
    thinking::all_delimiters()
        .filter_map(|d| {
            (1..d.open.len())
                .rev()
                .find(|&k| text.ends_with(&d.open[..k]))
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpret::interpret;

    fn feed_all(interpreter: &mut StreamingInterpreter, chunks: &[&str]) -> Vec<StreamDelta> {
        chunks.iter().map(|c| interpreter.feed(c)).collect()
    }

    fn chunked(text: &str, size: usize) -> Vec<String> {
        text.as_bytes()
            .chunks(size)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_reasoning_then_answer() {
        let mut interpreter = StreamingInterpreter::new();

        let first = interpreter.feed("<think>a");
        assert_eq!(first.display, None);
        assert_eq!(first.reasoning, None);
        assert!(interpreter.state().in_reasoning_block());

        let second = interpreter.feed("b</think>answer");
        assert_eq!(second.reasoning.as_deref(), Some("ab"));
        assert_eq!(second.display.as_deref(), Some("answer"));

        let output = interpreter.finalize();
        assert_eq!(output.content, "answer");
        assert_eq!(output.reasoning, "ab");
    }

    #[test]
    fn test_content_streams_immediately() {
        let mut interpreter = StreamingInterpreter::new();
        let deltas = feed_all(&mut interpreter, &["Hel", "lo wor", "ld"]);
        let shown: Vec<_> = deltas.iter().map(|d| d.display.as_deref()).collect();
        assert_eq!(shown, vec![Some("Hel"), Some("lo wor"), Some("ld")]);
    }

    #[test]
    fn test_split_open_tag() {
        let mut interpreter = StreamingInterpreter::new();
        let first = interpreter.feed("Answer <th");
        assert_eq!(first.display.as_deref(), Some("Answer "));

        let second = interpreter.feed("ink>r</think> more");
        assert_eq!(second.reasoning.as_deref(), Some("r"));
        assert_eq!(second.display.as_deref(), Some(" more"));
        assert_eq!(interpreter.state().content_buffer(), "Answer  more");
        assert_eq!(interpreter.finalize().content, "Answer  more");
    }

    #[test]
    fn test_chunking_does_not_change_display() {
        let text = "<think>plan</think>\n\nThe answer is 42.\nThat is all.";
        let expected = interpret(text);

        for size in [1, 3, 7, text.len()] {
            let mut interpreter = StreamingInterpreter::new();
            let mut display = String::new();
            let mut reasoning = String::new();
            for chunk in chunked(text, size) {
                let delta = interpreter.feed(&chunk);
                display.push_str(delta.display.as_deref().unwrap_or(""));
                reasoning.push_str(delta.reasoning.as_deref().unwrap_or(""));
            }
            assert_eq!(display, expected.content, "chunk size {size}");
            assert_eq!(reasoning, expected.reasoning, "chunk size {size}");
            assert_eq!(interpreter.finalize(), expected);
        }
    }

    #[test]
    fn test_action_tracking() {
        let mut interpreter = StreamingInterpreter::new();

        let first = interpreter.feed(
            "Thought: I should list files\nAction: execute_bash\nAction Input: ls\n",
        );
        assert_eq!(first.display, None);
        assert_eq!(first.reasoning.as_deref(), Some("I should list files"));
        assert_eq!(
            first.tool_usage,
            vec![
                "🔧 Using tool: **execute_bash**".to_string(),
                "🔧 **execute_bash**\n   Input: `ls`".to_string(),
            ]
        );
        assert_eq!(interpreter.state().pending_action_name(), None);

        let second = interpreter.feed("Observation: a.txt\nAI: One file.\n");
        assert_eq!(second.tool_usage, vec!["   Result: a.txt".to_string()]);
        assert_eq!(second.display.as_deref(), Some("One file.\n"));
        assert!(second.complete);

        let output = interpreter.finalize();
        assert_eq!(output.content, "One file.");
        assert_eq!(output.tool_calls.len(), 1);
        assert_eq!(output.tool_calls[0].observation(), Some("a.txt"));
    }

    #[test]
    fn test_marker_prefix_held() {
        let mut interpreter = StreamingInterpreter::new();
        assert_eq!(interpreter.feed("Act").display, None);
        let delta = interpreter.feed("ion: execute_bash\n");
        assert_eq!(delta.display, None);
        assert_eq!(interpreter.state().pending_action_name(), Some("execute_bash"));
    }

    #[test]
    fn test_observation_preview_truncated() {
        let mut interpreter = StreamingInterpreter::new().with_preview_chars(5);
        let delta = interpreter.feed("Observation: 0123456789\n");
        assert_eq!(delta.tool_usage, vec!["   Result: 01234...".to_string()]);
    }

    #[test]
    fn test_tool_json_not_displayed() {
        let mut interpreter = StreamingInterpreter::new();
        let deltas = feed_all(
            &mut interpreter,
            &[
                "{\"tool_calls\":[{\"name\":\"execute_bash\",",
                "\"arguments\":{\"command\":\"ls\"}}]}",
            ],
        );
        assert!(deltas.iter().all(|d| d.display.is_none()));

        let output = interpreter.finalize();
        assert_eq!(output.tool_calls.len(), 1);
        assert_eq!(interpreter.undisplayed(&output), None);
    }

    #[test]
    fn test_undisplayed_flushes_unclosed_block() {
        let mut interpreter = StreamingInterpreter::new();
        interpreter.feed("Hi <think>unclosed");
        assert_eq!(interpreter.state().content_buffer(), "Hi ");

        let output = interpreter.finalize();
        assert_eq!(output.content, "Hi <think>unclosed");
        assert_eq!(interpreter.undisplayed(&output), Some("<think>unclosed"));
    }

    #[test]
    fn test_finalized_ignores_input_until_reset() {
        let mut interpreter = StreamingInterpreter::new();
        interpreter.feed("first");
        interpreter.finalize();
        assert!(interpreter.is_finished());
        assert!(interpreter.feed("more").is_empty());
        assert_eq!(interpreter.state().raw_buffer(), "first");

        interpreter.reset();
        assert_eq!(interpreter.state().raw_buffer(), "");
        assert_eq!(interpreter.feed("second").display.as_deref(), Some("second"));
        assert_eq!(interpreter.finalize().content, "second");
    }

    #[test]
    fn test_partial_open_len() {
        assert_eq!(partial_open_len("abc<thi"), 4);
        assert_eq!(partial_open_len("abc<"), 1);
        assert_eq!(partial_open_len("abc"), 0);
        assert_eq!(partial_open_len("abc<thinki"), 7);
        assert_eq!(partial_open_len("abc [THI"), 4);
    }

    #[test]
    fn test_alternate_tag_never_displayed() {
        let mut interpreter = StreamingInterpreter::new();

        let first = interpreter.feed("<thinking>secret plan");
        assert_eq!(first.display, None);
        assert!(interpreter.state().in_reasoning_block());

        let second = interpreter.feed("</thinking>Answer");
        assert_eq!(second.reasoning.as_deref(), Some("secret plan"));
        assert_eq!(second.display.as_deref(), Some("Answer"));
        assert_eq!(interpreter.state().content_buffer(), "Answer");

        let output = interpreter.finalize();
        assert_eq!(output.content, "Answer");
        assert_eq!(output.reasoning, "secret plan");
        assert_eq!(interpreter.undisplayed(&output), None);
    }

    #[test]
    fn test_alternate_opener_split_across_chunks() {
        let mut interpreter = StreamingInterpreter::new();
        let mut display = String::new();
        let mut reasoning = String::new();
        for chunk in ["Hi [TH", "INK]hidden[/THI", "NK] there"] {
            let delta = interpreter.feed(chunk);
            display.push_str(delta.display.as_deref().unwrap_or(""));
            reasoning.push_str(delta.reasoning.as_deref().unwrap_or(""));
        }
        assert_eq!(display, "Hi  there");
        assert_eq!(reasoning, "hidden");
    }

    #[test]
    fn test_thought_inside_block_reported_once() {
        let mut interpreter = StreamingInterpreter::new();
        let mut reasoning = Vec::new();
        for chunk in ["<think>\nThought: plan\n", "</think>\nanswer"] {
            if let Some(r) = interpreter.feed(chunk).reasoning {
                reasoning.push(r);
            }
        }
        assert_eq!(reasoning, vec!["Thought: plan".to_string()]);
        assert_eq!(interpreter.state().reasoning_buffer(), "Thought: plan");
        assert_eq!(interpreter.finalize().reasoning, "Thought: plan");
    }

    #[test]
    fn test_action_inside_block_not_tracked() {
        let mut interpreter = StreamingInterpreter::new();
        let delta = interpreter.feed("<think>\nAction: execute_bash\n</think>\nDone.");
        assert!(delta.tool_usage.is_empty());
        assert_eq!(interpreter.state().pending_action_name(), None);
    }
}
