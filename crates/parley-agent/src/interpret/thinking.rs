//! Reasoning block extraction.
//!
//! Models wrap deliberation in a handful of delimiter conventions. The
//! extractor collects those spans as reasoning segments and returns the text
//! without them. Matching is non-recursive: for nested blocks of the same kind
//! the first closing delimiter ends the block and whatever follows it stays in
//! the text.

use once_cell::sync::Lazy;
use regex::Regex;

/// An open/close delimiter pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub open: &'static str,
    pub close: &'static str,
}

/// `<think>…</think>`, emitted by most local reasoning models.
pub const PRIMARY: Delimiters = Delimiters {
    open: "<think>",
    close: "</think>",
};

/// Less common conventions, applied after the primary pair.
pub const ALTERNATES: [Delimiters; 3] = [
    Delimiters {
        open: "<thinking>",
        close: "</thinking>",
    },
    Delimiters {
        open: "[THINK]",
        close: "[/THINK]",
    },
    Delimiters {
        open: "<!-- thinking -->",
        close: "<!-- /thinking -->",
    },
];

/// Agent-format `Thought:` lines that are routing boilerplate, not reasoning.
const THOUGHT_BOILERPLATE: [&str; 3] = [
    "I need to use a tool",
    "Do I need to use a tool",
    "should be one of",
];

fn block_regex(d: Delimiters) -> Regex {
    let pattern = format!(
        "(?s){}(.*?){}",
        regex::escape(d.open),
        regex::escape(d.close)
    );
    Regex::new(&pattern).expect("delimiter pattern is valid")
}

static PRIMARY_BLOCK: Lazy<Regex> = Lazy::new(|| block_regex(PRIMARY));

static ALTERNATE_BLOCKS: Lazy<Vec<Regex>> =
    Lazy::new(|| ALTERNATES.iter().copied().map(block_regex).collect());

static THOUGHT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*Thought:[ \t]*(.*?)[ \t]*\r?$").expect("valid regex"));

static THOUGHT_LINE_FULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*Thought:.*(?:\r?\n|$)").expect("valid regex"));

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Result of [`extract_thinking`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThinkingExtraction {
    /// Reasoning segments in the order they were found.
    pub segments: Vec<String>,
    /// Input with every recognised block removed.
    pub cleaned: String,
}

impl ThinkingExtraction {
    pub fn has_reasoning(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Segments joined by blank lines.
    pub fn reasoning(&self) -> String {
        self.segments.join("\n\n")
    }
}

/// Split `text` into reasoning segments and cleaned text.
///
/// Text that matches no convention is returned byte-for-byte unchanged.
pub fn extract_thinking(text: &str) -> ThinkingExtraction {
    let mut segments = Vec::new();
    let mut changed = false;

    let mut cleaned = remove_blocks(&PRIMARY_BLOCK, text, &mut segments, &mut changed);
    if changed {
        cleaned = cleaned.trim().to_string();
    }

    if THOUGHT_LINE.is_match(&cleaned) {
        segments.extend(thought_lines(&cleaned));
        cleaned = THOUGHT_LINE_FULL.replace_all(&cleaned, "").into_owned();
        changed = true;
    }

    for re in ALTERNATE_BLOCKS.iter() {
        cleaned = remove_blocks(re, &cleaned, &mut segments, &mut changed);
    }

    if !changed {
        return ThinkingExtraction {
            segments,
            cleaned: text.to_string(),
        };
    }

    ThinkingExtraction {
        segments,
        cleaned: collapse_blank_lines(&cleaned),
    }
}

/// Like [`extract_thinking`], but also resolves unbalanced delimiters.
///
/// An unclosed opener turns the rest of the text into reasoning; a closer
/// without an opener turns everything before it into reasoning. No delimiter
/// survives in the cleaned text.
pub fn force_strip(text: &str) -> ThinkingExtraction {
    let ThinkingExtraction {
        mut segments,
        mut cleaned,
    } = extract_thinking(text);

    for d in all_delimiters() {
        if let Some(pos) = cleaned.find(d.close) {
            if !cleaned[..pos].contains(d.open) {
                push_segment(&mut segments, &cleaned[..pos]);
                cleaned = cleaned[pos + d.close.len()..].to_string();
            }
        }
        if let Some(pos) = cleaned.find(d.open) {
            if !cleaned[pos..].contains(d.close) {
                push_segment(&mut segments, &cleaned[pos + d.open.len()..]);
                cleaned.truncate(pos);
            }
        }
        cleaned = cleaned.replace(d.open, "").replace(d.close, "");
    }

    ThinkingExtraction {
        segments,
        cleaned: collapse_blank_lines(&cleaned),
    }
}

/// Every recognised pair, primary first.
pub fn all_delimiters() -> impl Iterator<Item = Delimiters> {
    std::iter::once(PRIMARY).chain(ALTERNATES)
}

/// Whether any recognised opening or closing delimiter occurs in `text`.
pub fn contains_delimiter(text: &str) -> bool {
    find_delimiter(text).is_some()
}

/// The first recognised delimiter found in `text`, if any.
pub fn find_delimiter(text: &str) -> Option<&'static str> {
    all_delimiters()
        .flat_map(|d| [d.open, d.close])
        .find(|tag| text.contains(tag))
}

/// Collapse runs of three or more newlines to two, then trim.
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUNS.replace_all(text, "\n\n").trim().to_string()
}

/// Drop agent-format scaffolding lines and unwrap `AI:` answers.
///
/// Text without any such line is returned unchanged.
pub fn strip_agent_format(text: &str) -> String {
    let mut changed = false;
    let mut kept = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if ["Thought:", "Action:", "Action Input:", "Observation:"]
            .iter()
            .any(|p| trimmed.starts_with(p))
        {
            changed = true;
            continue;
        }
        if let Some(answer) = trimmed.strip_prefix("AI:") {
            changed = true;
            kept.push(answer.trim_start());
            continue;
        }
        kept.push(line);
    }

    if changed {
        collapse_blank_lines(&kept.join("\n"))
    } else {
        text.to_string()
    }
}

fn remove_blocks(
    re: &Regex,
    text: &str,
    segments: &mut Vec<String>,
    changed: &mut bool,
) -> String {
    if !re.is_match(text) {
        return text.to_string();
    }
    *changed = true;
    for caps in re.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            push_segment(segments, m.as_str());
        }
    }
    re.replace_all(text, "").into_owned()
}

fn thought_lines(text: &str) -> Vec<String> {
    THOUGHT_LINE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|t| !t.is_empty() && !is_boilerplate_thought(t))
        .collect()
}

pub(crate) fn is_boilerplate_thought(thought: &str) -> bool {
    THOUGHT_BOILERPLATE.iter().any(|b| thought.contains(b))
}

fn push_segment(segments: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        let text = "  Just an answer.\n\n\n\nWith gaps.  ";
        let out = extract_thinking(text);
        assert_eq!(out.cleaned, text);
        assert!(!out.has_reasoning());
    }

    #[test]
    fn test_primary_block() {
        let out = extract_thinking("<think>\nplan it\n</think>\n\nThe answer is 4.");
        assert_eq!(out.segments, vec!["plan it"]);
        assert_eq!(out.cleaned, "The answer is 4.");
    }

    #[test]
    fn test_multiple_blocks_and_collapse() {
        let out = extract_thinking("<think>a</think>One\n\n\n\n<think>b</think>\n\n\nTwo");
        assert_eq!(out.reasoning(), "a\n\nb");
        assert_eq!(out.cleaned, "One\n\nTwo");
    }

    #[test]
    fn test_alternate_conventions() {
        let out = extract_thinking("[THINK]x[/THINK]A <thinking>y</thinking>B<!-- thinking -->z<!-- /thinking -->");
        assert_eq!(out.segments, vec!["y", "x", "z"]);
        assert_eq!(out.cleaned, "A B");
        assert!(!contains_delimiter(&out.cleaned));
    }

    #[test]
    fn test_thought_lines() {
        let text = "Thought: Do I need to use a tool? Yes\nThought: the user wants a count\nAction: execute_bash";
        let out = extract_thinking(text);
        assert_eq!(out.segments, vec!["the user wants a count"]);
        assert_eq!(out.cleaned, "Action: execute_bash");
    }

    #[test]
    fn test_empty_block_has_no_reasoning() {
        let out = extract_thinking("<think>  </think>Hi");
        assert!(!out.has_reasoning());
        assert_eq!(out.cleaned, "Hi");
    }

    #[test]
    fn test_unclosed_block_left_in_place() {
        let out = extract_thinking("<think>still going");
        assert_eq!(out.cleaned, "<think>still going");
        assert!(!out.has_reasoning());
    }

    #[test]
    fn test_nested_first_close_wins() {
        let out = extract_thinking("<think>a<think>b</think>c</think>d");
        assert_eq!(out.segments, vec!["a<think>b"]);
        assert_eq!(out.cleaned, "c</think>d");
    }

    #[test]
    fn test_force_strip_unbalanced() {
        let out = force_strip("Answer first <think>never closed");
        assert_eq!(out.cleaned, "Answer first");
        assert_eq!(out.segments, vec!["never closed"]);

        let out = force_strip("reasoning from the template</think>\nThe result");
        assert_eq!(out.cleaned, "The result");
        assert_eq!(out.segments, vec!["reasoning from the template"]);
    }

    #[test]
    fn test_force_strip_nested_leaves_no_delimiters() {
        let out = force_strip("<think>a<think>b</think>c</think>d");
        assert!(!contains_delimiter(&out.cleaned));
        assert_eq!(out.cleaned, "d");
        assert_eq!(out.segments, vec!["a<think>b", "c"]);
    }

    #[test]
    fn test_strip_agent_format() {
        let text = "Action: execute_bash\nAction Input: ls\nObservation: a b\nAI: There are 2 files.";
        assert_eq!(strip_agent_format(text), "There are 2 files.");
        assert_eq!(strip_agent_format("no scaffolding "), "no scaffolding ");
    }

    #[test]
    fn test_all_delimiters() {
        let opens: Vec<_> = all_delimiters().map(|d| d.open).collect();
        assert_eq!(opens, vec!["<think>", "<thinking>", "[THINK]", "<!-- thinking -->"]);
    }
}
