//! Prompt text for tool-aware turns.
//!
//! - **PromptBuilder**: tool preamble, reference-only listing and the
//!   follow-up prompt that turns tool output into an answer.

pub mod builder;

pub use builder::{strip_ansi, PromptBuilder, TOOL_CALL_EXAMPLES};
