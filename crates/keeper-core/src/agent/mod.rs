//! The supervised agent: how it is invoked and how its output is read.
//!
//! The agent is the `claude` CLI run in print mode with `stream-json`
//! output. [`AgentInvocation`] builds its command line; [`events`] turns
//! the JSONL it prints into [`AgentEvent`]s for diagnostics and the run
//! summary.

pub mod command;
pub mod events;

pub use command::{AgentInvocation, NUDGE_PREFIX, normalize_nudge, render_prompt};
pub use events::{AgentEvent, StreamSummary, parse_stream_json_line};
