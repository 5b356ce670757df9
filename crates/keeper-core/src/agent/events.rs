//! Parsing of the agent's `--output-format stream-json` lines.
//!
//! The supervisor relays every line byte-for-byte regardless of what is in
//! it. Parsing happens on the side, for tracing and the end-of-run summary,
//! and a line that fails to parse is simply not counted.

use serde_json::Value;
use tracing::{debug, warn};

/// One thing the agent reported.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// `system`/`init`: the session the agent resumed or started.
    Session {
        session_id: String,
        model: Option<String>,
    },
    /// Text content from the agent.
    Message { role: String, content: String },
    /// The agent invoked a tool.
    ToolCall { tool: String, input: Value },
    /// A tool returned. `tool` is the tool name, or the originating
    /// `tool_use_id` when only that is available.
    ToolResult { tool: String, output: Value },
    /// Token usage attached to one assistant message.
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },
    /// The final `result` line of a print-mode run.
    Result { is_error: bool, text: Option<String> },
    /// An error reported by the agent.
    Error { message: String },
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|t| t.as_str())
}

fn usage_event(usage: &Value) -> Option<AgentEvent> {
    let input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output_tokens = usage
        .get("output_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    (input_tokens > 0 || output_tokens > 0).then_some(AgentEvent::TokenUsage {
        input_tokens,
        output_tokens,
    })
}

/// Parse a single stream-json line into zero or more events.
///
/// `Err` means the line is not JSON at all.
pub fn parse_stream_json_line(line: &str) -> Result<Vec<AgentEvent>, serde_json::Error> {
    let v: Value = serde_json::from_str(line)?;
    let mut events = Vec::new();

    match str_field(&v, "type").unwrap_or("") {
        "system" => {
            if let Some(session_id) = str_field(&v, "session_id") {
                events.push(AgentEvent::Session {
                    session_id: session_id.to_string(),
                    model: str_field(&v, "model").map(str::to_string),
                });
            }
        }

        // assistant/user: a message whose content blocks carry text, tool
        // calls and tool results.
        role @ ("assistant" | "user") => {
            let Some(message) = v.get("message") else {
                return Ok(events);
            };
            if let Some(blocks) = message.get("content").and_then(|c| c.as_array()) {
                for block in blocks {
                    match str_field(block, "type").unwrap_or("") {
                        "text" => {
                            if let Some(text) = str_field(block, "text") {
                                events.push(AgentEvent::Message {
                                    role: role.to_string(),
                                    content: text.to_string(),
                                });
                            }
                        }
                        "tool_use" => events.push(AgentEvent::ToolCall {
                            tool: str_field(block, "name").unwrap_or("unknown").to_string(),
                            input: block.get("input").cloned().unwrap_or(Value::Null),
                        }),
                        "tool_result" => events.push(AgentEvent::ToolResult {
                            tool: str_field(block, "tool_use_id")
                                .unwrap_or("unknown")
                                .to_string(),
                            output: block.get("content").cloned().unwrap_or(Value::Null),
                        }),
                        _ => {}
                    }
                }
            } else if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
                events.push(AgentEvent::Message {
                    role: role.to_string(),
                    content: text.to_string(),
                });
            }
            if role == "assistant" {
                events.extend(message.get("usage").and_then(usage_event));
            }
        }

        // Some agent versions emit tool events at the top level.
        "tool_use" => events.push(AgentEvent::ToolCall {
            tool: str_field(&v, "name")
                .or_else(|| str_field(&v, "tool"))
                .unwrap_or("unknown")
                .to_string(),
            input: v.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => events.push(AgentEvent::ToolResult {
            tool: str_field(&v, "name")
                .or_else(|| str_field(&v, "tool"))
                .unwrap_or("unknown")
                .to_string(),
            output: v
                .get("output")
                .or_else(|| v.get("content"))
                .cloned()
                .unwrap_or(Value::Null),
        }),

        // Usage on `result` is the session total and would double count
        // the per-message usage, so it is ignored.
        "result" => events.push(AgentEvent::Result {
            is_error: v.get("is_error").and_then(|e| e.as_bool()).unwrap_or(false),
            text: str_field(&v, "result").map(str::to_string),
        }),

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .or_else(|| str_field(&v, "message"))
                .unwrap_or("unknown error")
                .to_string();
            events.push(AgentEvent::Error { message });
        }

        other => {
            debug!(event_type = other, "ignoring unrecognised stream-json event type");
        }
    }

    Ok(events)
}

/// Running totals over everything the agent printed in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Lines relayed, parseable or not.
    pub lines: u64,
    /// Lines that were not stream-json.
    pub unparsed_lines: u64,
    pub tool_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub errors: u64,
    pub session_id: Option<String>,
}

impl StreamSummary {
    /// Account for one raw output line.
    pub fn observe(&mut self, line: &[u8]) {
        self.lines += 1;
        let Ok(text) = std::str::from_utf8(line) else {
            self.unparsed_lines += 1;
            return;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        match parse_stream_json_line(trimmed) {
            Ok(events) => {
                for event in events {
                    self.record(event);
                }
            }
            Err(_) => self.unparsed_lines += 1,
        }
    }

    fn record(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Session { session_id, model } => {
                debug!(session_id = %session_id, model = ?model, "agent session");
                self.session_id = Some(session_id);
            }
            AgentEvent::ToolCall { tool, input } => {
                self.tool_calls += 1;
                let command = input.get("command").and_then(|c| c.as_str());
                debug!(tool = %tool, command = ?command, "agent tool call");
            }
            AgentEvent::TokenUsage {
                input_tokens,
                output_tokens,
            } => {
                self.input_tokens = self.input_tokens.saturating_add(input_tokens);
                self.output_tokens = self.output_tokens.saturating_add(output_tokens);
            }
            AgentEvent::Result { is_error: true, text } => {
                self.errors += 1;
                warn!(result = ?text, "agent run finished with an error result");
            }
            AgentEvent::Error { message } => {
                self.errors += 1;
                warn!(message = %message, "agent reported an error");
            }
            AgentEvent::Message { .. } | AgentEvent::ToolResult { .. } | AgentEvent::Result { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_system_init() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc-123","model":"claude-x"}"#;
        let events = parse_stream_json_line(line).unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::Session {
                session_id: "abc-123".to_string(),
                model: Some("claude-x".to_string()),
            }]
        );
    }

    #[test]
    fn parse_assistant_message_with_text_and_usage() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello, world!"}],"usage":{"input_tokens":10,"output_tokens":5}}}"#;
        let events = parse_stream_json_line(line).unwrap();
        assert_eq!(
            events,
            vec![
                AgentEvent::Message {
                    role: "assistant".to_string(),
                    content: "Hello, world!".to_string(),
                },
                AgentEvent::TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            ]
        );
    }

    #[test]
    fn parse_assistant_tool_use_block() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"ls -la"}}]}}"#;
        let events = parse_stream_json_line(line).unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::ToolCall {
                tool: "Bash".to_string(),
                input: serde_json::json!({"command": "ls -la"}),
            }]
        );
    }

    #[test]
    fn parse_user_tool_result_block() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"done"}]}}"#;
        let events = parse_stream_json_line(line).unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::ToolResult {
                tool: "toolu_1".to_string(),
                output: serde_json::json!("done"),
            }]
        );
    }

    #[test]
    fn parse_top_level_tool_use() {
        let line = r#"{"type":"tool_use","name":"Read","input":{"path":"/tmp/file.rs"}}"#;
        let events = parse_stream_json_line(line).unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::ToolCall {
                tool: "Read".to_string(),
                input: serde_json::json!({"path": "/tmp/file.rs"}),
            }]
        );
    }

    #[test]
    fn parse_result_ignores_session_usage() {
        let line = r#"{"type":"result","is_error":false,"result":"All done.","usage":{"input_tokens":500,"output_tokens":200}}"#;
        let events = parse_stream_json_line(line).unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::Result {
                is_error: false,
                text: Some("All done.".to_string()),
            }]
        );
    }

    #[test]
    fn parse_error_type() {
        let line = r#"{"type":"error","error":{"message":"rate limit exceeded"}}"#;
        let events = parse_stream_json_line(line).unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::Error {
                message: "rate limit exceeded".to_string(),
            }]
        );
    }

    #[test]
    fn parse_unknown_type_yields_nothing() {
        let events = parse_stream_json_line(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(parse_stream_json_line("plain text from stderr").is_err());
    }

    #[test]
    fn summary_tallies_a_run() {
        let mut summary = StreamSummary::default();
        let lines = [
            r#"{"type":"system","subtype":"init","session_id":"s-1"}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"ls"}}],"usage":{"input_tokens":7,"output_tokens":3}}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{}}],"usage":{"input_tokens":1,"output_tokens":2}}}"#,
            "npm WARN something on stderr",
            "",
            r#"{"type":"result","is_error":true,"result":"boom"}"#,
        ];
        for line in lines {
            summary.observe(line.as_bytes());
        }

        assert_eq!(summary.lines, 6);
        assert_eq!(summary.unparsed_lines, 1);
        assert_eq!(summary.tool_calls, 2);
        assert_eq!(summary.input_tokens, 8);
        assert_eq!(summary.output_tokens, 5);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn summary_counts_invalid_utf8_as_unparsed() {
        let mut summary = StreamSummary::default();
        summary.observe(&[0xff, 0xfe, b'x']);
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.unparsed_lines, 1);
    }
}
