//! Gate I/O: one request in, one decision out.
//!
//! The request is read to the end before anything is written. A request
//! that cannot be parsed is a [`GateError`], never a deny, so the caller
//! can tell "rejected by policy" from "not understood".

use std::io::{self, Read, Write};

use serde::Serialize;

use super::{ActionRequest, PolicyDecision, PolicyGate};

/// Errors the gate reports on its error channel.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("failed to read request: {0}")]
    Read(#[source] io::Error),

    #[error("Invalid JSON input: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to write decision: {0}")]
    Write(#[source] io::Error),
}

/// How the decision is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `{"decision":"allow"}` / `{"decision":"deny","reason":"..."}`,
    /// always exactly one object.
    #[default]
    Decision,
    /// The agent's pre-tool-use hook response. Written only on deny; an
    /// allow prints nothing so the agent falls back to its own defaults.
    ClaudeHook,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HookResponse<'a> {
    hook_specific_output: HookSpecificOutput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HookSpecificOutput<'a> {
    hook_event_name: &'static str,
    permission_decision: &'static str,
    permission_decision_reason: &'a str,
}

/// Parse `input` and evaluate it.
pub fn evaluate_input(gate: &PolicyGate, input: &str) -> Result<PolicyDecision, GateError> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    if !value.is_object() {
        return Err(GateError::Malformed(serde::de::Error::custom(
            "request must be a JSON object",
        )));
    }
    let request: ActionRequest = serde_json::from_value(value)?;
    Ok(gate.evaluate(&request))
}

/// Render `decision` in `format`, newline-terminated. Empty for a
/// `ClaudeHook` allow.
pub fn render_decision(decision: &PolicyDecision, format: OutputFormat) -> String {
    let rendered = match (format, decision) {
        (OutputFormat::Decision, decision) => serde_json::to_string(decision),
        (OutputFormat::ClaudeHook, PolicyDecision::Allow) => return String::new(),
        (OutputFormat::ClaudeHook, PolicyDecision::Deny { reason }) => {
            serde_json::to_string(&HookResponse {
                hook_specific_output: HookSpecificOutput {
                    hook_event_name: "PreToolUse",
                    permission_decision: "deny",
                    permission_decision_reason: reason,
                },
            })
        }
    };
    // Serializing these plain structs cannot fail.
    let mut line = rendered.unwrap_or_default();
    line.push('\n');
    line
}

/// Read one request from `input`, evaluate it, write the decision to
/// `output`.
pub fn run_gate<R: Read, W: Write>(
    gate: &PolicyGate,
    mut input: R,
    mut output: W,
    format: OutputFormat,
) -> Result<PolicyDecision, GateError> {
    let mut buf = String::new();
    input.read_to_string(&mut buf).map_err(GateError::Read)?;

    let decision = evaluate_input(gate, &buf)?;

    let rendered = render_decision(&decision, format);
    if !rendered.is_empty() {
        output
            .write_all(rendered.as_bytes())
            .and_then(|()| output.flush())
            .map_err(GateError::Write)?;
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_output(input: &str, format: OutputFormat) -> (Result<PolicyDecision, GateError>, String) {
        let mut out = Vec::new();
        let result = run_gate(&PolicyGate::standard(), input.as_bytes(), &mut out, format);
        (result, String::from_utf8(out).unwrap())
    }

    fn bash(command: &str) -> String {
        serde_json::json!({"tool_name": "Bash", "tool_input": {"command": command}}).to_string()
    }

    #[test]
    fn deny_writes_decision_with_reason() {
        let (result, out) = gate_output(&bash("sleep 20"), OutputFormat::Decision);
        assert!(result.unwrap().is_deny());

        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["decision"], "deny");
        assert!(v["reason"].as_str().unwrap().contains("20"));
    }

    #[test]
    fn allow_writes_bare_allow() {
        let (result, out) = gate_output(&bash("sleep 10"), OutputFormat::Decision);
        assert_eq!(result.unwrap(), PolicyDecision::Allow);
        assert_eq!(out, "{\"decision\":\"allow\"}\n");
    }

    #[test]
    fn minutes_are_normalized_before_the_check() {
        let (result, _) = gate_output(&bash("sleep 1m"), OutputFormat::Decision);
        assert!(result.unwrap().reason().unwrap().contains("60s"));
    }

    #[test]
    fn plain_commands_are_allowed() {
        let (result, _) = gate_output(&bash("ls -la"), OutputFormat::Decision);
        assert_eq!(result.unwrap(), PolicyDecision::Allow);
    }

    #[test]
    fn other_tools_are_allowed() {
        let input = r#"{"tool_name":"Read","tool_input":{"file_path":"/etc/hosts"}}"#;
        let (result, _) = gate_output(input, OutputFormat::Decision);
        assert_eq!(result.unwrap(), PolicyDecision::Allow);
    }

    #[test]
    fn malformed_input_is_an_error_not_a_deny() {
        for input in ["", "not json", "[]", r#"["Bash", {"command": "sleep 20"}]"#, r#"{"tool_input": 5}"#] {
            let (result, out) = gate_output(input, OutputFormat::Decision);
            assert!(
                matches!(result, Err(GateError::Malformed(_))),
                "input {input:?} gave {result:?}"
            );
            assert!(out.is_empty(), "no decision may be written for {input:?}");
        }
    }

    #[test]
    fn claude_hook_deny_shape() {
        let (_, out) = gate_output(&bash("sleep 1h"), OutputFormat::ClaudeHook);
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        let hook = &v["hookSpecificOutput"];
        assert_eq!(hook["hookEventName"], "PreToolUse");
        assert_eq!(hook["permissionDecision"], "deny");
        assert!(
            hook["permissionDecisionReason"]
                .as_str()
                .unwrap()
                .starts_with("HOOK BLOCKED: Sleep 3600s exceeds 15s limit!")
        );
    }

    #[test]
    fn claude_hook_allow_is_silent() {
        let (result, out) = gate_output(&bash("echo hi"), OutputFormat::ClaudeHook);
        assert_eq!(result.unwrap(), PolicyDecision::Allow);
        assert!(out.is_empty());
    }

    #[test]
    fn malformed_error_message() {
        let err = evaluate_input(&PolicyGate::standard(), "{").unwrap_err();
        assert!(
            err.to_string().starts_with("Invalid JSON input: "),
            "unexpected message: {err}"
        );
    }
}
