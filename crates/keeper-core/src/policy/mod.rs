//! Command policy gate.
//!
//! The agent calls the gate once per tool invocation, before the tool runs.
//! The gate reads one [`ActionRequest`], asks each [`PolicyRule`] in order,
//! and answers with a [`PolicyDecision`]. It keeps no state between
//! requests and never touches the filesystem.
//!
//! ```text
//! stdin  {"tool_name":"Bash","tool_input":{"command":"sleep 20"}}
//!          |
//!          v
//! PolicyGate [SleepGuard, ...] --first deny wins--> PolicyDecision
//!          |
//!          v
//! stdout {"decision":"deny","reason":"HOOK BLOCKED: ..."}
//! ```

pub mod sleep;
pub mod wire;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub use sleep::{DEFAULT_MAX_SLEEP_SECS, DurationUnit, SleepGuard, SleepRequest, find_sleep};
pub use wire::{GateError, OutputFormat, evaluate_input, run_gate};

/// Tool name the agent uses for shell commands.
pub const SHELL_TOOL: &str = "Bash";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One action the agent wants to take.
///
/// Mirrors the payload the agent hands its pre-tool-use hooks. Fields other
/// than the tool name and its input (session id, cwd, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ActionRequest {
    /// Category of the action, e.g. `"Bash"`.
    #[serde(default)]
    pub tool_name: String,
    /// Tool arguments. For shell commands, `command` holds the command line.
    #[serde(default)]
    pub tool_input: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(tool_name: impl Into<String>, tool_input: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
        }
    }

    /// A shell-command request for `command`.
    pub fn shell(command: impl Into<String>) -> Self {
        let mut input = Map::new();
        input.insert("command".to_string(), Value::String(command.into()));
        Self::new(SHELL_TOOL, input)
    }

    pub fn is_shell_command(&self) -> bool {
        self.tool_name == SHELL_TOOL
    }

    /// The literal command string; empty when absent or not a string.
    pub fn command(&self) -> &str {
        self.tool_input
            .get("command")
            .and_then(|c| c.as_str())
            .unwrap_or("")
    }
}

/// The gate's verdict.
///
/// Serializes as `{"decision":"allow"}` or
/// `{"decision":"deny","reason":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum PolicyDecision {
    /// No objection.
    Allow,
    /// Vetoed; `reason` is shown to the agent.
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason } => Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A single check applied to every request.
///
/// Rules must be pure: same request, same decision, no side effects.
pub trait PolicyRule: Send + Sync {
    /// Short identifier used in diagnostics (e.g. "sleep-limit").
    fn name(&self) -> &str;

    fn evaluate(&self, request: &ActionRequest) -> PolicyDecision;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PolicyRule) {}
};

/// Ordered list of rules. The first deny wins; an empty gate allows all.
#[derive(Default)]
pub struct PolicyGate {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyGate {
    /// A gate with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate `keeper gate` runs: the sleep guard at its default limit.
    pub fn standard() -> Self {
        Self::new().with_rule(SleepGuard::default())
    }

    pub fn with_rule(mut self, rule: impl PolicyRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn evaluate(&self, request: &ActionRequest) -> PolicyDecision {
        for rule in &self.rules {
            let decision = rule.evaluate(request);
            if decision.is_deny() {
                debug!(rule = rule.name(), tool = %request.tool_name, "request denied");
                return decision;
            }
        }
        PolicyDecision::Allow
    }
}

impl std::fmt::Debug for PolicyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyGate")
            .field("rules", &self.rule_names())
            .finish()
    }
}
