//! `keeper gate` command: the agent's pre-tool-use hook.

use std::process::ExitCode;

use tracing::debug;

use keeper_core::policy::{self, OutputFormat, PolicyGate};

/// Read one request from stdin and write the decision to stdout.
///
/// A deny is a successful evaluation and exits 0. Only a request that
/// cannot be read or parsed exits non-zero, with the reason on stderr.
pub fn run_gate(format: OutputFormat) -> ExitCode {
    let gate = PolicyGate::standard();
    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();

    match policy::run_gate(&gate, stdin, stdout, format) {
        Ok(decision) => {
            debug!(?decision, "gate decision");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
