//! `keeper run` command: supervise one agent run in the foreground.

use anyhow::{Result, bail};
use tokio::signal::unix::{SignalKind, signal};
use tokio_stream::wrappers::SignalStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use keeper_core::supervisor::{RunReport, ShutdownSignal, Supervisor};

use crate::config::KeeperConfig;

/// Run the supervisor until the agent exits or the operator stops it.
///
/// The agent's own exit status does not affect ours; failures here are the
/// supervisor's, returned as [`keeper_core::supervisor::SupervisorError`]
/// inside the `anyhow::Error` so `main` can pick the exit code.
pub async fn run(resolved: KeeperConfig, nudge: Option<String>) -> Result<()> {
    let config = resolved.supervisor;
    let layout = config.layout.clone();
    if !layout.workspace_dir().is_dir() {
        bail!(
            "agent workspace {} does not exist\nRun `keeper init` to create it.",
            layout.workspace_dir().display()
        );
    }

    info!(
        project = %layout.root().display(),
        agent = %config.agent_binary.display(),
        config_file = ?resolved.config_file,
        "starting agent runner"
    );

    let shutdown = shutdown_signals()?;
    let report = Supervisor::new(config).with_nudge(nudge).run(shutdown).await?;
    print_report(&report);
    Ok(())
}

/// SIGINT and SIGTERM as one stream.
fn shutdown_signals() -> std::io::Result<impl Stream<Item = ShutdownSignal> + Unpin> {
    let interrupt =
        SignalStream::new(signal(SignalKind::interrupt())?).map(|()| ShutdownSignal::Interrupt);
    let terminate =
        SignalStream::new(signal(SignalKind::terminate())?).map(|()| ShutdownSignal::Terminate);
    Ok(interrupt.merge(terminate))
}

fn print_report(report: &RunReport) {
    let summary = &report.summary;
    eprintln!();
    eprintln!("Agent (pid {}) finished: {}", report.child_pid, report.exit);
    if let Some(signal) = report.shutdown_signal {
        let how = if report.forced_kill {
            "force-killed"
        } else {
            "stopped gracefully"
        };
        eprintln!("  shutdown: {signal}, {how}");
    }
    eprintln!(
        "  {} lines relayed, {} tool calls, {} input / {} output tokens",
        summary.lines, summary.tool_calls, summary.input_tokens, summary.output_tokens
    );
    if summary.errors > 0 {
        eprintln!("  {} error events reported by the agent", summary.errors);
    }
    if let Some(session) = &summary.session_id {
        eprintln!("  session: {session}");
    }
}
