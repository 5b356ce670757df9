mod config;
mod gate_cmd;
mod init_cmd;
mod run_cmd;
mod status_cmd;

#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use keeper_core::policy::OutputFormat;
use keeper_core::supervisor::SupervisorError;

use config::KeeperConfig;

/// Exit status when another supervisor holds the agent slot.
const EXIT_ALREADY_RUNNING: u8 = 3;

/// Phase for failures before the supervisor takes the lock: config
/// resolution, the workspace check, signal registration.
const STARTUP_PHASE: &str = "startup";

#[derive(Parser)]
#[command(
    name = "keeper",
    version,
    about = "Single-instance supervisor and command policy gate for an LLM coding agent"
)]
struct Cli {
    /// Project root (overrides KEEPER_PROJECT_DIR; defaults to the current directory)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent under the supervisor until it exits or is interrupted
    Run {
        /// One-off hint appended to the agent's system prompt
        nudge: Option<String>,
    },
    /// Evaluate one tool request from stdin and print the decision
    Gate {
        /// Output shape
        #[arg(long, value_enum, default_value_t = GateFormat::Decision)]
        format: GateFormat,
    },
    /// Show whether an agent is running for this project
    Status,
    /// Write keeper.toml and wire the gate into the agent workspace
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GateFormat {
    /// {"decision":"allow"} or {"decision":"deny","reason":"..."}
    Decision,
    /// The agent's PreToolUse hook response; silent on allow
    ClaudeHook,
}

impl From<GateFormat> for OutputFormat {
    fn from(format: GateFormat) -> Self {
        match format {
            GateFormat::Decision => OutputFormat::Decision,
            GateFormat::ClaudeHook => OutputFormat::ClaudeHook,
        }
    }
}

fn init_tracing(default_level: &str) {
    // Logs go to stderr; stdout carries agent output and gate decisions.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Gate { .. } => "warn",
        _ => "info",
    };
    init_tracing(default_level);

    match cli.command {
        Commands::Gate { format } => gate_cmd::run_gate(format.into()),
        Commands::Run { nudge } => {
            let resolved = match KeeperConfig::resolve(cli.project_dir.as_deref()) {
                Ok(resolved) => resolved,
                Err(e) => return report_failure(STARTUP_PHASE, &e),
            };
            match run_cmd::run(resolved, nudge).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => match e.downcast_ref::<SupervisorError>() {
                    Some(err) if err.is_already_running() => {
                        eprintln!("keeper: {} phase failed: {err}", err.phase());
                        eprintln!(
                            "Another agent runner is already active. Use `keeper status` to inspect it."
                        );
                        ExitCode::from(EXIT_ALREADY_RUNNING)
                    }
                    Some(err) => {
                        eprintln!("keeper: {} phase failed: {err}", err.phase());
                        ExitCode::FAILURE
                    }
                    None => report_failure(STARTUP_PHASE, &e),
                },
            }
        }
        Commands::Status => {
            let result = KeeperConfig::resolve(cli.project_dir.as_deref())
                .and_then(|resolved| status_cmd::run_status(&resolved));
            finish("status", result)
        }
        Commands::Init { force } => {
            let root = config::project_root(cli.project_dir.as_deref());
            finish("init", root.and_then(|root| init_cmd::run_init(&root, force)))
        }
    }
}

fn finish(phase: &str, result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(phase, &e),
    }
}

fn report_failure(phase: &str, e: &anyhow::Error) -> ExitCode {
    eprintln!("{}", failure_message(phase, e));
    ExitCode::FAILURE
}

fn failure_message(phase: &str, e: &anyhow::Error) -> String {
    format!("keeper: {phase} phase failed: {e:#}")
}
