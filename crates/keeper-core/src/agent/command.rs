//! Agent command line and prompt.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Prefix for operator nudges passed via `--append-system-prompt`.
pub const NUDGE_PREFIX: &str = "URGENT HINT: ";

/// Treat blank nudges as absent.
pub fn normalize_nudge(nudge: Option<String>) -> Option<String> {
    nudge.filter(|n| !n.trim().is_empty())
}

/// Substitute `{project_dir}` into `template` and append the nudge, if any.
pub fn render_prompt(template: &str, project_dir: &Path, nudge: Option<&str>) -> String {
    let mut prompt = template.replace("{project_dir}", &project_dir.display().to_string());
    if let Some(nudge) = nudge {
        prompt.push_str("\nOperator hint: ");
        prompt.push_str(nudge);
    }
    prompt
}

/// One launch of the agent binary.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Agent executable.
    pub binary: PathBuf,
    /// Project root, granted to the agent with `--add-dir`.
    pub project_dir: PathBuf,
    /// The agent's current directory.
    pub working_dir: PathBuf,
    pub nudge: Option<String>,
}

impl AgentInvocation {
    pub fn new(
        binary: impl Into<PathBuf>,
        project_dir: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            project_dir: project_dir.into(),
            working_dir: working_dir.into(),
            nudge: None,
        }
    }

    pub fn with_nudge(mut self, nudge: Option<String>) -> Self {
        self.nudge = normalize_nudge(nudge);
        self
    }

    /// Arguments after the binary path, in order.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--continue",
            "--dangerously-skip-permissions",
            "--verbose",
            "--print",
            "--output-format",
            "stream-json",
            "--add-dir",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(self.project_dir.clone().into_os_string());

        if let Some(nudge) = &self.nudge {
            args.push("--append-system-prompt".into());
            args.push(format!("{NUDGE_PREFIX}{nudge}").into());
        }
        args
    }

    /// A ready-to-spawn command: all three standard streams piped, running
    /// in [`Self::working_dir`], killed if the handle is dropped.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args())
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
