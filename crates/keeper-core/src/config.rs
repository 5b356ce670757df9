//! Project layout and supervisor settings.
//!
//! Every persisted file lives at a fixed name under the project root. Only
//! the agent binary, the agent's working directory, the prompt template and
//! the grace period are configurable; resolving those from flags, env vars
//! and the config file is the CLI's job.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Advisory lock target. Stays empty.
pub const LOCK_FILE_NAME: &str = ".agent.lock";

/// Holds the running agent's PID as plain decimal text.
pub const DESCRIPTOR_FILE_NAME: &str = ".agent.pid";

/// Append-only log of every line the agent printed.
pub const OUTPUT_LOG_FILE_NAME: &str = ".agent-output.jsonl";

/// Agent working directory, relative to the project root.
pub const DEFAULT_WORKSPACE_DIR: &str = "agent-workspace";

/// Time between SIGTERM and SIGKILL when shutting the agent down.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Prompt written to the agent's stdin. `{project_dir}` is substituted.
pub const DEFAULT_PROMPT: &str =
    "You are an autonomous agent. Run commands from {project_dir} directory.";

/// Filesystem layout of one supervised project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
    workspace_dir: PathBuf,
}

impl ProjectLayout {
    /// Layout rooted at `root` with the default workspace directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let workspace_dir = root.join(DEFAULT_WORKSPACE_DIR);
        Self {
            root,
            workspace_dir,
        }
    }

    /// Override the agent's working directory. Relative paths are resolved
    /// against the project root.
    pub fn with_workspace_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.workspace_dir = self.root.join(dir);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE_NAME)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(OUTPUT_LOG_FILE_NAME)
    }
}

/// Where the agent CLI installs itself locally: `~/.claude/local/claude`.
pub fn default_agent_binary() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("local")
        .join("claude")
}

/// Everything the [`crate::supervisor::Supervisor`] needs for one run.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub layout: ProjectLayout,
    /// Path to the agent executable.
    pub agent_binary: PathBuf,
    /// Prompt template; see [`DEFAULT_PROMPT`].
    pub prompt_template: String,
    /// How long the agent gets to exit after SIGTERM before it is killed.
    pub grace_period: Duration,
}

impl SupervisorConfig {
    /// Defaults for every setting except the project root.
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            agent_binary: default_agent_binary(),
            prompt_template: DEFAULT_PROMPT.to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_agent_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.agent_binary = binary.into();
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_fixed_names_under_root() {
        let layout = ProjectLayout::new("/srv/project");
        assert_eq!(layout.lock_path(), PathBuf::from("/srv/project/.agent.lock"));
        assert_eq!(
            layout.descriptor_path(),
            PathBuf::from("/srv/project/.agent.pid")
        );
        assert_eq!(
            layout.log_path(),
            PathBuf::from("/srv/project/.agent-output.jsonl")
        );
        assert_eq!(
            layout.workspace_dir(),
            Path::new("/srv/project/agent-workspace")
        );
    }

    #[test]
    fn relative_workspace_dir_resolves_against_root() {
        let layout = ProjectLayout::new("/srv/project").with_workspace_dir("sandbox");
        assert_eq!(layout.workspace_dir(), Path::new("/srv/project/sandbox"));
    }

    #[test]
    fn absolute_workspace_dir_is_kept() {
        let layout = ProjectLayout::new("/srv/project").with_workspace_dir("/tmp/elsewhere");
        assert_eq!(layout.workspace_dir(), Path::new("/tmp/elsewhere"));
    }

    #[test]
    fn default_binary_lives_under_dot_claude() {
        let binary = default_agent_binary();
        assert!(
            binary.ends_with(".claude/local/claude"),
            "unexpected binary path: {}",
            binary.display()
        );
    }

    #[test]
    fn supervisor_defaults() {
        let config = SupervisorConfig::new(ProjectLayout::new("/srv/project"));
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.prompt_template, DEFAULT_PROMPT);
    }
}
