//! Configuration for keeper.
//!
//! An optional TOML file at `<project>/keeper.toml` plus a resolution
//! chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use keeper_core::config::{
    DEFAULT_GRACE_PERIOD, DEFAULT_PROMPT, DEFAULT_WORKSPACE_DIR, ProjectLayout, SupervisorConfig,
    default_agent_binary,
};

/// Name of the config file inside the project root.
pub const CONFIG_FILE_NAME: &str = "keeper.toml";

const ENV_PROJECT_DIR: &str = "KEEPER_PROJECT_DIR";
const ENV_AGENT_BIN: &str = "KEEPER_AGENT_BIN";
const ENV_GRACE_SECS: &str = "KEEPER_GRACE_SECS";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    /// The agent's working directory, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    /// Prompt template; `{project_dir}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSection {
    /// Seconds between SIGTERM and SIGKILL on shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<u64>,
}

impl ConfigFile {
    /// Every setting spelled out with its default, for `keeper init`.
    pub fn with_defaults() -> Self {
        Self {
            agent: AgentSection {
                binary: Some(default_agent_binary()),
                workspace_dir: Some(PathBuf::from(DEFAULT_WORKSPACE_DIR)),
                prompt: Some(DEFAULT_PROMPT.to_string()),
            },
            supervisor: SupervisorSection {
                grace_period_secs: Some(DEFAULT_GRACE_PERIOD.as_secs()),
            },
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Resolve the project root: `--project-dir` > `KEEPER_PROJECT_DIR` >
/// current directory. Always absolute, since the agent runs from a
/// subdirectory.
pub fn project_root(cli_project_dir: Option<&Path>) -> Result<PathBuf> {
    let root = match cli_project_dir {
        Some(dir) => dir.to_path_buf(),
        None => match non_empty_env(ENV_PROJECT_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().context("failed to determine current directory")?,
        },
    };
    std::path::absolute(&root)
        .with_context(|| format!("invalid project directory {}", root.display()))
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the project's config file. A missing file is `Ok(None)`; a file
/// that exists but does not parse is an error.
pub fn load_config(root: &Path) -> Result<Option<ConfigFile>> {
    let path = config_path(root);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file. Returns the path written.
pub fn save_config(root: &Path, config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path(root);
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Settings taken from `KEEPER_*` environment variables.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvOverrides {
    pub agent_binary: Option<PathBuf>,
    pub grace_secs: Option<u64>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        let grace_secs = non_empty_env(ENV_GRACE_SECS)
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{ENV_GRACE_SECS} must be a whole number of seconds, got {raw:?}"))
            })
            .transpose()?;
        Ok(Self {
            agent_binary: non_empty_env(ENV_AGENT_BIN).map(PathBuf::from),
            grace_secs,
        })
    }
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    pub supervisor: SupervisorConfig,
    /// The config file that contributed, if any.
    pub config_file: Option<PathBuf>,
}

impl KeeperConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    pub fn resolve(cli_project_dir: Option<&Path>) -> Result<Self> {
        let root = project_root(cli_project_dir)?;
        let env = EnvOverrides::from_env()?;
        let file = load_config(&root)?;
        Ok(Self::resolve_from(root, &env, file))
    }

    /// The pure part of [`Self::resolve`].
    pub fn resolve_from(root: PathBuf, env: &EnvOverrides, file: Option<ConfigFile>) -> Self {
        let config_file = file.as_ref().map(|_| config_path(&root));
        let ConfigFile { agent, supervisor } = file.unwrap_or_default();

        let mut layout = ProjectLayout::new(root);
        if let Some(dir) = &agent.workspace_dir {
            layout = layout.with_workspace_dir(dir);
        }

        let mut config = SupervisorConfig::new(layout);
        if let Some(binary) = env.agent_binary.clone().or(agent.binary) {
            config = config.with_agent_binary(binary);
        }
        if let Some(prompt) = agent.prompt {
            config = config.with_prompt_template(prompt);
        }
        if let Some(secs) = env.grace_secs.or(supervisor.grace_period_secs) {
            config = config.with_grace_period(Duration::from_secs(secs));
        }

        Self {
            supervisor: config,
            config_file,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
