//! `keeper init` command: lay out a project for supervised runs.
//!
//! Writes `keeper.toml`, creates the agent workspace, and registers
//! `keeper gate` as the agent's pre-tool-use hook for shell commands in
//! `<workspace>/.claude/settings.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::json;

use keeper_core::config::DEFAULT_WORKSPACE_DIR;
use keeper_core::policy::SHELL_TOOL;

use crate::config::{self, ConfigFile};

/// Execute the `keeper init` command.
pub fn run_init(root: &Path, force: bool) -> Result<()> {
    let config_path = config::config_path(root);
    if config_path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(root)
        .with_context(|| format!("failed to create project directory {}", root.display()))?;
    let written = config::save_config(root, &ConfigFile::with_defaults())?;
    println!("Config written to {}", written.display());

    let workspace = root.join(DEFAULT_WORKSPACE_DIR);
    let keeper_exe = std::env::current_exe().context("failed to locate the keeper executable")?;
    match write_hook_settings(&workspace, &keeper_exe, force)? {
        Some(path) => println!("Gate hook registered in {}", path.display()),
        None => println!(
            "Leaving existing {} untouched (use --force to overwrite)",
            settings_path(&workspace).display()
        ),
    }

    println!();
    println!("Next: run `keeper run` from {}.", root.display());
    Ok(())
}

fn settings_path(workspace: &Path) -> PathBuf {
    workspace.join(".claude").join("settings.json")
}

/// Write the hook settings unless they exist and `force` is off. Returns
/// the path written, if any.
fn write_hook_settings(workspace: &Path, keeper_exe: &Path, force: bool) -> Result<Option<PathBuf>> {
    let path = settings_path(workspace);
    if path.exists() && !force {
        return Ok(None);
    }
    let dir = workspace.join(".claude");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let contents = serde_json::to_string_pretty(&hook_settings(keeper_exe))
        .context("failed to serialize hook settings")?;
    std::fs::write(&path, contents + "\n")
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(Some(path))
}

fn hook_settings(keeper_exe: &Path) -> serde_json::Value {
    let command = format!(
        "{} gate --format claude-hook",
        shell_quote(&keeper_exe.display().to_string())
    );
    json!({
        "hooks": {
            "PreToolUse": [{
                "matcher": SHELL_TOOL,
                "hooks": [{"type": "command", "command": command}]
            }]
        }
    })
}

/// Single-quote `s` for `sh` if it contains anything special.
fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
