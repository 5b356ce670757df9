//! `keeper status` command: is an agent running for this project?

use anyhow::{Context, Result};

use keeper_core::lock::LockManager;
use keeper_core::process;
use keeper_core::reclaim::{DescriptorRecord, InstanceDescriptor};

use crate::config::KeeperConfig;

/// Run the status command.
///
/// Read-only apart from a momentary lock probe, which never blocks and is
/// released immediately. A `keeper run` racing the probe retries past it.
pub fn run_status(resolved: &KeeperConfig) -> Result<()> {
    let layout = &resolved.supervisor.layout;

    println!("Project: {}", layout.root().display());
    match &resolved.config_file {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: (defaults)"),
    }

    let held = LockManager::new(layout.lock_path())
        .is_held()
        .context("failed to probe the runner lock")?;
    println!("Runner: {}", if held { "running" } else { "not running" });

    let descriptor = InstanceDescriptor::new(layout.descriptor_path());
    match descriptor.read()? {
        None => println!("Agent: none recorded"),
        Some(DescriptorRecord::Pid(pid)) => {
            let state = match process::is_alive(pid) {
                Ok(true) => "alive",
                Ok(false) => "not running",
                Err(_) => "unknown",
            };
            let stale = if held { "" } else { " (stale, reclaimed on next run)" };
            println!("Agent: pid {pid}, {state}{stale}");
        }
        Some(DescriptorRecord::Invalid(content)) => {
            println!("Agent: descriptor holds no valid pid ({content:?})");
        }
    }

    let log_path = layout.log_path();
    match std::fs::metadata(&log_path) {
        Ok(meta) => println!("Log: {} ({} bytes)", log_path.display(), meta.len()),
        Err(_) => println!("Log: {} (absent)", log_path.display()),
    }

    Ok(())
}
