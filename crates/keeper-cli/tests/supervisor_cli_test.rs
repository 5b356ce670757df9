//! Integration tests for `keeper run`, `keeper status` and `keeper init`.
//!
//! A shell script stands in for the agent binary (via `KEEPER_AGENT_BIN`),
//! and every test gets its own project directory.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use keeper_core::lock::LockManager;

// Writing a script and exec'ing it while another test forks can fail with
// ETXTBSY, so tests that spawn agents take turns.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

fn spawn_lock() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("agent-workspace")).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    fn fake_agent(&self, body: &str) -> PathBuf {
        let path = self.path("fake-agent");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn keeper(&self, agent: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_keeper"));
        cmd.arg("--project-dir")
            .arg(self.root())
            .env("KEEPER_AGENT_BIN", agent)
            .env_remove("KEEPER_PROJECT_DIR")
            .env_remove("KEEPER_GRACE_SECS")
            .env_remove("RUST_LOG")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn log(&self) -> String {
        std::fs::read_to_string(self.path(".agent-output.jsonl")).unwrap_or_default()
    }

    fn assert_torn_down(&self) {
        assert!(
            !self.path(".agent.pid").exists(),
            "instance descriptor must be removed"
        );
        assert!(
            LockManager::new(self.path(".agent.lock")).acquire().is_ok(),
            "lock must be released"
        );
    }
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Output {
    let deadline = Instant::now() + timeout;
    while child.try_wait().unwrap().is_none() {
        if Instant::now() > deadline {
            child.kill().ok();
            panic!("keeper did not exit within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    child.wait_with_output().unwrap()
}

fn wait_for(what: &str, timeout: Duration, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn run_relays_agent_output_to_stdout_and_log() {
    let _guard = spawn_lock();
    let project = Project::new();
    let agent = project.fake_agent(
        r#"read prompt
echo '{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"ls"}}],"usage":{"input_tokens":10,"output_tokens":4}}}'
echo "prompt: $prompt"
echo "warning on stderr" >&2
exit 7"#,
    );

    let output = project.keeper(&agent).arg("run").output().unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains(r#""type":"assistant""#));
    assert!(stdout.contains("prompt: You are an autonomous agent."));
    assert!(stdout.contains("warning on stderr"));

    let log = project.log();
    assert_eq!(log.lines().count(), 3, "log: {log}");
    assert!(log.contains("warning on stderr\n"));

    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("exit code 7"), "stderr: {err}");
    assert!(err.contains("1 tool calls"), "stderr: {err}");
    project.assert_torn_down();
}

#[test]
fn second_runner_exits_immediately_and_touches_nothing() {
    let project = Project::new();
    let _held = LockManager::new(project.path(".agent.lock")).acquire().unwrap();
    std::fs::write(project.path(".agent.pid"), "999999999").unwrap();
    let agent = project.fake_agent("touch agent-ran");

    let started = Instant::now();
    let output = project.keeper(&agent).arg("run").output().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("already"), "stderr: {}", stderr(&output));
    assert_eq!(
        std::fs::read_to_string(project.path(".agent.pid")).unwrap(),
        "999999999"
    );
    assert!(!project.path(".agent-output.jsonl").exists());
    assert!(!project.path("agent-workspace/agent-ran").exists());
}

#[test]
fn sigint_stops_agent_that_ignores_sigterm() {
    let _guard = spawn_lock();
    let project = Project::new();
    let agent = project.fake_agent("trap '' TERM\necho ready\nwhile :; do sleep 1; done");

    let keeper = project
        .keeper(&agent)
        .env("KEEPER_GRACE_SECS", "1")
        .arg("run")
        .spawn()
        .unwrap();
    wait_for("agent output", Duration::from_secs(10), || {
        project.log().contains("ready")
    });
    let agent_pid: i32 = std::fs::read_to_string(project.path(".agent.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let signalled_at = Instant::now();
    // SAFETY: sending a signal to a child process we spawned.
    let ret = unsafe { libc::kill(keeper.id() as libc::pid_t, libc::SIGINT) };
    assert_eq!(ret, 0);
    let output = wait_with_timeout(keeper, Duration::from_secs(20));

    assert!(signalled_at.elapsed() >= Duration::from_secs(1));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let err = stderr(&output);
    assert!(err.contains("SIGINT"), "stderr: {err}");
    assert!(err.contains("force-killed"), "stderr: {err}");
    project.assert_torn_down();

    // SAFETY: signal 0 only checks for existence.
    let alive = unsafe { libc::kill(agent_pid, 0) } == 0;
    assert!(!alive, "agent {agent_pid} must be gone");
}

#[test]
fn sigterm_stops_cooperative_agent_gracefully() {
    let _guard = spawn_lock();
    let project = Project::new();
    let agent = project.fake_agent("trap 'exit 0' TERM\necho ready\nwhile :; do sleep 0.1; done");

    let keeper = project.keeper(&agent).arg("run").spawn().unwrap();
    wait_for("agent output", Duration::from_secs(10), || {
        project.log().contains("ready")
    });

    // SAFETY: sending a signal to a child process we spawned.
    unsafe { libc::kill(keeper.id() as libc::pid_t, libc::SIGTERM) };
    let output = wait_with_timeout(keeper, Duration::from_secs(20));

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let err = stderr(&output);
    assert!(err.contains("stopped gracefully"), "stderr: {err}");
    assert!(err.contains("exit code 0"), "stderr: {err}");
    project.assert_torn_down();
}

#[test]
fn missing_agent_binary_is_a_spawn_failure() {
    let project = Project::new();
    let output = project
        .keeper(&project.path("no-such-agent"))
        .arg("run")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("keeper: spawn phase failed"), "stderr: {err}");
    project.assert_torn_down();
}

#[test]
fn missing_workspace_points_at_init() {
    let project = Project::new();
    std::fs::remove_dir(project.path("agent-workspace")).unwrap();
    let output = project
        .keeper(&project.path("fake-agent"))
        .arg("run")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("keeper: startup phase failed"), "stderr: {err}");
    assert!(err.contains("keeper init"), "stderr: {err}");
    assert!(!project.path(".agent.lock").exists());
}

#[test]
fn unreadable_config_is_a_startup_failure() {
    let project = Project::new();
    std::fs::write(project.path("keeper.toml"), "[agent\nbinary = ").unwrap();
    let output = project
        .keeper(&project.path("fake-agent"))
        .arg("run")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("keeper: startup phase failed"), "stderr: {err}");
    assert!(!project.path(".agent.lock").exists());
}

#[test]
fn status_reports_idle_project() {
    let project = Project::new();
    let output = project
        .keeper(&project.path("fake-agent"))
        .arg("status")
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Runner: not running"), "stdout: {stdout}");
    assert!(stdout.contains("Agent: none recorded"), "stdout: {stdout}");
    assert!(!project.path(".agent.lock").exists(), "status must not create the lock");
}

#[test]
fn status_sees_a_held_lock() {
    let project = Project::new();
    let _held = LockManager::new(project.path(".agent.lock")).acquire().unwrap();
    std::fs::write(project.path(".agent.pid"), "999999999").unwrap();

    let output = project
        .keeper(&project.path("fake-agent"))
        .arg("status")
        .output()
        .unwrap();

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Runner: running"), "stdout: {stdout}");
    assert!(stdout.contains("Agent: pid 999999999, not running"), "stdout: {stdout}");
}

#[test]
fn init_creates_config_and_refuses_to_clobber() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("project");

    let first = Command::new(env!("CARGO_BIN_EXE_keeper"))
        .arg("init")
        .arg("--project-dir")
        .arg(&root)
        .output()
        .unwrap();
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    assert!(root.join("keeper.toml").exists());
    assert!(root.join("agent-workspace/.claude/settings.json").exists());

    let second = Command::new(env!("CARGO_BIN_EXE_keeper"))
        .arg("init")
        .arg("--project-dir")
        .arg(&root)
        .output()
        .unwrap();
    assert_eq!(second.status.code(), Some(1));
    assert!(stderr(&second).contains("keeper: init phase failed"));
    assert!(stderr(&second).contains("--force"));
}
