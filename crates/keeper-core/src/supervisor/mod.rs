//! Single-instance agent supervisor.
//!
//! One [`Supervisor::run`] owns the agent slot from lock acquisition to
//! release:
//!
//! ```text
//! IDLE -> LOCK_ACQUIRED -> CHILD_SPAWNED -> STREAMING -> TERMINATING -> EXITED
//! ```
//!
//! Signals arrive as a stream polled in the same `select!` as the child's
//! output, so nothing outside the run loop ever mutates supervisor state.
//! Cleanup goes through [`Teardown`], which runs once on every exit path.

pub mod output_log;
pub mod teardown;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::agent::{AgentInvocation, StreamSummary, render_prompt};
use crate::config::SupervisorConfig;
use crate::lock::{LockError, LockManager};
use crate::process::{self, Signal};
use crate::reclaim::{DescriptorError, InstanceDescriptor, ReclaimOutcome, reclaim};

pub use output_log::OutputLog;
pub use teardown::Teardown;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A request to shut the agent down, delivered by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    LockAcquired,
    ChildSpawned,
    Streaming,
    Terminating,
    Exited,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::LockAcquired => "LOCK_ACQUIRED",
            Self::ChildSpawned => "CHILD_SPAWNED",
            Self::Streaming => "STREAMING",
            Self::Terminating => "TERMINATING",
            Self::Exited => "EXITED",
        };
        f.write_str(name)
    }
}

/// How the agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),
    /// Terminated by this signal number.
    Signal(i32),
    Unknown,
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "killed by signal {signal}"),
            Self::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// What happened during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub child_pid: u32,
    pub exit: ChildExit,
    /// Set when the run ended because the operator asked it to.
    pub shutdown_signal: Option<ShutdownSignal>,
    /// The agent outlived its grace period (or a second signal arrived)
    /// and had to be sent SIGKILL.
    pub forced_kill: bool,
    /// What startup did about a previous run's descriptor.
    pub reclaimed: ReclaimOutcome,
    pub summary: StreamSummary,
}

/// Errors that end a run early. Teardown has already happened by the time
/// the caller sees one.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to start agent {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("failed to relay agent output: {0}")]
    Stream(#[source] io::Error),

    #[error("failed to wait for agent: {0}")]
    Wait(#[source] io::Error),
}

impl SupervisorError {
    /// Lifecycle phase the error belongs to: `lock`, `spawn` or `stream`.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Lock(_) => "lock",
            Self::Spawn { .. } | Self::Descriptor(_) => "spawn",
            Self::Stream(_) | Self::Wait(_) => "stream",
        }
    }

    /// True when another supervisor holds the slot.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::Lock(LockError::AlreadyRunning { .. }))
    }
}

type OperatorOutput = Box<dyn AsyncWrite + Send + Unpin>;

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Runs the agent once under exclusive ownership of the project's slot.
pub struct Supervisor {
    config: SupervisorConfig,
    nudge: Option<String>,
    operator: Option<OperatorOutput>,
    state: SupervisorState,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("nudge", &self.nudge)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// What ended a wait on the child.
enum WaitEvent {
    Exited(io::Result<ExitStatus>),
    Signalled(ShutdownSignal),
    Deadline,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            nudge: None,
            operator: Some(Box::new(tokio::io::stdout())),
            state: SupervisorState::Idle,
        }
    }

    /// One-off hint for the agent. Blank hints are ignored.
    pub fn with_nudge(mut self, nudge: Option<String>) -> Self {
        self.nudge = nudge;
        self
    }

    /// Where relayed lines go besides the log. Defaults to stdout.
    pub fn with_operator_output(mut self, output: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.operator = Some(Box::new(output));
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!(from = %self.state, to = %next, "supervisor state");
        self.state = next;
    }

    /// Run the agent to completion or until `shutdown` yields.
    ///
    /// Fails fast with [`SupervisorError::Lock`] if another supervisor holds
    /// the slot; nothing on disk is touched in that case.
    pub async fn run<S>(mut self, mut shutdown: S) -> Result<RunReport, SupervisorError>
    where
        S: Stream<Item = ShutdownSignal> + Unpin,
    {
        let layout = self.config.layout.clone();

        let lock = LockManager::new(layout.lock_path()).acquire()?;
        let descriptor = InstanceDescriptor::new(layout.descriptor_path());
        let mut teardown = Teardown::new(lock, descriptor.clone());
        self.transition(SupervisorState::LockAcquired);

        let reclaimed = reclaim(&descriptor);
        let mut log = OutputLog::open(layout.log_path())
            .await
            .map_err(SupervisorError::Stream)?;

        let invocation = AgentInvocation::new(
            &self.config.agent_binary,
            layout.root(),
            layout.workspace_dir(),
        )
        .with_nudge(self.nudge.take());

        let mut child = invocation
            .command()
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                binary: self.config.agent_binary.clone(),
                source,
            })?;
        let Some(child_pid) = child.id() else {
            return Err(SupervisorError::Spawn {
                binary: self.config.agent_binary.clone(),
                source: io::Error::other("agent exited before its pid was known"),
            });
        };
        descriptor.write(child_pid)?;
        self.transition(SupervisorState::ChildSpawned);
        info!(
            pid = child_pid,
            binary = %self.config.agent_binary.display(),
            nudge = ?invocation.nudge,
            "agent started"
        );

        let prompt = render_prompt(
            &self.config.prompt_template,
            layout.root(),
            invocation.nudge.as_deref(),
        );
        // The agent may not read stdin before filling its output pipes, so
        // the prompt is written alongside the relay loop, never ahead of it.
        let prompt_writer = child.stdin.take().map(|stdin| {
            tokio::spawn(async move {
                if let Err(e) = send_prompt(stdin, &prompt).await {
                    warn!(error = %e, "could not deliver prompt to agent");
                }
            })
        });

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(SupervisorError::Stream(io::Error::other(
                "agent output pipes were not captured",
            )));
        };
        let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
            .merge(SplitStream::new(BufReader::new(stderr).split(b'\n')));

        self.transition(SupervisorState::Streaming);
        let mut operator = self.operator.take();
        let mut summary = StreamSummary::default();
        let mut signals_open = true;
        let mut interrupted = None;

        loop {
            tokio::select! {
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        relay_to_operator(&mut operator, &line).await;
                        log.append_line(&line).await.map_err(SupervisorError::Stream)?;
                        summary.observe(&line);
                    }
                    Some(Err(e)) => return Err(SupervisorError::Stream(e)),
                    None => break,
                },
                signal = shutdown.next(), if signals_open => match signal {
                    Some(signal) => {
                        info!(%signal, "shutdown requested");
                        interrupted = Some(signal);
                        break;
                    }
                    None => signals_open = false,
                },
            }
        }
        // Closing our pipe ends stops a dying agent from blocking on a full
        // pipe. Aborting an unfinished prompt write drops stdin.
        drop(lines);
        if let Some(writer) = prompt_writer {
            writer.abort();
        }

        self.transition(SupervisorState::Terminating);
        let mut forced_kill = false;
        let mut exited = None;
        if interrupted.is_none() {
            match wait_for_exit(&mut child, &mut shutdown, signals_open, None).await {
                WaitEvent::Exited(status) => exited = Some(status.map_err(SupervisorError::Wait)?),
                WaitEvent::Signalled(signal) => {
                    info!(%signal, "shutdown requested after agent closed its output");
                    interrupted = Some(signal);
                }
                WaitEvent::Deadline => {}
            }
        }
        let status = match exited {
            Some(status) => status,
            None => {
                let (status, forced) = terminate(
                    &mut child,
                    child_pid,
                    self.config.grace_period,
                    &mut shutdown,
                    signals_open,
                )
                .await?;
                forced_kill = forced;
                status
            }
        };

        teardown.run();
        self.transition(SupervisorState::Exited);

        let report = RunReport {
            child_pid,
            exit: ChildExit::from(status),
            shutdown_signal: interrupted,
            forced_kill,
            reclaimed,
            summary,
        };
        info!(
            pid = child_pid,
            exit = %report.exit,
            signal = ?report.shutdown_signal,
            forced_kill,
            lines = log.lines_written(),
            tool_calls = report.summary.tool_calls,
            input_tokens = report.summary.input_tokens,
            output_tokens = report.summary.output_tokens,
            "agent run finished"
        );
        Ok(report)
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL. A further shutdown
/// signal cuts the grace period short. Returns the exit status and whether
/// SIGKILL was needed.
async fn terminate<S>(
    child: &mut Child,
    pid: u32,
    grace: Duration,
    shutdown: &mut S,
    signals_open: bool,
) -> Result<(ExitStatus, bool), SupervisorError>
where
    S: Stream<Item = ShutdownSignal> + Unpin,
{
    match process::send_signal(pid, Signal::Terminate) {
        Ok(()) => debug!(pid, grace_ms = grace.as_millis() as u64, "sent SIGTERM to agent"),
        Err(e) if process::is_no_such_process(&e) => debug!(pid, "agent already gone"),
        Err(e) => warn!(pid, error = %e, "failed to send SIGTERM to agent"),
    }

    match wait_for_exit(child, shutdown, signals_open, Some(grace)).await {
        WaitEvent::Exited(status) => {
            let status = status.map_err(SupervisorError::Wait)?;
            return Ok((status, false));
        }
        WaitEvent::Signalled(signal) => {
            warn!(%signal, pid, "second shutdown signal, killing agent now");
        }
        WaitEvent::Deadline => {
            warn!(pid, grace_secs = grace.as_secs_f64(), "agent ignored SIGTERM, killing it");
        }
    }

    if let Err(e) = child.start_kill() {
        // The child may have exited between the deadline and the kill.
        debug!(pid, error = %e, "SIGKILL not delivered");
    }
    let status = child.wait().await.map_err(SupervisorError::Wait)?;
    Ok((status, true))
}

/// Wait for the child to exit, a shutdown signal, or `deadline`.
async fn wait_for_exit<S>(
    child: &mut Child,
    shutdown: &mut S,
    signals_open: bool,
    deadline: Option<Duration>,
) -> WaitEvent
where
    S: Stream<Item = ShutdownSignal> + Unpin,
{
    let sleep = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        status = child.wait() => WaitEvent::Exited(status),
        Some(signal) = shutdown.next(), if signals_open => WaitEvent::Signalled(signal),
        () = sleep => WaitEvent::Deadline,
    }
}

/// Write the prompt and a newline, then close stdin.
async fn send_prompt(mut stdin: ChildStdin, prompt: &str) -> io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    drop(stdin);
    Ok(())
}

/// Echo one line to the operator. A broken operator stream is dropped so
/// the agent keeps running and the log keeps filling.
async fn relay_to_operator(operator: &mut Option<OperatorOutput>, line: &[u8]) {
    let Some(out) = operator.as_mut() else {
        return;
    };
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line);
    buf.push(b'\n');
    let result = async {
        out.write_all(&buf).await?;
        out.flush().await
    }
    .await;
    if let Err(e) = result {
        warn!(error = %e, "operator output closed, relaying to the log only");
        *operator = None;
    }
}
