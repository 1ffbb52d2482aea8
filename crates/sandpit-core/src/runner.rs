//! Bounded subprocess execution
//!
//! A run moves through `Pending -> Spawned -> {Completed | TimedOut}`, or
//! `Pending -> SpawnFailed` when the program cannot be started. The three
//! right-hand states are terminal: [`RunLifecycle`] refuses any transition out
//! of them, so a run is finalized exactly once even when process exit and the
//! deadline race.

use crate::language::CommandSpec;
use crate::result::ExecutionOutcome;
use crate::{Result, SandboxConfig, SandboxError};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

/// Exit code reported for runs killed at the deadline
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Appended to stderr when the deadline kills a run
pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

const READ_CHUNK: usize = 8 * 1024;

/// How long to keep draining pipes after the process is gone. Descendants
/// that inherited the pipes could otherwise hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started yet
    Pending,
    /// Process is running
    Spawned,
    /// Process exited on its own, successfully or not
    Completed,
    /// Process was killed at the deadline
    TimedOut,
    /// Process could not be started
    SpawnFailed,
}

impl RunState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::SpawnFailed)
    }
}

/// State machine for a single run, doubling as its one-shot completion latch
#[derive(Debug)]
pub struct RunLifecycle {
    state: RunState,
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLifecycle {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RunState::Pending,
        }
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    pub fn spawned(&mut self) -> bool {
        self.transition(RunState::Spawned)
    }

    pub fn spawn_failed(&mut self) -> bool {
        self.transition(RunState::SpawnFailed)
    }

    pub fn complete(&mut self) -> bool {
        self.transition(RunState::Completed)
    }

    pub fn time_out(&mut self) -> bool {
        self.transition(RunState::TimedOut)
    }

    /// Apply a transition if it is legal. Returns `false` and leaves the
    /// state untouched otherwise; whichever terminal condition lands first wins.
    fn transition(&mut self, to: RunState) -> bool {
        use RunState::{Completed, Pending, SpawnFailed, Spawned, TimedOut};

        let allowed = matches!(
            (self.state, to),
            (Pending, Spawned | SpawnFailed) | (Spawned, Completed | TimedOut)
        );

        if allowed {
            tracing::trace!(from = ?self.state, to = ?to, "run state transition");
            self.state = to;
        } else {
            tracing::debug!(state = ?self.state, rejected = ?to, "ignoring run state transition");
        }
        allowed
    }
}

/// Append-only capture buffer that stops growing at `limit` bytes
#[derive(Debug, Default)]
struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    const fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn append(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

type SharedBuffer = Arc<Mutex<OutputBuffer>>;

/// How the wait for the process ended
enum Termination {
    Exited(ExitStatus),
    DeadlineElapsed,
}

/// Launches commands inside a workspace under a wall-clock deadline
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
    env: Vec<(String, String)>,
}

impl ProcessRunner {
    #[must_use]
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            max_output_bytes: config.max_output_bytes,
            env: config.env.clone(),
        }
    }

    /// Run `command` in `cwd`, feeding it `stdin`, killing it at `deadline`.
    ///
    /// A non-zero exit or output on stderr is reported in the outcome, not
    /// as an error. Only failing to start the process is an error.
    pub async fn run(
        &self,
        command: &CommandSpec,
        cwd: &Path,
        stdin: &str,
        deadline: Duration,
    ) -> Result<ExecutionOutcome> {
        let mut lifecycle = RunLifecycle::new();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("HOME", cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                lifecycle.spawn_failed();
                tracing::warn!(command = %command, error = %source, "failed to spawn process");
                return Err(SandboxError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
        };
        lifecycle.spawned();

        let pid = child.id();
        let mut group = ProcessGroup::new(pid);
        tracing::debug!(pid, command = %command, "process spawned");

        let stdout = Arc::new(Mutex::new(OutputBuffer::new(self.max_output_bytes)));
        let stderr = Arc::new(Mutex::new(OutputBuffer::new(self.max_output_bytes)));

        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, Arc::clone(&stdout)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, Arc::clone(&stderr)));
        }
        let writer = child
            .stdin
            .take()
            .map(|pipe| spawn_writer(pipe, stdin.to_owned()));

        let termination = tokio::select! {
            status = child.wait() => Termination::Exited(status?),
            () = tokio::time::sleep(deadline) => Termination::DeadlineElapsed,
        };

        let (exit_code, signal) = match termination {
            Termination::Exited(status) => {
                lifecycle.complete();
                // Background jobs the program left behind share its group
                if group.kill().is_ok() {
                    tracing::debug!(pid, "killed leftover processes");
                }
                group.disarm();
                (status.code(), signal_name(status.signal()))
            }
            Termination::DeadlineElapsed => {
                lifecycle.time_out();
                kill_process_group(&mut child, &group);
                let status = child.wait().await?;
                group.disarm();
                tracing::info!(
                    pid,
                    command = %command,
                    deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    "process killed at deadline"
                );
                let signal = signal_name(status.signal())
                    .unwrap_or_else(|| Signal::SIGKILL.as_str().to_string());
                (Some(TIMEOUT_EXIT_CODE), Some(signal))
            }
        };
        let duration = started.elapsed();

        if let Some(writer) = writer {
            writer.abort();
        }
        for mut reader in readers {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                tracing::debug!(pid, "output pipe still open after exit, abandoning drain");
                reader.abort();
            }
        }

        let stdout = take_buffer(&stdout);
        let stderr = take_buffer(&stderr);
        let truncated = stdout.truncated || stderr.truncated;
        let timed_out = lifecycle.state() == RunState::TimedOut;

        let stdout = stdout.into_string();
        let mut stderr = stderr.into_string();
        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(TIMEOUT_MESSAGE);
        }

        tracing::debug!(
            pid,
            ?exit_code,
            ?signal,
            timed_out,
            elapsed_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "process finished"
        );

        Ok(ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            signal,
            timed_out,
            truncated,
            duration,
        })
    }
}

fn spawn_reader<R>(mut pipe: R, buffer: SharedBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.lock().append(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    })
}

/// Feed the input and close the pipe so programs reading to EOF terminate.
fn spawn_writer(mut pipe: ChildStdin, input: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if input.is_empty() {
            return;
        }
        if let Err(e) = pipe.write_all(input.as_bytes()).await {
            // The program may exit without reading its input
            if e.kind() != ErrorKind::BrokenPipe {
                tracing::debug!(error = %e, "failed to write stdin");
            }
            return;
        }
        if let Err(e) = pipe.shutdown().await {
            tracing::debug!(error = %e, "failed to close stdin");
        }
    })
}

/// The spawned program's process group.
///
/// Dropping an armed guard SIGKILLs the whole group, so a run future that is
/// cancelled mid-flight (client gone, caller timeout) takes the program's
/// background jobs down with it. `kill_on_drop` alone only reaches the leader.
/// The guard is disarmed once the group has been killed after the leader is
/// reaped; the group id cannot be recycled while any member is alive.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<Pid>,
    armed: bool,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        let pgid = pid
            .and_then(|pid| i32::try_from(pid).ok())
            .map(Pid::from_raw);
        Self {
            armed: pgid.is_some(),
            pgid,
        }
    }

    /// ESRCH means nothing in the group was left running
    fn kill(&self) -> nix::Result<()> {
        match self.pgid {
            Some(pgid) => killpg(pgid, Signal::SIGKILL),
            None => Err(nix::errno::Errno::ESRCH),
        }
    }

    const fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.kill() {
            Ok(()) => tracing::debug!(pgid = ?self.pgid, "run cancelled, process group killed"),
            Err(e) => tracing::debug!(pgid = ?self.pgid, error = %e, "run cancelled, process group already gone"),
        }
    }
}

/// SIGKILL the whole process group so children of the interpreter die too.
fn kill_process_group(child: &mut Child, group: &ProcessGroup) {
    match group.kill() {
        Ok(()) => return,
        Err(e) => tracing::debug!(pgid = ?group.pgid, error = %e, "killpg failed, killing process only"),
    }
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "failed to kill process");
    }
}

fn take_buffer(buffer: &SharedBuffer) -> OutputBuffer {
    std::mem::take(&mut *buffer.lock())
}

fn signal_name(signal: Option<i32>) -> Option<String> {
    signal.map(|n| {
        Signal::try_from(n).map_or_else(|_| format!("signal {n}"), |s| s.as_str().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(&SandboxConfig::default())
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    async fn run(script: &str, stdin: &str, deadline: Duration) -> ExecutionOutcome {
        let dir = tempfile::tempdir().unwrap();
        runner()
            .run(&sh(script), dir.path(), stdin, deadline)
            .await
            .unwrap()
    }

    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn lifecycle_completes_once() {
        let mut lifecycle = RunLifecycle::new();
        assert_eq!(lifecycle.state(), RunState::Pending);
        assert!(lifecycle.spawned());
        assert!(lifecycle.complete());
        assert!(!lifecycle.time_out());
        assert_eq!(lifecycle.state(), RunState::Completed);
    }

    #[test]
    fn lifecycle_timeout_wins_over_late_exit() {
        let mut lifecycle = RunLifecycle::new();
        lifecycle.spawned();
        assert!(lifecycle.time_out());
        assert!(!lifecycle.complete());
        assert_eq!(lifecycle.state(), RunState::TimedOut);
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn lifecycle_cannot_finish_before_spawn() {
        let mut lifecycle = RunLifecycle::new();
        assert!(!lifecycle.complete());
        assert!(!lifecycle.time_out());
        assert!(lifecycle.spawn_failed());
        assert!(!lifecycle.spawned());
        assert_eq!(lifecycle.state(), RunState::SpawnFailed);
    }

    #[test]
    fn buffer_stops_at_limit() {
        let mut buffer = OutputBuffer::new(4);
        buffer.append(b"ab");
        assert!(!buffer.truncated);
        buffer.append(b"cdef");
        buffer.append(b"g");
        assert!(buffer.truncated);
        assert_eq!(buffer.into_string(), "abcd");
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = run("echo hello", "", LONG).await;
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "");
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.signal, None);
        assert!(!outcome.timed_out);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let outcome = run("echo oops >&2; exit 3", "", LONG).await;
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stderr, "oops\n");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn stdin_is_fed_and_closed() {
        let outcome = run("cat", "line one\nline two", LONG).await;
        assert_eq!(outcome.stdout, "line one\nline two");
    }

    #[tokio::test]
    async fn empty_stdin_reads_as_eof() {
        let outcome = run("cat; echo done", "", LONG).await;
        assert_eq!(outcome.stdout, "done\n");
    }

    #[tokio::test]
    async fn unread_stdin_is_not_an_error() {
        let input = "x".repeat(200_000);
        let outcome = run("exit 0", &input, LONG).await;
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn deadline_kills_and_keeps_partial_output() {
        let started = Instant::now();
        let outcome = run("echo partial; sleep 30", "", Duration::from_millis(300)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert_eq!(outcome.signal.as_deref(), Some("SIGKILL"));
        assert_eq!(outcome.stdout, "partial\n");
        assert!(outcome.stderr.ends_with(TIMEOUT_MESSAGE));
    }

    #[tokio::test]
    async fn busy_loop_is_killed() {
        let outcome = run("while :; do :; done", "", Duration::from_millis(200)).await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.stderr, TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn self_inflicted_signal_is_named() {
        let outcome = run("kill -9 $$", "", LONG).await;
        assert_eq!(outcome.exit_code, None);
        assert_eq!(outcome.signal.as_deref(), Some("SIGKILL"));
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn output_beyond_limit_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(&SandboxConfig::builder().max_output_bytes(1000).build());
        let outcome = runner
            .run(&sh("head -c 50000 /dev/zero"), dir.path(), "", LONG)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.len(), 1000);
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn runs_inside_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let outcome = runner()
            .run(&sh("cat marker.txt; echo; echo $HOME"), dir.path(), "", LONG)
            .await
            .unwrap();
        let mut lines = outcome.stdout.lines();
        assert_eq!(lines.next(), Some("here"));
        assert_eq!(lines.next(), dir.path().to_str());
    }

    /// Alive and not a zombie awaiting its reaper
    fn is_running(pid: i32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z')
        })
    }

    async fn wait_until_gone(pid: i32) -> bool {
        for _ in 0..40 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    async fn read_pid(path: &Path) -> i32 {
        for _ in 0..40 {
            let pid = std::fs::read_to_string(path)
                .ok()
                .and_then(|s| s.trim().parse().ok());
            if let Some(pid) = pid {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("pid file {} never written", path.display());
    }

    #[tokio::test]
    async fn background_jobs_die_with_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner()
            .run(&sh("sleep 60 > /dev/null 2>&1 & echo $! > job.pid"), dir.path(), "", LONG)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(0));

        let pid = read_pid(&dir.path().join("job.pid")).await;
        assert!(wait_until_gone(pid).await, "background job {pid} survived");
    }

    #[tokio::test]
    async fn cancelled_run_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = sh("sleep 60 & echo $! > job.pid; wait");
        let runner = runner();
        let run = runner.run(&script, dir.path(), "", LONG);

        let cancelled = tokio::time::timeout(Duration::from_millis(300), run).await;
        assert!(cancelled.is_err());

        let pid = read_pid(&dir.path().join("job.pid")).await;
        assert!(wait_until_gone(pid).await, "background job {pid} outlived cancellation");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("sandpit-no-such-interpreter", ["main.x"]);
        let err = runner().run(&cmd, dir.path(), "", LONG).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { ref program, .. } if program == "sandpit-no-such-interpreter"));
    }
}
