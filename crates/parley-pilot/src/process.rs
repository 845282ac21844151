//! Process session management.
//!
//! [`ProcessSession`] launches the engine under test with stdout and stderr
//! joined onto a single pipe, so lines reach the [`OutputBuffer`] in the
//! order the engine wrote them. In one-shot mode the call runs the engine to
//! completion; in interactive mode a drain thread keeps feeding the buffer
//! while the test thread writes commands.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use tracing::{debug, info, warn};

use parley_types::{HarnessConfig, ParleyError, TerminatorRule};

use crate::output::OutputBuffer;
use crate::terminate::{self, TerminateConfig};

/// How long to wait for the drain thread to see end-of-stream after the
/// child has been reaped.
const DRAIN_SETTLE: Duration = Duration::from_secs(5);

/// Options for launching a process session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Wrapper tokens placed before the executable (e.g. a valgrind launcher).
    pub prefix: Vec<String>,
    /// The engine binary.
    pub executable: PathBuf,
    /// Arguments passed to the engine.
    pub args: Vec<String>,
    /// Working directory for the child; inherits the harness cwd when unset.
    pub working_dir: Option<PathBuf>,
    /// Additional environment variables for the child process.
    pub env: Vec<(String, String)>,
    /// Run to completion and capture everything (one-shot mode).
    pub capture_combined_output: bool,
    /// Command that asks the engine to shut down.
    pub quit_command: String,
    /// Appended to every command line.
    pub line_terminator: String,
    /// Per-command-class response terminators.
    pub terminators: Vec<TerminatorRule>,
    /// Upper bound on a one-shot run.
    pub oneshot_timeout: Duration,
    /// Grace period `close()` grants before signalling.
    pub close_grace: Duration,
}

impl SessionOptions {
    /// Options for `executable` with protocol settings taken from `config`.
    pub fn new(executable: impl Into<PathBuf>, config: &HarnessConfig) -> Self {
        Self {
            prefix: Vec::new(),
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            capture_combined_output: false,
            quit_command: config.quit_command.clone(),
            line_terminator: config.line_terminator.clone(),
            terminators: config.terminators.clone(),
            oneshot_timeout: config.oneshot_timeout(),
            close_grace: config.close_grace(),
        }
    }

    pub fn prefix(mut self, prefix: Vec<String>) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn one_shot(mut self, capture_combined_output: bool) -> Self {
        self.capture_combined_output = capture_combined_output;
        self
    }

    /// The full argv, wrapper tokens first.
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.push(self.executable.display().to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// A running (or finished) engine process.
#[derive(Debug)]
pub struct ProcessSession {
    child: Child,
    stdin: Option<ChildStdin>,
    output: Arc<OutputBuffer>,
    drain: Option<JoinHandle<()>>,
    exit_code: Option<i32>,
    timed_out: bool,
    pending_terminal: Option<String>,
    options: SessionOptions,
}

impl ProcessSession {
    /// Launch a session.
    ///
    /// With `capture_combined_output` set, blocks until the process exits
    /// (or the one-shot timeout kills it) and records its exit code.
    /// Otherwise returns immediately with the process running.
    pub fn start(options: SessionOptions) -> Result<Self, ParleyError> {
        let argv = options.command_line();
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| ParleyError::SpawnError("empty command line".into()))?;

        let (reader, writer) = combined_pipe()?;

        let mut child = {
            let mut cmd = Command::new(program);
            cmd.args(rest)
                .stdout(Stdio::from(writer.try_clone().map_err(|e| {
                    ParleyError::SpawnError(format!("dup output pipe: {e}"))
                })?))
                .stderr(Stdio::from(writer));
            if options.capture_combined_output {
                cmd.stdin(Stdio::null());
            } else {
                cmd.stdin(Stdio::piped());
            }
            if let Some(dir) = &options.working_dir {
                cmd.current_dir(dir);
            }
            for (key, value) in &options.env {
                cmd.env(key, value);
            }
            // `cmd` drops at the end of this block, closing our copies of the
            // write end so the reader sees EOF once the child exits.
            cmd.spawn()
                .map_err(|e| ParleyError::SpawnError(format!("{program}: {e}")))?
        };

        let pid = child.id();
        info!(pid, command = %argv.join(" "), one_shot = options.capture_combined_output, "spawned engine");

        let output = Arc::new(OutputBuffer::new());
        let drain = spawn_drain(pid, File::from(reader), Arc::clone(&output))?;
        let stdin = child.stdin.take();

        let mut session = Self {
            child,
            stdin,
            output,
            drain: Some(drain),
            exit_code: None,
            timed_out: false,
            pending_terminal: None,
            options,
        };

        if session.options.capture_combined_output {
            session.run_to_completion()?;
        }
        Ok(session)
    }

    fn run_to_completion(&mut self) -> Result<(), ParleyError> {
        let deadline = Instant::now() + self.options.oneshot_timeout;
        let code = match terminate::wait_until(&mut self.child, deadline, Duration::from_millis(10))? {
            Some(status) => terminate::exit_code_of(status),
            None => {
                self.timed_out = true;
                warn!(
                    pid = self.child.id(),
                    timeout = ?self.options.oneshot_timeout,
                    "one-shot run exceeded its timeout"
                );
                let config = TerminateConfig {
                    grace_period: Duration::ZERO,
                    ..TerminateConfig::default()
                };
                terminate::forced_exit_code(
                    terminate::terminate_with_escalation(&mut self.child, &config)?.0,
                )
            }
        };
        self.settle(code);
        Ok(())
    }

    /// Write `line` plus the line terminator to the engine's stdin.
    ///
    /// Does not wait for any response. Fails with
    /// [`ParleyError::SessionClosed`] once the process has exited or its
    /// input was closed.
    pub fn send_command(&mut self, line: &str) -> Result<(), ParleyError> {
        if let Some(code) = self.poll_exit()? {
            return Err(ParleyError::SessionClosed(format!(
                "process exited with code {code}"
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ParleyError::SessionClosed("stdin is closed".into()))?;

        let mut data = String::with_capacity(line.len() + self.options.line_terminator.len());
        data.push_str(line);
        data.push_str(&self.options.line_terminator);
        let written = stdin.write_all(data.as_bytes()).and_then(|()| stdin.flush());
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                self.stdin = None;
                return Err(ParleyError::SessionClosed(format!("write {line:?}: {e}")));
            }
            Err(e) => return Err(ParleyError::IoError(format!("write {line:?}: {e}"))),
        }

        debug!(pid = self.child.id(), command = line, "sent command");
        self.pending_terminal = self.terminal_for(line);
        Ok(())
    }

    /// Ask the engine to shut down.
    pub fn quit(&mut self) -> Result<(), ParleyError> {
        let command = self.options.quit_command.clone();
        self.send_command(&command)
    }

    /// Wait for the process to exit and return its exit code.
    ///
    /// Closes stdin, waits up to the grace period, then escalates to
    /// SIGTERM and SIGKILL. A process that had to be signalled never
    /// reports 0: it gets `-signum`, or `-SIGTERM` if it exited cleanly on
    /// the signal. Repeated calls return the same code.
    pub fn close(&mut self) -> Result<i32, ParleyError> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        self.stdin = None;

        let config = TerminateConfig {
            grace_period: self.options.close_grace,
            ..TerminateConfig::default()
        };
        let (status, signalled) = terminate::terminate_with_escalation(&mut self.child, &config)?;
        let code = if signalled {
            let code = terminate::forced_exit_code(status);
            warn!(pid = self.child.id(), code, "engine was forcibly terminated");
            code
        } else {
            let code = terminate::exit_code_of(status);
            debug!(pid = self.child.id(), code, "engine exited");
            code
        };
        self.settle(code);
        Ok(code)
    }

    fn settle(&mut self, code: i32) {
        self.exit_code = Some(code);
        self.stdin = None;
        if !self.output.wait_closed(DRAIN_SETTLE) {
            // A grandchild still holds the pipe; stop waiting for it.
            warn!(pid = self.child.id(), "output pipe still open after exit");
            self.output.finish();
        }
        if let Some(handle) = self.drain.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    /// Check for an exit without blocking, recording the code if found.
    pub fn poll_exit(&mut self) -> Result<Option<i32>, ParleyError> {
        if self.exit_code.is_some() {
            return Ok(self.exit_code);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let code = terminate::exit_code_of(status);
                self.settle(code);
                Ok(Some(code))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(ParleyError::IoError(format!("waitpid: {e}"))),
        }
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.poll_exit(), Ok(None))
    }

    /// Whether a one-shot run was killed for exceeding its timeout.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// The recorded exit code, if the process has terminated.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Full retained history since the last clear.
    pub fn output(&self) -> Vec<String> {
        self.output.snapshot()
    }

    /// Move the retained history out and forget the pending response unit.
    ///
    /// Unlike `output()` followed by `clear_output()`, no line can slip in
    /// between the copy and the clear.
    pub fn take_output(&mut self) -> Vec<String> {
        self.pending_terminal = None;
        self.output.take()
    }

    /// Drop the retained history and forget the pending response unit.
    pub fn clear_output(&mut self) {
        self.output.clear();
        self.pending_terminal = None;
    }

    /// The shared buffer the drain thread writes into.
    pub fn buffer(&self) -> &Arc<OutputBuffer> {
        &self.output
    }

    /// Terminal-line prefix of the response unit currently being read.
    pub fn pending_terminal(&self) -> Option<&str> {
        self.pending_terminal.as_deref()
    }

    /// Mark the current response unit as fully read.
    pub fn finish_response(&mut self) {
        self.pending_terminal = None;
    }

    fn terminal_for(&self, line: &str) -> Option<String> {
        let verb = line.split_whitespace().next()?;
        self.options
            .terminators
            .iter()
            .find(|rule| rule.command == verb)
            .map(|rule| rule.terminal_prefix.clone())
    }

    /// The child's process ID.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        // Best effort: never leave an engine running behind a finished suite.
        if self.exit_code.is_none() {
            self.stdin = None;
            if matches!(self.child.try_wait(), Ok(None)) {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// A pipe whose write end becomes both stdout and stderr of the child.
///
/// Both ends are close-on-exec so sibling sessions never inherit them; the
/// `dup2` performed by `Command` clears the flag on fds 1 and 2 only.
fn combined_pipe() -> Result<(OwnedFd, OwnedFd), ParleyError> {
    let (reader, writer) =
        nix::unistd::pipe().map_err(|e| ParleyError::SpawnError(format!("pipe: {e}")))?;
    for fd in [&reader, &writer] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| ParleyError::SpawnError(format!("fcntl F_SETFD: {e}")))?;
    }
    Ok((reader, writer))
}

fn spawn_drain(
    pid: u32,
    mut source: File,
    output: Arc<OutputBuffer>,
) -> Result<JoinHandle<()>, ParleyError> {
    std::thread::Builder::new()
        .name(format!("parley-drain-{pid}"))
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        output.feed(&buf[..n]);
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(pid, error = %e, "output drain failed");
                        break;
                    }
                }
            }
            output.finish();
            debug!(pid, "output drain finished");
        })
        .map_err(|e| ParleyError::SpawnError(format!("drain thread: {e}")))
}
