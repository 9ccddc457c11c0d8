// EN: src/system/executor.rs

use crate::CancellationToken;
use scopeguard::ScopeGuard;
use std::io::Read;
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a running child is polled for completion, timeout and
/// cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' exited with status {code}.")]
    NonZeroExitStatus { command: String, code: i32 },
    #[error("Command '{command}' timed out after {seconds}s.")]
    Timeout { command: String, seconds: u64 },
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// Builds a command that runs `command_line` through the platform shell, so
/// pipes, redirections and quoting behave as they would when typed.
fn shell_command(command_line: &str) -> StdCommand {
    if cfg!(target_os = "windows") {
        let mut command = StdCommand::new("cmd");
        command.arg("/C").arg(command_line);
        command
    } else {
        let mut command = StdCommand::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

/// Converts a timeout in seconds into an optional deadline; zero means none.
pub fn timeout_from_secs(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Runs a command with inherited stdio and waits for it, honoring the
/// timeout and the cancellation token.
pub fn execute_command(
    command_line: &str,
    timeout: Option<Duration>,
    cancellation_token: &CancellationToken,
) -> Result<(), ExecutionError> {
    let trimmed_command = command_line.trim();
    if trimmed_command.is_empty() {
        return Ok(()); // An empty command is a success, not an error.
    }

    let child = shell_command(trimmed_command)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(trimmed_command.to_string(), e))?;

    let status = wait_bounded(child, trimmed_command, timeout, cancellation_token)?;
    check_status(trimmed_command, status)
}

/// Runs a command and captures its standard output. Stderr is passed through
/// to the user's terminal. The child is killed when the timeout elapses or
/// the token is cancelled.
pub fn execute_and_capture_output(
    command_line: &str,
    timeout: Option<Duration>,
    cancellation_token: &CancellationToken,
) -> Result<String, ExecutionError> {
    // Pre-flight cancellation check.
    if cancellation_token.load(Ordering::SeqCst) {
        return Err(ExecutionError::Cancelled);
    }

    let trimmed_command = command_line.trim();
    if trimmed_command.is_empty() {
        return Ok(String::new());
    }

    let mut child = shell_command(trimmed_command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(trimmed_command.to_string(), e))?;

    // Drain stdout on a separate thread so a chatty child never blocks on a
    // full pipe while we poll it. The bytes come back over a channel so the
    // wait for them stays bounded.
    let started = Instant::now();
    let output = child.stdout.take().map(|mut stdout| {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let mut buffer = Vec::new();
            sender.send(stdout.read_to_end(&mut buffer).map(|_| buffer)).ok();
        });
        receiver
    });

    let status = wait_bounded(child, trimmed_command, timeout, cancellation_token)?;

    let bytes = match output {
        Some(receiver) => collect_output(
            &receiver,
            trimmed_command,
            timeout.map(|limit| limit.saturating_sub(started.elapsed())),
            cancellation_token,
        )?,
        None => Vec::new(),
    };
    check_status(trimmed_command, status)?;

    String::from_utf8(bytes).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: trimmed_command.to_string(),
        source: e,
    })
}

/// Non-blocking wait loop that enforces the deadline and cancellation.
///
/// The child is held in a scope guard that kills it on every early exit, so
/// no code path can leave an orphan process behind.
fn wait_bounded(
    child: Child,
    command_line: &str,
    timeout: Option<Duration>,
    cancellation_token: &CancellationToken,
) -> Result<ExitStatus, ExecutionError> {
    let started = Instant::now();
    let mut child = scopeguard::guard(child, |mut child| {
        log::debug!("Killing child process (PID: {})...", child.id());
        if let Err(e) = child.kill() {
            log::warn!("Failed to kill child process {}: {}", child.id(), e);
        }
        // Reap it so it does not linger as a zombie.
        child.wait().ok();
    });

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // Finished on its own: defuse the guard.
                ScopeGuard::into_inner(child);
                return Ok(status);
            }
            Ok(None) => {
                if cancellation_token.load(Ordering::SeqCst) {
                    log::debug!("Cancellation requested while running '{}'", command_line);
                    return Err(ExecutionError::Cancelled);
                }
                if let Some(limit) = timeout
                    && started.elapsed() >= limit
                {
                    return Err(ExecutionError::Timeout {
                        command: command_line.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
                // Wait briefly to avoid a tight loop consuming CPU.
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(ExecutionError::CommandFailed(command_line.to_string(), e));
            }
        }
    }
}

/// Waits for the reader thread's bytes after the child has exited.
///
/// A background grandchild can inherit the pipe and hold it open long after
/// its parent is gone, so this wait honors the remaining deadline and the
/// cancellation token too. The reader thread is left detached on early exit.
fn collect_output(
    receiver: &Receiver<std::io::Result<Vec<u8>>>,
    command_line: &str,
    remaining: Option<Duration>,
    cancellation_token: &CancellationToken,
) -> Result<Vec<u8>, ExecutionError> {
    let started = Instant::now();
    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(read) => {
                return read.map_err(|e| ExecutionError::CommandFailed(command_line.to_string(), e));
            }
            // The reader died without reporting; treat it as no output.
            Err(RecvTimeoutError::Disconnected) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Timeout) => {
                if cancellation_token.load(Ordering::SeqCst) {
                    return Err(ExecutionError::Cancelled);
                }
                if let Some(limit) = remaining
                    && started.elapsed() >= limit
                {
                    log::warn!("Output of '{}' is still held open by a background process", command_line);
                    return Err(ExecutionError::Timeout {
                        command: command_line.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            }
        }
    }
}

fn check_status(command_line: &str, status: ExitStatus) -> Result<(), ExecutionError> {
    if status.success() {
        return Ok(());
    }
    Err(ExecutionError::NonZeroExitStatus {
        command: command_line.to_string(),
        code: exit_code_of(status),
    })
}

/// The exit code of a finished child. A child killed by a signal reports the
/// shell convention `128 + signal`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_captures_stdout_through_the_shell() {
        let output = execute_and_capture_output("printf 'a b' | tr ' ' '-'", None, &token()).unwrap();
        assert_eq!(output, "a-b");
    }

    #[test]
    fn test_timeout_kills_the_child() {
        // --- Setup ---
        let started = Instant::now();

        // --- Execute ---
        let result =
            execute_and_capture_output("sleep 5", Some(Duration::from_millis(200)), &token());

        // --- Assert ---
        assert!(matches!(result, Err(ExecutionError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_background_grandchild_holding_stdout_does_not_block_past_the_timeout() {
        // --- Setup ---
        let started = Instant::now();

        // --- Execute ---
        // The shell exits at once but the backgrounded sleep keeps the pipe open.
        let result = execute_and_capture_output(
            "echo started; sleep 5 &",
            Some(Duration::from_millis(300)),
            &token(),
        );

        // --- Assert ---
        assert!(matches!(result, Err(ExecutionError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_cancellation_releases_a_held_stdout_pipe() {
        // --- Setup ---
        let cancel = token();
        let flag = Arc::clone(&cancel);
        let started = Instant::now();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
        });

        // --- Execute ---
        let result = execute_and_capture_output("sleep 5 &", None, &cancel);

        // --- Assert ---
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_non_zero_exit_reports_the_code() {
        let result = execute_command("exit 3", None, &token());
        assert!(matches!(
            result,
            Err(ExecutionError::NonZeroExitStatus { code: 3, .. })
        ));
    }

    #[test]
    fn test_cancelled_token_stops_before_spawning() {
        let cancelled = Arc::new(AtomicBool::new(true));
        let result = execute_and_capture_output("echo never", None, &cancelled);
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    }

    #[test]
    fn test_cancellation_while_running_kills_the_child() {
        // --- Setup ---
        let cancel = token();
        let trigger = Arc::clone(&cancel);
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trigger.store(true, Ordering::SeqCst);
        });

        // --- Execute ---
        let result = execute_command("sleep 5", None, &cancel);
        canceller.join().unwrap();

        // --- Assert ---
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    }

    #[test]
    fn test_zero_timeout_means_none() {
        assert_eq!(timeout_from_secs(0), None);
        assert_eq!(timeout_from_secs(2), Some(Duration::from_secs(2)));
    }
}
