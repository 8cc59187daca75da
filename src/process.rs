//! Host command execution.
//!
//! A small builder over [`std::process::Command`] that captures output,
//! turns non-zero exits into errors carrying stderr, and logs every
//! invocation at debug level.
//!
//! ```rust,ignore
//! use disk_builder::process::Cmd;
//!
//! Cmd::new("mkfs.ext4")
//!     .args(["-q", "-L", "COS_RECOVERY"])
//!     .arg_path(&partition)
//!     .error_msg("mkfs.ext4 failed")
//!     .run()?;
//! ```

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

/// Check if a command exists on the host system.
pub fn exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Return the first of `candidates` found in PATH.
pub fn find_first(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().find_map(|c| which::which(c).ok())
}

/// True when the effective user is root.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Command builder.
#[derive(Debug)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            stdin: None,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Bytes written to the child's stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Message prefixed to the error when the command fails.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Return the result instead of failing on a non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn run(self) -> Result<CmdResult> {
        let shown = self.display();
        tracing::debug!(command = %shown, "running");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", shown))?;

        // Fed from its own thread so a child filling its stdout pipe before
        // draining stdin cannot block both sides.
        let writer = match (self.stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(thread::spawn(move || pipe.write_all(&input))),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for '{}'", shown))?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The child exited without reading everything; its status decides.
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(e).with_context(|| format!("Failed to write stdin of '{}'", shown))
                }
                Err(_) => bail!("stdin writer for '{}' panicked", shown),
            }
        }

        let result = CmdResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() && !self.allow_fail {
            let prefix = self
                .error_msg
                .unwrap_or_else(|| format!("'{}' failed", shown));
            bail!(
                "{} ({}): {}",
                prefix,
                result.status,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists() {
        assert!(exists("sh"));
        assert!(!exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_run_captures_stdout() {
        let out = Cmd::new("sh").args(["-c", "echo hello"]).run().unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_failure_carries_message_and_stderr() {
        let err = Cmd::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .error_msg("mkfs failed")
            .run()
            .unwrap_err()
            .to_string();
        assert!(err.contains("mkfs failed"));
        assert!(err.contains("broken"));
    }

    #[test]
    fn test_allow_fail_returns_status() {
        let out = Cmd::new("sh")
            .args(["-c", "exit 1"])
            .allow_fail()
            .run()
            .unwrap();
        assert!(!out.success());
    }

    #[test]
    fn test_stdin_is_forwarded() {
        let out = Cmd::new("cat").stdin("label: gpt\n").run().unwrap();
        assert_eq!(out.stdout, "label: gpt\n");
    }

    #[test]
    fn test_large_stdin_with_early_output() {
        // Output larger than a pipe buffer before any input is read.
        let out = Cmd::new("sh")
            .args(["-c", "head -c 300000 /dev/zero; cat >/dev/null"])
            .stdin(vec![b'x'; 1 << 20])
            .run()
            .unwrap();
        assert_eq!(out.stdout.len(), 300000);
    }

    #[test]
    fn test_unread_stdin_is_not_an_error() {
        let out = Cmd::new("true").stdin(vec![b'x'; 1 << 20]).run().unwrap();
        assert!(out.success());
    }
}
