//! External process collaborator
//!
//! The execution loop drives a [`CommandStream`]: a line-oriented output
//! stream with a finished signal and an idempotent exit. The production
//! implementation shells out via tokio; tests substitute a scripted stream
//! through the [`ProcessLauncher`] seam.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

/// A running external command's output stream
#[async_trait]
pub trait CommandStream: Send {
    /// Read one line. An empty string means "nothing yet" (bounded wait
    /// elapsed) or end of stream; check [`CommandStream::finished`] to tell
    /// them apart. The bounded wait is what keeps cancellation polling
    /// responsive while the process is quiet.
    async fn read_line(&mut self) -> Result<String>;

    /// True once the stream has reported end of output
    fn finished(&self) -> bool;

    /// Stop the process. Safe to call repeatedly and after the process has
    /// already ended.
    fn exit(&mut self);
}

/// Launches a [`CommandStream`] for a rendered command string
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, command: &str) -> Result<Box<dyn CommandStream>>;
}

/// Shell-based launcher: runs `<shell> -c <command>`
pub struct ShellLauncher {
    shell: String,
    read_timeout: Duration,
}

impl ShellLauncher {
    pub fn new(shell: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            read_timeout,
        }
    }
}

impl ProcessLauncher for ShellLauncher {
    fn launch(&self, command: &str) -> Result<Box<dyn CommandStream>> {
        debug!("spawning `{} -c {}`", self.shell, command);
        // stderr goes to null: an unread pipe would block the child once
        // the ~64KB buffer fills.
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{}` via {}", command, self.shell))?;

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture stdout pipe")?;

        Ok(Box::new(ShellProcess {
            child,
            lines: BufReader::new(stdout).lines(),
            finished: false,
            read_timeout: self.read_timeout,
        }))
    }
}

/// A spawned shell command, exclusively owned by one execution loop
pub struct ShellProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    finished: bool,
    read_timeout: Duration,
}

#[async_trait]
impl CommandStream for ShellProcess {
    async fn read_line(&mut self) -> Result<String> {
        if self.finished {
            return Ok(String::new());
        }

        match tokio::time::timeout(self.read_timeout, self.lines.next_line()).await {
            // Bounded wait elapsed; let the caller poll cancellation
            Err(_) => Ok(String::new()),
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => {
                self.finished = true;
                Ok(String::new())
            }
            Ok(Err(e)) => Err(e).context("Failed to read process output"),
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn exit(&mut self) {
        // start_kill is a no-op error when the process already ended
        if let Err(e) = self.child.start_kill() {
            debug!("process exit: {}", e);
        }
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_process_streams_lines_to_eof() {
        let launcher = ShellLauncher::new("/bin/sh", Duration::from_secs(5));
        let mut process = launcher.launch("printf 'one\\ntwo\\n'").unwrap();

        let mut lines = Vec::new();
        while !process.finished() {
            let line = process.read_line().await.unwrap();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_read_timeout_yields_empty_line() {
        let launcher = ShellLauncher::new("/bin/sh", Duration::from_millis(50));
        let mut process = launcher.launch("sleep 5").unwrap();

        let line = process.read_line().await.unwrap();
        assert!(line.is_empty());
        assert!(!process.finished());

        process.exit();
        assert!(process.finished());
    }

    #[tokio::test]
    async fn test_exit_is_idempotent() {
        let launcher = ShellLauncher::new("/bin/sh", Duration::from_millis(100));
        let mut process = launcher.launch("true").unwrap();
        process.exit();
        process.exit();
    }
}
