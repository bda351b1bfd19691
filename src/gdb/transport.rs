//! Line transports carrying MI traffic to and from GDB

use std::collections::{HashMap, VecDeque};
use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::mi;
use crate::error::GdbError;

/// Bidirectional line channel to a GDB instance
#[async_trait]
pub trait GdbTransport: Send {
    /// Write one command line
    async fn send(&mut self, line: &str) -> io::Result<()>;

    /// Next output line, or `None` once `deadline` passes. End of output is an
    /// error.
    async fn recv(&mut self, deadline: Instant) -> io::Result<Option<String>>;

    /// Close the input, wait up to `grace` for the process to exit, then kill it.
    /// Failures are logged.
    async fn shutdown(&mut self, grace: Duration);
}

/// GDB running as a child process
pub struct ProcessTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessTransport {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, GdbError> {
        info!("Starting GDB: {} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| GdbError::LaunchFailed(format!("Failed to spawn {}: {}", program, e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GdbError::LaunchFailed("GDB stdout is not piped".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("GDB stderr: {}", line);
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl GdbTransport for ProcessTransport {
    async fn send(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "GDB stdin is closed"))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    async fn recv(&mut self, deadline: Instant) -> io::Result<Option<String>> {
        match tokio::time::timeout_at(deadline, self.stdout.next_line()).await {
            Err(_) => Ok(None),
            Ok(Ok(Some(line))) => Ok(Some(line)),
            Ok(Ok(None)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "GDB closed its output",
            )),
            Ok(Err(e)) => Err(e),
        }
    }

    async fn shutdown(&mut self, grace: Duration) {
        drop(self.stdin.take());
        let deadline = Instant::now() + grace;

        // Draining the pipe hangs on Windows
        if !cfg!(windows) {
            while let Ok(Ok(Some(line))) =
                tokio::time::timeout_at(deadline, self.stdout.next_line()).await
            {
                debug!("GDB < {}", line);
            }
        }

        match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(Ok(status)) => debug!("GDB exited: {}", status),
            Ok(Err(e)) => warn!("Failed to wait for GDB: {}", e),
            Err(_) => {
                warn!("GDB did not exit within {:?}, killing it", grace);
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill GDB: {}", e);
                }
            }
        }
    }
}

/// Transport that answers each command with canned MI output.
///
/// Replies are looked up by command text without its token. A command may be
/// given several replies; they are used in order and the last one repeats.
/// Result records (`^...`) are sent back prefixed with the command's token.
/// An empty reply leaves GDB silent. Unknown commands get an `^error`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: HashMap<String, VecDeque<Vec<String>>>,
    pending: VecDeque<String>,
    sent: Vec<String>,
    closed: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines emitted before the first command, like GDB's startup output
    pub fn with_banner(mut self, lines: &[&str]) -> Self {
        self.pending.extend(lines.iter().map(|l| l.to_string()));
        self
    }

    /// Add a reply for `command`
    pub fn on(mut self, command: &str, reply: &[&str]) -> Self {
        self.replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Reply to a console command with `output` followed by `^done`
    pub fn on_console(self, console_cmd: &str, output: &str) -> Self {
        let command = format!("-interpreter-exec console \"{}\"", mi::escape(console_cmd));
        let stream = format!("~\"{}\\n\"", mi::escape(output));
        self.on(&command, &[stream.as_str(), "^done"])
    }

    /// Reply to `-data-evaluate-expression` with `value`
    pub fn on_expression(self, expr: &str, value: &str) -> Self {
        let command = format!("-data-evaluate-expression \"{}\"", mi::escape(expr));
        let result = format!("^done,value=\"{}\"", mi::escape(value));
        self.on(&command, &[result.as_str()])
    }

    /// Commands received so far, tokens stripped
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    fn reply_for(&mut self, command: &str) -> Vec<String> {
        match self.replies.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => vec![format!(
                "^error,msg=\"Undefined command: {}\"",
                mi::escape(command)
            )],
        }
    }
}

#[async_trait]
impl GdbTransport for ScriptedTransport {
    async fn send(&mut self, line: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        let (token, command) = line.split_at(digits);
        self.sent.push(command.to_string());

        for reply in self.reply_for(command) {
            if reply.starts_with('^') {
                self.pending.push_back(format!("{}{}", token, reply));
            } else {
                self.pending.push_back(reply);
            }
        }
        Ok(())
    }

    async fn recv(&mut self, deadline: Instant) -> io::Result<Option<String>> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(Some(line));
        }
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "transport closed"));
        }
        tokio::time::sleep_until(deadline).await;
        Ok(None)
    }

    async fn shutdown(&mut self, _grace: Duration) {
        self.closed = true;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_reply_gets_token() {
        let mut transport = ScriptedTransport::new().on("-thread-select 2", &["^done"]);
        transport.send("7-thread-select 2").await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        assert_eq!(
            transport.recv(deadline).await.unwrap().as_deref(),
            Some("7^done")
        );
        assert_eq!(transport.recv(deadline).await.unwrap(), None);
        assert_eq!(transport.sent(), &["-thread-select 2".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_reply_sequence() {
        let mut transport = ScriptedTransport::new()
            .on("-thread-info", &[])
            .on("-thread-info", &["^done"]);
        let deadline = Instant::now() + Duration::from_millis(20);

        transport.send("1-thread-info").await.unwrap();
        assert_eq!(transport.recv(deadline).await.unwrap(), None);

        transport.send("2-thread-info").await.unwrap();
        assert_eq!(transport.recv(deadline).await.unwrap().as_deref(), Some("2^done"));

        // Last reply repeats
        transport.send("3-thread-info").await.unwrap();
        assert_eq!(transport.recv(deadline).await.unwrap().as_deref(), Some("3^done"));
    }

    #[tokio::test]
    async fn test_console_helper_escapes_output() {
        let mut transport = ScriptedTransport::new().on_console("bt", "#0  app_main () at \"main.c\":10");
        transport
            .send("4-interpreter-exec console \"bt\"")
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let line = transport.recv(deadline).await.unwrap().unwrap();
        assert_eq!(line, r##"~"#0  app_main () at \"main.c\":10\n""##);
    }

    #[tokio::test]
    async fn test_unknown_command_errors() {
        let mut transport = ScriptedTransport::new();
        transport.send("9-foo").await.unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let line = transport.recv(deadline).await.unwrap().unwrap();
        assert!(line.starts_with("9^error"));
    }

    #[tokio::test]
    async fn test_closed_transport() {
        let mut transport = ScriptedTransport::new();
        transport.shutdown(Duration::from_millis(1)).await;
        assert!(transport.send("1-gdb-exit").await.is_err());
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(transport.recv(deadline).await.is_err());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = ProcessTransport::spawn("/nonexistent/xtensa-esp32-elf-gdb", &[]);
        assert!(matches!(result, Err(GdbError::LaunchFailed(_))));
    }
}
