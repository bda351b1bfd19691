//! GDB/MI session driver
//!
//! A [`GdbSession`] sends tokenized MI commands over a [`GdbTransport`] and
//! collects the records that answer them. Every wait is bounded by the
//! session timeout, so a hung GDB surfaces as [`GdbError::NoResponse`] instead
//! of blocking forever.

pub mod mi;
pub mod transport;

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GdbError;
use crate::image::BinaryImage;
pub use mi::{MiRecord, RecordKind};
pub use transport::{GdbTransport, ProcessTransport, ScriptedTransport};

pub const DEFAULT_GDB_TIMEOUT_SEC: u64 = 3;
/// Attempts made by [`GdbSession::thread_info_with_retry`]
pub const THREAD_INFO_ATTEMPTS: u32 = 3;
/// First command sent; its reply shows GDB has loaded the core
pub const HANDSHAKE_COMMAND: &str = "-data-list-register-values x pc";

const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a [`GdbSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    /// A command was sent and its reply is being collected
    AwaitingResponse,
    Terminated,
}

/// One entry of `-thread-info`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThreadInfo {
    pub id: String,
    #[serde(rename = "target-id")]
    pub target_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub frame: Option<Value>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThreadList {
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
    #[serde(rename = "current-thread-id", default)]
    pub current_thread_id: Option<String>,
}

impl ThreadList {
    pub fn current(&self) -> Option<&ThreadInfo> {
        let id = self.current_thread_id.as_deref()?;
        self.threads.iter().find(|t| t.id == id)
    }
}

pub struct GdbSession<T: GdbTransport> {
    transport: T,
    timeout: Duration,
    state: SessionState,
    next_token: u64,
}

impl GdbSession<ProcessTransport> {
    /// Spawn GDB and wait until it answers the handshake
    pub async fn launch(program: &str, args: &[String], timeout: Duration) -> Result<Self, GdbError> {
        let transport = ProcessTransport::spawn(program, args)?;
        Self::start(transport, timeout).await
    }
}

impl<T: GdbTransport> GdbSession<T> {
    /// Take over a transport and perform the handshake
    pub async fn start(transport: T, timeout: Duration) -> Result<Self, GdbError> {
        let mut session = Self {
            transport,
            timeout,
            state: SessionState::Starting,
            next_token: 1,
        };

        session
            .run_cmd_get_responses(
                HANDSHAKE_COMMAND,
                None,
                RecordKind::Console,
                true,
                Some(("done", RecordKind::Result)),
                None,
            )
            .await?;
        session.state = SessionState::Ready;
        info!("GDB session ready");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `cmd` and collect records of the given `message` and `kind`.
    ///
    /// A single-result call returns as soon as one record matches. A
    /// multi-result call collects until the `done` record arrives or the wait
    /// (`delay`, else the session timeout) runs out. Result records answering
    /// an older command are skipped.
    pub async fn run_cmd_get_responses(
        &mut self,
        cmd: &str,
        message: Option<&str>,
        kind: RecordKind,
        multiple: bool,
        done: Option<(&str, RecordKind)>,
        delay: Option<Duration>,
    ) -> Result<Vec<MiRecord>, GdbError> {
        if self.state == SessionState::Terminated {
            return Err(GdbError::Terminated);
        }

        let resume = self.state;
        self.state = SessionState::AwaitingResponse;
        let result = self.exchange(cmd, message, kind, multiple, done, delay).await;
        if self.state == SessionState::AwaitingResponse {
            self.state = resume;
        }
        result
    }

    async fn exchange(
        &mut self,
        cmd: &str,
        message: Option<&str>,
        kind: RecordKind,
        multiple: bool,
        done: Option<(&str, RecordKind)>,
        delay: Option<Duration>,
    ) -> Result<Vec<MiRecord>, GdbError> {
        let token = self.next_token;
        self.next_token += 1;
        debug!("GDB > {}{}", token, cmd);
        if let Err(e) = self.transport.send(&format!("{}{}", token, cmd)).await {
            self.state = SessionState::Terminated;
            return Err(e.into());
        }

        let deadline = Instant::now() + delay.unwrap_or(self.timeout);
        let mut responses = Vec::new();
        let mut observed = Vec::new();

        loop {
            let line = match self.transport.recv(deadline).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.state = SessionState::Terminated;
                    return Err(e.into());
                }
            };
            debug!("GDB < {}", line);
            let record = mi::parse_line(&line);
            observed.push(line);

            if record.kind == RecordKind::Result && record.token.is_some_and(|t| t != token) {
                debug!("Skipping stale record for token {:?}", record.token);
                continue;
            }

            if record.is(Some("error"), RecordKind::Result) {
                if multiple {
                    break;
                }
                let msg = record.payload["msg"].as_str().unwrap_or_default().to_string();
                return Err(GdbError::CommandFailed {
                    command: cmd.to_string(),
                    message: msg,
                });
            }

            if record.is(message, kind) {
                responses.push(record.clone());
                if !multiple {
                    return Ok(responses);
                }
            }

            if let Some((done_message, done_kind)) = done {
                if record.is(Some(done_message), done_kind) {
                    break;
                }
            }
        }

        if !multiple && responses.is_empty() {
            return Err(GdbError::NoResponse {
                command: cmd.to_string(),
                message: message.unwrap_or_default().to_string(),
                kind: kind.as_str().to_string(),
                observed: observed.join("\n"),
            });
        }
        Ok(responses)
    }

    pub async fn run_cmd_get_one_response(
        &mut self,
        cmd: &str,
        message: Option<&str>,
        kind: RecordKind,
    ) -> Result<MiRecord, GdbError> {
        let mut responses = self
            .run_cmd_get_responses(cmd, message, kind, false, None, None)
            .await?;
        responses.pop().ok_or_else(|| GdbError::MissingField("payload".to_string()))
    }

    pub async fn data_evaluate_expression(&mut self, expr: &str) -> Result<String, GdbError> {
        let cmd = format!("-data-evaluate-expression \"{}\"", mi::escape(expr));
        let record = self
            .run_cmd_get_one_response(&cmd, Some("done"), RecordKind::Result)
            .await?;
        record.payload["value"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GdbError::MissingField("value".to_string()))
    }

    /// Run a console command and return what it printed
    pub async fn run_cmd(&mut self, cmd: &str) -> Result<String, GdbError> {
        let mi_cmd = format!("-interpreter-exec console \"{}\"", mi::escape(cmd));
        let responses = self
            .run_cmd_get_responses(
                &mi_cmd,
                None,
                RecordKind::Console,
                true,
                Some(("done", RecordKind::Result)),
                None,
            )
            .await?;

        let text: String = responses
            .iter()
            .filter_map(|r| r.payload.as_str())
            .collect();
        Ok(text
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\\"", "\"")
            .trim_end_matches('\n')
            .to_string())
    }

    pub async fn get_thread_info(&mut self, delay: Option<Duration>) -> Result<ThreadList, GdbError> {
        let mut responses = self
            .run_cmd_get_responses("-thread-info", Some("done"), RecordKind::Result, false, None, delay)
            .await?;
        let record = responses
            .pop()
            .ok_or_else(|| GdbError::MissingField("threads".to_string()))?;
        serde_json::from_value(record.payload)
            .map_err(|e| GdbError::MissingField(format!("threads ({})", e)))
    }

    /// `-thread-info`, retried with a growing timeout.
    ///
    /// Listing threads makes GDB walk every task's stack, which can take a
    /// while on large dumps. Returns `None` when every attempt failed.
    pub async fn thread_info_with_retry(&mut self) -> Option<ThreadList> {
        for attempt in 1..=THREAD_INFO_ATTEMPTS {
            let delay = self.timeout * attempt;
            match self.get_thread_info(Some(delay)).await {
                Ok(threads) => return Some(threads),
                Err(GdbError::Terminated) | Err(GdbError::Pipe(_)) => return None,
                Err(e) => warn!("Thread info attempt {} failed: {}", attempt, e),
            }
        }
        None
    }

    pub async fn switch_thread(&mut self, id: &str) -> Result<(), GdbError> {
        self.run_cmd_get_one_response(&format!("-thread-select {}", id), Some("done"), RecordKind::Result)
            .await?;
        Ok(())
    }

    pub async fn add_symbol_file(&mut self, path: &Path, image: &BinaryImage) -> Result<(), GdbError> {
        match symbol_file_command(path, image) {
            Some(cmd) => {
                self.run_cmd(&cmd).await?;
                Ok(())
            }
            None => {
                warn!("{} has no .text section, symbols not loaded", path.display());
                Ok(())
            }
        }
    }

    /// Value of a FreeRTOS TCB field as GDB prints it; empty when unreadable
    pub async fn get_tcb_variable(&mut self, tcb_address: u32, field: &str) -> String {
        let expr = format!("(char*)((TCB_t *)0x{:x})->{}", tcb_address, field);
        match self.data_evaluate_expression(&expr).await {
            Ok(value) => value,
            Err(e) => {
                debug!("Cannot read {} of TCB 0x{:x}: {}", field, tcb_address, e);
                String::new()
            }
        }
    }

    pub async fn get_freertos_task_name(&mut self, tcb_address: u32) -> String {
        let value = self.get_tcb_variable(tcb_address, "pcTaskName").await;
        parse_task_name(&value)
    }

    /// Ask GDB to exit and release the process. Never fails.
    pub async fn close(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        let token = self.next_token;
        self.next_token += 1;
        if let Err(e) = self.transport.send(&format!("{}-gdb-exit", token)).await {
            debug!("Failed to send -gdb-exit: {}", e);
        }
        self.transport.shutdown(EXIT_GRACE).await;
        self.state = SessionState::Terminated;
    }
}

/// First hex literal of a TCB field value, e.g. `0x3ffb5e94` from
/// `0x3ffb5e94 ""`; empty when there is none
pub fn parse_tcb_variable(value: &str) -> String {
    let Ok(re) = Regex::new(r"0x[0-9a-fA-F]+") else {
        return String::new();
    };
    re.find(value)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Task name from a `pcTaskName` value printed as `0x3ffb5e94 "main"`
pub fn parse_task_name(value: &str) -> String {
    let Ok(re) = Regex::new(r#""([^']*)"$"#) else {
        return String::new();
    };
    re.captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// `add-symbol-file` command loading `path` at its `.text` address
pub fn symbol_file_command(path: &Path, image: &BinaryImage) -> Option<String> {
    let text = image.section(".text")?;
    Some(format!("add-symbol-file {} 0x{:x}", path.display(), text.address))
}

/// TCB address from a thread's `target-id`, e.g. `process 1073413512`
pub fn gdb_thread_to_tcb(target_id: &str) -> Result<u32, GdbError> {
    let invalid = || GdbError::InvalidThreadId(target_id.to_string());
    let number = target_id.split_whitespace().nth(1).ok_or_else(invalid)?;

    let (digits, radix) = if let Some(hex) = number.strip_prefix("0x").or_else(|| number.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(oct) = number.strip_prefix("0o") {
        (oct, 8)
    } else if let Some(bin) = number.strip_prefix("0b") {
        (bin, 2)
    } else {
        (number, 10)
    };
    u32::from_str_radix(digits, radix).map_err(|_| invalid())
}
