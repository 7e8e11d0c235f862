// src/terminal/session.rs
//! Line editor and command dispatch for one terminal connection
//!
//! Bytes are accumulated into a line buffer with echo and backspace
//! handling. A finished line is dispatched as a command through the same
//! correlation protocol as HTTP calls, but against a registry private to
//! this connection. There is no cross-process forwarding for terminals.
//! The read half stays watched while a command is pending, so a peer that
//! hangs up ends the command as `Cancelled`.

use crate::broker::event_bus::{EventBus, Notification, TerminalCallNotice, TerminalKind};
use crate::broker::pending::PendingRegistry;
use crate::interception::handler::settle;
use crate::observability::CALLS_TOTAL;
use crate::recording::models::CallStatus;
use crate::recording::storage::MockStore;
use crate::utils::errors::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const WELCOME: &str = "Welcome to the mockhub terminal server!\r\n";
pub const PROMPT: &str = "> ";
pub const FAREWELL: &str = "Goodbye!\r\n";

const BACKSPACE: u8 = 8;
const DELETE: u8 = 127;
const ERASE: &[u8] = b"\x08 \x08";
const READ_CHUNK: usize = 1024;

/// Result of one dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub request_id: String,
    pub status: CallStatus,
    pub body: String,
}

/// Resolves commands against terminal configurations and operators
pub struct TerminalDispatcher {
    store: Arc<MockStore>,
    bus: Arc<EventBus>,
    registry: PendingRegistry,
    wait_timeout: Duration,
}

impl TerminalDispatcher {
    pub fn new(store: Arc<MockStore>, bus: Arc<EventBus>, wait_timeout: Duration) -> Self {
        Self {
            store,
            bus,
            registry: PendingRegistry::new(),
            wait_timeout,
        }
    }

    /// Pending commands of this connection
    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// Run one command to completion. `caller_gone` fires when the
    /// terminal peer hangs up; the command then ends as `Cancelled` with
    /// an empty body.
    pub async fn dispatch(&self, command: &str, caller_gone: &CancellationToken) -> Result<CommandOutcome> {
        let (default_response, project) = match self.store.ssh_config_for_command(command).await? {
            Some(config) => (config.response, config.project),
            None => (format!("Command '{}' not found.", command), String::new()),
        };
        let request_id = ulid::Ulid::new().to_string();

        if self.bus.interactive_count() == 0 {
            self.record_new(&request_id, command, &project, &default_response, CallStatus::AutoResponded)
                .await;
            return Ok(finish(request_id, CallStatus::AutoResponded, default_response));
        }

        self.record_new(&request_id, command, &project, "", CallStatus::Pending)
            .await;
        let mut slot = self.registry.register(&request_id, &default_response);
        self.bus.publish(&Notification::Terminal(TerminalCallNotice {
            request_id: request_id.clone(),
            command: command.to_string(),
            project,
            default_response: default_response.clone(),
            kind: TerminalKind::Ssh,
        }));

        // An answer already in the slot beats a zero deadline
        let (status, body) = tokio::select! {
            biased;
            resolution = slot.recv() => settle(resolution, &default_response, self.wait_timeout),
            _ = caller_gone.cancelled() => {
                slot.close();
                (CallStatus::Cancelled, String::new())
            }
            _ = tokio::time::sleep(self.wait_timeout) => settle(slot.close(), &default_response, self.wait_timeout),
        };

        self.registry.release(&request_id);
        if let Err(e) = self.store.update_ssh_event(&request_id, &body, status).await {
            warn!("Failed to update terminal event {}: {}", request_id, e);
        }
        debug!("Command {} finished as {}", request_id, status);

        Ok(finish(request_id, status, body))
    }

    async fn record_new(&self, request_id: &str, command: &str, project: &str, body: &str, status: CallStatus) {
        if let Err(e) = self
            .store
            .create_ssh_event(request_id, command, project, body, status)
            .await
        {
            warn!("Failed to save terminal event {}: {}", request_id, e);
        }
    }
}

fn finish(request_id: String, status: CallStatus, body: String) -> CommandOutcome {
    metrics::counter!(CALLS_TOTAL, "outcome" => status.metric_label()).increment(1);
    CommandOutcome {
        request_id,
        status,
        body,
    }
}

enum Flow {
    Continue,
    /// `exit` was typed
    Close,
    /// The peer went away
    Hangup,
}

/// Interactive session over any byte stream
pub struct TerminalSession<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    dispatcher: TerminalDispatcher,
    line: Vec<u8>,
    /// Input that arrived while a command was pending
    backlog: VecDeque<u8>,
}

impl<S> TerminalSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, dispatcher: TerminalDispatcher) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            dispatcher,
            line: Vec::new(),
            backlog: VecDeque::new(),
        }
    }

    /// Drive the session until `exit` or end of stream
    pub async fn run(mut self) -> Result<()> {
        self.write(WELCOME.as_bytes()).await?;
        self.write(PROMPT.as_bytes()).await?;

        let mut buf = [0u8; READ_CHUNK];
        loop {
            if self.backlog.is_empty() {
                let n = self.reader.read(&mut buf).await?;
                if n == 0 {
                    debug!("Terminal peer closed the stream");
                    return Ok(());
                }
                self.backlog.extend(&buf[..n]);
            }

            while let Some(byte) = self.backlog.pop_front() {
                match self.feed(byte).await? {
                    Flow::Continue => {}
                    Flow::Close => {
                        self.writer.shutdown().await?;
                        return Ok(());
                    }
                    Flow::Hangup => {
                        info!("Terminal peer hung up during a pending command");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn feed(&mut self, byte: u8) -> Result<Flow> {
        match byte {
            b'\r' | b'\n' => {
                self.write(b"\r\n").await?;
                let command = String::from_utf8_lossy(&self.line).trim().to_string();
                self.line.clear();

                if command == "exit" {
                    self.write(FAREWELL.as_bytes()).await?;
                    return Ok(Flow::Close);
                }
                if !command.is_empty() {
                    let reply = match self.execute(&command).await {
                        None => return Ok(Flow::Hangup),
                        Some(Ok(outcome)) => outcome.body,
                        Some(Err(e)) => {
                            warn!("Command '{}' failed: {}", command, e);
                            format!("Error: {}", e)
                        }
                    };
                    self.write(format!("{}\r\n", reply).as_bytes()).await?;
                }
                self.write(PROMPT.as_bytes()).await?;
            }
            BACKSPACE | DELETE => {
                if self.line.pop().is_some() {
                    self.write(ERASE).await?;
                }
            }
            32..=126 => {
                self.line.push(byte);
                self.write(&[byte]).await?;
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    /// Dispatch `command` while watching the read half for a hangup.
    /// Returns `None` when the peer left before the command finished.
    async fn execute(&mut self, command: &str) -> Option<Result<CommandOutcome>> {
        let caller_gone = CancellationToken::new();
        let dispatch = self.dispatcher.dispatch(command, &caller_gone);
        tokio::pin!(dispatch);

        let mut buf = [0u8; READ_CHUNK];
        let outcome = loop {
            tokio::select! {
                outcome = &mut dispatch => break outcome,
                read = self.reader.read(&mut buf), if !caller_gone.is_cancelled() => match read {
                    Ok(0) | Err(_) => caller_gone.cancel(),
                    Ok(n) => self.backlog.extend(&buf[..n]),
                },
            }
        };

        if caller_gone.is_cancelled() {
            None
        } else {
            Some(outcome)
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
