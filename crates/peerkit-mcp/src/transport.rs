//! Transport abstraction and the stdio process transport.
//!
//! A transport is a bidirectional envelope channel. The concrete form
//! spawns a child process and exchanges one envelope per newline-terminated
//! line over its standard streams. Replies are matched by arrival order,
//! never by correlation id, so callers must read a reply before issuing the
//! next request.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::PeerConfig;
use crate::error::McpError;
use crate::wire::{self, Request, Response};

/// How long `close` waits for a voluntary exit before killing the process.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A bidirectional envelope channel to one peer.
///
/// Implementations bound in-flight work to one call at a time: all
/// send/receive activity is serialized, and a caller must not send a second
/// request before the first one's reply has been read.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel. Fails if already started.
    async fn start(&self) -> Result<(), McpError>;

    /// Write one request envelope.
    async fn send(&self, request: &Request) -> Result<(), McpError>;

    /// Write one request envelope, giving up after `deadline`.
    ///
    /// The deadline guards only the send phase; a reply read that has
    /// already begun runs to completion or I/O error.
    async fn send_with_deadline(
        &self,
        request: &Request,
        deadline: Duration,
    ) -> Result<(), McpError> {
        match tokio::time::timeout(deadline, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            }),
        }
    }

    /// Block until one full envelope is available or the channel closes.
    async fn receive(&self) -> Result<Response, McpError>;

    /// Tear down the channel: write side first, then force-terminate.
    /// Idempotent.
    async fn close(&self) -> Result<(), McpError>;

    /// Whether `start` succeeded and no fatal error or close has occurred.
    fn is_connected(&self) -> bool;
}

/// Transport over a child process's standard streams.
///
/// Stdin backs `send`; a buffered line reader over stdout backs `receive`;
/// stderr is discarded. The writer and reader sit behind separate locks so
/// `close` can run while a reply read is pending — killing the child
/// unblocks the reader with an EOF error.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    writer: Mutex<Option<ChildStdin>>,
    reader: Mutex<Option<Lines<BufReader<ChildStdout>>>>,
    child: Mutex<Option<Child>>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create an unstarted transport for the given command line.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            child: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Environment overrides, merged over the inherited environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Working directory for the spawned process.
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Build a transport from a peer's launch configuration.
    pub fn from_config(config: &PeerConfig) -> Self {
        let mut transport =
            Self::new(&config.command, config.args.clone()).with_env(config.env.clone());
        if let Some(cwd) = &config.cwd {
            transport.cwd = Some(cwd.clone());
        }
        transport
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), McpError> {
        let mut child_slot = self.child.lock().await;
        if self.is_connected() || child_slot.is_some() {
            return Err(McpError::AlreadyStarted);
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: self.command.clone(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        *self.writer.lock().await = Some(stdin);
        *self.reader.lock().await = Some(BufReader::new(stdout).lines());
        *child_slot = Some(child);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, request: &Request) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let bytes = wire::encode(request)?;

        let mut guard = self.writer.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(McpError::NotConnected);
        };

        let written: std::io::Result<()> = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            // A dead write side is fatal for the whole channel.
            self.mark_disconnected();
            return Err(McpError::Io(e));
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Response, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let mut guard = self.reader.lock().await;
        let Some(lines) = guard.as_mut() else {
            return Err(McpError::NotConnected);
        };

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    // A malformed line is reported but does not kill the
                    // channel; the next line may still be a valid envelope.
                    return wire::decode(line.as_bytes());
                }
                Ok(None) => {
                    self.mark_disconnected();
                    return Err(McpError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "peer closed its output stream",
                    )));
                }
                Err(e) => {
                    self.mark_disconnected();
                    return Err(McpError::Io(e));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        self.mark_disconnected();

        // Drop the write side first so the child observes end-of-input.
        self.writer.lock().await.take();

        // Take the child out of the lock before any blocking wait.
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::debug!(command = %self.command, "peer ignored end-of-input, killing");
                child.kill().await?;
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
