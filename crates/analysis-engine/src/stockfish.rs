//! Stockfish engine session using the UCI protocol (async I/O)
//!
//! One [`EngineSession`] owns one engine process for the lifetime of the
//! application. Every operation takes the session's turnstile before its first
//! write and releases it only after the matching response has been consumed,
//! so the engine never sees interleaved commands. Waiters are served in FIFO
//! order because `tokio::sync::Mutex` is fair.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chess_core::{fen, validity, Position};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::uci::{SearchCollector, SearchResult};

/// Lifecycle of an engine session. `Faulted` is terminal until the next
/// successful [`EngineSession::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Searching,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Searching => "searching",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Identifies one launched engine instance. Each (re-)initialization gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

pub type EngineReader = Box<dyn AsyncRead + Send + Unpin>;
pub type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both ends of a freshly launched engine, plus the process when there is one.
pub struct EngineIo {
    pub reader: EngineReader,
    pub writer: EngineWriter,
    pub process: Option<Child>,
}

/// Starts an engine. Called on every `initialize()`.
pub trait EngineLauncher: Send + Sync {
    fn launch(&self) -> Result<EngineIo, EngineError>;
}

/// Spawns a UCI engine binary with piped stdin/stdout.
pub struct ProcessLauncher {
    path: PathBuf,
}

impl ProcessLauncher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EngineLauncher for ProcessLauncher {
    fn launch(&self) -> Result<EngineIo, EngineError> {
        let mut process = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Start(format!("Failed to spawn {}: {e}", self.path.display()))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Start("engine stdin was not captured".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Start("engine stdout was not captured".into()))?;

        Ok(EngineIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(process),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on `uci`/`isready` round trips, including one-shot commands
    pub handshake_timeout: Duration,
    /// Bound on a single `go` command
    pub search_timeout: Duration,
    /// How long to wait for `bestmove` after sending `stop` on timeout
    pub stop_grace: Duration,
    pub threads: u32,
    pub hash_mb: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(2),
            threads: 1,
            hash_mb: 16,
        }
    }
}

impl From<&EngineConfig> for SessionOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout,
            search_timeout: config.search_timeout,
            stop_grace: config.stop_grace,
            threads: config.threads,
            hash_mb: config.hash_mb,
        }
    }
}

/// The protocol channel to one running engine.
struct Channel {
    handle: SessionHandle,
    stdin: EngineWriter,
    stdout: Lines<BufReader<EngineReader>>,
    process: Option<Child>,
}

impl Channel {
    fn new(handle: SessionHandle, io: EngineIo) -> Self {
        Self {
            handle,
            stdin: io.writer,
            stdout: BufReader::new(io.reader).lines(),
            process: io.process,
        }
    }

    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(handle = %self.handle, cmd, "engine <");
        self.stdin.write_all(format!("{cmd}\n").as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// `Lines::next_line` is cancel safe, so a timed-out read loses no data.
    async fn read_line(&mut self) -> Result<String, EngineError> {
        match self.stdout.next_line().await? {
            Some(line) => {
                let trimmed = line.trim();
                debug!(handle = %self.handle, line = trimmed, "engine >");
                Ok(trimmed.to_string())
            }
            None => Err(EngineError::Faulted("engine closed its output".into())),
        }
    }

    /// Read until `expected`, returning the lines that came before it.
    async fn wait_for(&mut self, expected: &str) -> Result<Vec<String>, EngineError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == expected {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    async fn read_search(&mut self) -> Result<SearchResult, EngineError> {
        let mut collector = SearchCollector::new();
        loop {
            let line = self.read_line().await?;
            if let Some(result) = collector.push(&line) {
                return Ok(result);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        if let Some(process) = self.process.as_mut() {
            let _ = process.start_kill();
        }
    }
}

pub struct EngineSession {
    launcher: Box<dyn EngineLauncher>,
    options: SessionOptions,
    turnstile: Mutex<Option<Channel>>,
    state: watch::Sender<SessionState>,
    launches: AtomicU64,
    /// 0 while no engine is running
    current_handle: AtomicU64,
}

impl EngineSession {
    pub fn new(launcher: impl EngineLauncher + 'static, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            launcher: Box::new(launcher),
            options,
            turnstile: Mutex::new(None),
            state,
            launches: AtomicU64::new(0),
            current_handle: AtomicU64::new(0),
        }
    }

    /// Session for the Stockfish binary named in the config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            ProcessLauncher::new(&config.stockfish_path),
            SessionOptions::from(config),
        )
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receives every lifecycle transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        match self.current_handle.load(Ordering::SeqCst) {
            0 => None,
            id => Some(SessionHandle(id)),
        }
    }

    /// Launch the engine and complete the UCI handshake.
    ///
    /// A no-op when the session is already ready. From `Faulted` (or after
    /// `shutdown`) this starts a fresh engine with a new handle.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let mut guard = self.turnstile.lock().await;
        if self.state() == SessionState::Ready && guard.is_some() {
            return Ok(());
        }

        // Drop (and kill) whatever is left of a faulted engine
        *guard = None;
        self.current_handle.store(0, Ordering::SeqCst);
        self.set_state(SessionState::Initializing);

        let io = match self.launcher.launch() {
            Ok(io) => io,
            Err(e) => {
                error!(error = %e, "Engine launch failed");
                self.set_state(SessionState::Faulted);
                return Err(e);
            }
        };

        let handle = SessionHandle(self.launches.fetch_add(1, Ordering::SeqCst) + 1);
        let mut channel = Channel::new(handle, io);

        let outcome = timeout(self.options.handshake_timeout, self.handshake(&mut channel)).await;
        let err = match outcome {
            Ok(Ok(())) => {
                *guard = Some(channel);
                self.current_handle.store(handle.0, Ordering::SeqCst);
                self.set_state(SessionState::Ready);
                info!(%handle, "Engine session ready");
                return Ok(());
            }
            Ok(Err(e)) => EngineError::Start(format!("handshake failed: {e}")),
            Err(_) => EngineError::Start(format!(
                "handshake not completed within {:?}",
                self.options.handshake_timeout
            )),
        };

        error!(%handle, error = %err, "Engine handshake failed");
        self.set_state(SessionState::Faulted);
        Err(err)
    }

    async fn handshake(&self, channel: &mut Channel) -> Result<(), EngineError> {
        channel.send("uci").await?;
        channel.wait_for("uciok").await?;

        channel
            .send(&format!("setoption name Threads value {}", self.options.threads))
            .await?;
        channel
            .send(&format!("setoption name Hash value {}", self.options.hash_mb))
            .await?;
        channel.send("isready").await?;
        channel.wait_for("readyok").await?;
        Ok(())
    }

    /// Send `position fen <fen>`. Produces no engine output.
    pub async fn set_position(&self, fen: &str) -> Result<(), EngineError> {
        let mut guard = self.turnstile.lock().await;
        let result = match self.ready_channel(&mut guard) {
            Ok(channel) => channel.send(&format!("position fen {fen}")).await,
            Err(e) => return Err(e),
        };
        self.settle(&mut guard, result)
    }

    /// Search the current engine position to `depth` plies.
    pub async fn search(&self, depth: u32) -> Result<SearchResult, EngineError> {
        let mut guard = self.turnstile.lock().await;
        let result = match self.ready_channel(&mut guard) {
            Ok(channel) => self.run_search(channel, depth).await,
            Err(e) => return Err(e),
        };
        self.settle(&mut guard, result)
    }

    /// Set `fen` and search it without letting another command in between.
    pub async fn evaluate(&self, fen: &str, depth: u32) -> Result<SearchResult, EngineError> {
        let mut guard = self.turnstile.lock().await;
        let result = match self.ready_channel(&mut guard) {
            Ok(channel) => {
                async {
                    channel.send(&format!("position fen {fen}")).await?;
                    self.run_search(channel, depth).await
                }
                .await
            }
            Err(e) => return Err(e),
        };
        self.settle(&mut guard, result)
    }

    /// One-shot command. Output is collected up to the `readyok` that answers
    /// the `isready` sent right after it.
    pub async fn send_command(&self, command: &str) -> Result<Vec<String>, EngineError> {
        let mut guard = self.turnstile.lock().await;
        let bound = self.options.handshake_timeout;
        let result = match self.ready_channel(&mut guard) {
            Ok(channel) => {
                let exchange = async {
                    channel.send(command).await?;
                    channel.send("isready").await?;
                    channel.wait_for("readyok").await
                };
                timeout(bound, exchange).await.unwrap_or_else(|_| {
                    Err(EngineError::Faulted(format!(
                        "no readyok within {bound:?} after '{command}'"
                    )))
                })
            }
            Err(e) => return Err(e),
        };
        self.settle(&mut guard, result)
    }

    /// Position-validity query.
    ///
    /// Positions that fail the local playability check never reach the engine.
    /// The rest are loaded into the engine and confirmed with a `readyok`.
    pub async fn validate_position(&self, position: &Position) -> Result<bool, EngineError> {
        if let Err(reason) = validity::check_playable(position) {
            debug!(reason = %reason, "Position rejected before reaching the engine");
            return Ok(false);
        }
        self.send_command(&format!("position fen {}", fen::encode(position)))
            .await?;
        Ok(true)
    }

    /// Send `quit` and wait briefly for the process to exit.
    pub async fn shutdown(&self) {
        let mut guard = self.turnstile.lock().await;
        if let Some(mut channel) = guard.take() {
            let _ = channel.send("quit").await;
            if let Some(process) = channel.process.as_mut() {
                let _ = timeout(Duration::from_secs(2), process.wait()).await;
            }
        }
        self.current_handle.store(0, Ordering::SeqCst);
        self.set_state(SessionState::Uninitialized);
        info!("Engine session shut down");
    }

    async fn run_search(
        &self,
        channel: &mut Channel,
        depth: u32,
    ) -> Result<SearchResult, EngineError> {
        self.set_state(SessionState::Searching);
        channel.send(&format!("go depth {depth}")).await?;

        match timeout(self.options.search_timeout, channel.read_search()).await {
            Ok(Ok(result)) => {
                self.set_state(SessionState::Ready);
                Ok(result)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    depth,
                    timeout = ?self.options.search_timeout,
                    "Search timed out, sending stop"
                );
                let drain = async {
                    channel.send("stop").await?;
                    channel.read_search().await
                };
                match timeout(self.options.stop_grace, drain).await {
                    Ok(Ok(_)) => self.set_state(SessionState::Ready),
                    _ => self.set_state(SessionState::Faulted),
                }
                Err(EngineError::SearchTimeout(self.options.search_timeout))
            }
        }
    }

    fn ready_channel<'a>(
        &self,
        guard: &'a mut Option<Channel>,
    ) -> Result<&'a mut Channel, EngineError> {
        let actual = self.state();
        match guard.as_mut() {
            Some(channel) if actual == SessionState::Ready => Ok(channel),
            _ => Err(EngineError::InvalidState {
                expected: SessionState::Ready,
                actual,
            }),
        }
    }

    /// Fault the session on I/O failure or protocol desync; pass everything through.
    fn settle<T>(
        &self,
        guard: &mut Option<Channel>,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if let Err(e) = &result {
            let fatal = matches!(e, EngineError::Io(_) | EngineError::Faulted(_))
                || self.state() == SessionState::Faulted;
            if fatal {
                error!(error = %e, "Engine session faulted");
                *guard = None;
                self.current_handle.store(0, Ordering::SeqCst);
                self.set_state(SessionState::Faulted);
            }
        }
        result
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Engine session state");
        }
    }
}
