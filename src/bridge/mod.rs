//! The per-connection terminal bridge.
//!
//! A [`Bridge`] owns one client duplex channel and one [`RemoteSession`] for
//! its whole life and moves bytes between them:
//!
//! ```text
//!   client ──Binary/Text──▶ inbound pump ──▶ stdin ─┐
//!                                  │ resize          │  remote shell
//!   client ◀──Binary── stdout pump ◀── stdout ◀─────┤
//!   client ◀──Binary── stderr pump ◀── stderr ◀─────┘
//! ```
//!
//! The inbound pump runs on the caller's task and decides the bridge's
//! lifetime. The two outbound pumps are spawned tasks that share the client
//! sink behind a mutex, so each message is written whole. When the inbound
//! pump stops (client gone, stdin broken, or both outbound pumps already
//! finished) the bridge triggers its [`ShutdownSignal`], closes the remote
//! session, which forces EOF on the output streams, and joins both pumps
//! before returning.
//!
//! The client side is any `futures` [`Sink`] of [`DuplexMessage`] plus a
//! [`Stream`] of `Result<DuplexMessage, E>`; `crate::ws` adapts an axum
//! WebSocket to that shape.

use std::fmt;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::remote::{
    PtyRequest, RemoteError, RemoteReader, RemoteSession, RemoteWriter, SessionStreams,
};

pub mod resize;
mod shutdown;

pub use resize::ResizeCommand;
pub use shutdown::ShutdownSignal;

/// One message on the client duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplexMessage {
    /// Raw terminal bytes.
    Binary(Vec<u8>),
    /// A resize command, or terminal input if it does not decode as one.
    Text(String),
}

/// Terminal parameters for the initial PTY request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSpec {
    pub term: String,
    pub rows: u32,
    pub cols: u32,
    pub echo: bool,
    pub baud: u32,
}

impl Default for TerminalSpec {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            rows: 24,
            cols: 80,
            echo: true,
            baud: 14400,
        }
    }
}

impl TerminalSpec {
    fn pty_request(&self) -> PtyRequest {
        PtyRequest {
            term: self.term.clone(),
            rows: self.rows,
            cols: self.cols,
            echo: self.echo,
            baud: self.baud,
        }
    }
}

/// Per-session bridge parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub terminal: TerminalSpec,
    /// Size of each outbound pump's read buffer. Must be positive.
    pub read_chunk_size: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            terminal: TerminalSpec::default(),
            read_chunk_size: 1024,
        }
    }
}

/// Lifecycle of a bridge. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    PtyRequested,
    ShellRunning,
    Draining,
    Closed,
}

/// A failure before the shell is running. Its `Display` text is what the
/// client sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    Pty(RemoteError),
    Streams(RemoteError),
    Shell(RemoteError),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Pty(e) => write!(f, "PTY request failed: {e}"),
            SetupError::Streams(e) => write!(f, "Session stream setup failed: {e}"),
            SetupError::Shell(e) => write!(f, "Shell start failed: {e}"),
        }
    }
}

impl std::error::Error for SetupError {}

/// Why the inbound pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundExit {
    /// The client stream ended.
    ClientClosed,
    /// The client stream yielded an error.
    ClientError,
    /// Writing to the remote stdin failed.
    StdinFailed,
    /// Both outbound pumps finished first.
    RemoteEnded,
}

/// Result of [`Bridge::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    Completed {
        exit: InboundExit,
        stdout_bytes: u64,
        stderr_bytes: u64,
    },
    SetupFailed(SetupError),
}

#[derive(Debug, Clone, Copy)]
enum OutputDirection {
    Stdout,
    Stderr,
}

impl OutputDirection {
    fn as_str(self) -> &'static str {
        match self {
            OutputDirection::Stdout => "stdout",
            OutputDirection::Stderr => "stderr",
        }
    }
}

enum InboundEvent<T> {
    Client(Option<T>),
    RemoteEnded((u64, u64)),
}

/// Relays one client connection to one remote shell. See the module docs.
pub struct Bridge<S, R> {
    id: String,
    session: Box<dyn RemoteSession>,
    sink: Arc<Mutex<S>>,
    stream: R,
    options: BridgeOptions,
    shutdown: ShutdownSignal,
    state: BridgeState,
}

impl<S, R, E> Bridge<S, R>
where
    S: Sink<DuplexMessage> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
    R: Stream<Item = Result<DuplexMessage, E>> + Unpin + Send,
    E: fmt::Display + Send,
{
    pub fn new(
        id: impl Into<String>,
        session: Box<dyn RemoteSession>,
        sink: S,
        stream: R,
        options: BridgeOptions,
    ) -> Self {
        Self {
            id: id.into(),
            session,
            sink: Arc::new(Mutex::new(sink)),
            stream,
            options,
            shutdown: ShutdownSignal::new(),
            state: BridgeState::Starting,
        }
    }

    /// Run the session to completion. Returns once both handles are released
    /// and no pump task is left.
    pub async fn run(mut self) -> BridgeOutcome {
        let streams = match self.setup().await {
            Ok(streams) => streams,
            Err(err) => {
                warn!(session = %self.id, "{err}");
                self.report_setup_failure(&err).await;
                self.session.close().await;
                self.release_client().await;
                self.transition(BridgeState::Closed);
                return BridgeOutcome::SetupFailed(err);
            }
        };
        let SessionStreams {
            mut stdin,
            stdout,
            stderr,
        } = streams;

        let chunk = self.options.read_chunk_size.max(1);
        let stdout_task = tokio::spawn(pump_outbound(
            self.id.clone(),
            OutputDirection::Stdout,
            stdout,
            Arc::clone(&self.sink),
            self.shutdown.subscribe(),
            chunk,
        ));
        let stderr_task = tokio::spawn(pump_outbound(
            self.id.clone(),
            OutputDirection::Stderr,
            stderr,
            Arc::clone(&self.sink),
            self.shutdown.subscribe(),
            chunk,
        ));
        let id = self.id.clone();
        let outbound = async move {
            let (out, err) = tokio::join!(stdout_task, stderr_task);
            (
                pump_total(&id, OutputDirection::Stdout, out),
                pump_total(&id, OutputDirection::Stderr, err),
            )
        };
        tokio::pin!(outbound);

        let mut remote_totals = None;
        let exit = loop {
            let event = tokio::select! {
                msg = self.stream.next() => InboundEvent::Client(msg),
                totals = &mut outbound => InboundEvent::RemoteEnded(totals),
            };
            match event {
                InboundEvent::RemoteEnded(totals) => {
                    remote_totals = Some(totals);
                    break InboundExit::RemoteEnded;
                }
                InboundEvent::Client(None) => break InboundExit::ClientClosed,
                InboundEvent::Client(Some(Err(e))) => {
                    debug!(session = %self.id, "Client receive error: {e}");
                    break InboundExit::ClientError;
                }
                InboundEvent::Client(Some(Ok(message))) => {
                    if let Err(e) = dispatch(&self.id, &*self.session, &mut stdin, message).await {
                        warn!(session = %self.id, "Remote stdin write failed: {e}");
                        break InboundExit::StdinFailed;
                    }
                }
            }
        };

        self.shutdown.trigger();
        self.transition(BridgeState::Draining);
        self.session.close().await;
        drop(stdin);
        let (stdout_bytes, stderr_bytes) = match remote_totals {
            Some(totals) => totals,
            None => outbound.await,
        };
        self.release_client().await;
        self.transition(BridgeState::Closed);

        info!(
            session = %self.id,
            ?exit,
            stdout_bytes,
            stderr_bytes,
            "Bridge closed"
        );
        BridgeOutcome::Completed {
            exit,
            stdout_bytes,
            stderr_bytes,
        }
    }

    async fn setup(&mut self) -> Result<SessionStreams, SetupError> {
        let request = self.options.terminal.pty_request();
        self.session
            .request_pty(&request)
            .await
            .map_err(SetupError::Pty)?;
        self.transition(BridgeState::PtyRequested);

        let streams = self.session.take_streams().map_err(SetupError::Streams)?;

        self.session.start_shell().await.map_err(SetupError::Shell)?;
        self.transition(BridgeState::ShellRunning);
        Ok(streams)
    }

    async fn report_setup_failure(&mut self, err: &SetupError) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(DuplexMessage::Text(format!("{err}\r\n"))).await {
            debug!(session = %self.id, "Failed to report setup failure: {e}");
        }
    }

    async fn release_client(&mut self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(session = %self.id, "Client close: {e}");
        }
    }

    fn transition(&mut self, next: BridgeState) {
        debug!(session = %self.id, from = ?self.state, to = ?next, "Bridge state");
        self.state = next;
    }
}

fn pump_total(id: &str, direction: OutputDirection, joined: Result<u64, JoinError>) -> u64 {
    joined.unwrap_or_else(|e| {
        warn!(session = %id, stream = direction.as_str(), "Outbound pump aborted: {e}");
        0
    })
}

/// Handle one inbound message: apply it as a resize or write it to stdin.
async fn dispatch(
    id: &str,
    session: &dyn RemoteSession,
    stdin: &mut RemoteWriter,
    message: DuplexMessage,
) -> std::io::Result<()> {
    let bytes = match message {
        DuplexMessage::Text(text) => {
            if let Some(ResizeCommand { rows, cols }) = resize::decode(&text) {
                if let Err(e) = session.resize(rows, cols).await {
                    debug!(session = %id, rows, cols, "Resize failed: {e}");
                }
                return Ok(());
            }
            text.into_bytes()
        }
        DuplexMessage::Binary(data) => data,
    };
    stdin.write_all(&bytes).await?;
    stdin.flush().await
}

/// Forward one remote output stream to the client until EOF, an error, or
/// shutdown. Returns the number of bytes forwarded.
async fn pump_outbound<S>(
    id: String,
    direction: OutputDirection,
    mut reader: RemoteReader,
    sink: Arc<Mutex<S>>,
    shutdown: watch::Receiver<bool>,
    chunk_size: usize,
) -> u64
where
    S: Sink<DuplexMessage> + Unpin + Send,
    S::Error: fmt::Display,
{
    let mut buf = vec![0u8; chunk_size];
    let mut forwarded = 0u64;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(session = %id, stream = direction.as_str(), "Remote read error: {e}");
                break;
            }
        };
        let mut sink = sink.lock().await;
        if let Err(e) = sink.send(DuplexMessage::Binary(buf[..n].to_vec())).await {
            debug!(session = %id, stream = direction.as_str(), "Client send failed: {e}");
            break;
        }
        forwarded += n as u64;
    }
    debug!(session = %id, stream = direction.as_str(), forwarded, "Outbound pump done");
    forwarded
}
