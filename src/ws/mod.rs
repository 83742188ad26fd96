//! WebSocket transport for browser terminals.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /ws?host=&port=&user=&pass=`. Missing or empty
//!    `host`/`port` fall back to the configured defaults. A session permit is
//!    taken before the upgrade; none left → `503`.
//! 2. After the upgrade the server dials the SSH target. Failure (or the
//!    connect timeout) is reported as one text frame
//!    `SSH connection failed: <reason>\r\n` and the socket is closed.
//! 3. Otherwise a [`Bridge`] takes over the socket for the rest of its life.
//!
//! ## Frames
//!
//! | Direction        | Frame  | Content                                   |
//! |------------------|--------|-------------------------------------------|
//! | client → server  | binary | terminal input, verbatim                  |
//! | client → server  | text   | `{"rows":R,"cols":C}` resize, else input  |
//! | server → client  | binary | terminal output (stdout and stderr)       |
//! | server → client  | text   | setup/connection diagnostics only         |

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{future, stream::BoxStream, Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::{Bridge, BridgeOutcome, DuplexMessage};
use crate::config::SshConfig;
use crate::remote::{RemoteError, SshTarget};
use crate::AppState;

/// Query parameters for the WebSocket upgrade request.
#[derive(Default, Deserialize)]
pub struct ConnectQuery {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl ConnectQuery {
    /// Resolve the SSH target, filling blanks from `defaults`.
    ///
    /// Fails only when `port` is present but not a valid port number.
    pub fn resolve(self, defaults: &SshConfig) -> Result<SshTarget, String> {
        let host = non_empty(self.host).unwrap_or_else(|| defaults.default_host.clone());
        let port = match non_empty(self.port) {
            Some(p) => p.parse::<u16>().map_err(|_| format!("Invalid port: {p}"))?,
            None => defaults.default_port,
        };
        Ok(SshTarget {
            host,
            port,
            user: self.user.unwrap_or_default(),
            password: self.pass.unwrap_or_default(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// `GET /ws` - WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let target = match query.resolve(&state.config.ssh) {
        Ok(target) => target,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let Some(permit) = state.try_acquire_session() else {
        warn!(target = %target, "Session limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many sessions").into_response();
    };

    ws.on_upgrade(move |socket| handle_ws(socket, state, target, permit))
}

/// Adapt the outgoing half of a WebSocket to a sink of [`DuplexMessage`].
fn client_sink(
    sink: futures::stream::SplitSink<WebSocket, Message>,
) -> impl Sink<DuplexMessage, Error = axum::Error> + Unpin + Send + 'static {
    sink.with(|msg: DuplexMessage| future::ready(Ok::<_, axum::Error>(into_ws_message(msg))))
}

fn into_ws_message(msg: DuplexMessage) -> Message {
    match msg {
        DuplexMessage::Binary(data) => Message::Binary(data.into()),
        DuplexMessage::Text(text) => Message::Text(text.into()),
    }
}

/// Adapt the incoming half of a WebSocket to a stream of [`DuplexMessage`].
///
/// A close frame ends the stream. Ping/pong frames are answered by axum and
/// skipped here.
fn client_stream(
    stream: futures::stream::SplitStream<WebSocket>,
) -> BoxStream<'static, Result<DuplexMessage, axum::Error>> {
    stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(data)) => Some(Ok(DuplexMessage::Binary(data.to_vec()))),
                Ok(Message::Text(text)) => Some(Ok(DuplexMessage::Text(text.as_str().to_owned()))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        })
        .boxed()
}

async fn handle_ws(
    socket: WebSocket,
    state: AppState,
    target: SshTarget,
    permit: OwnedSemaphorePermit,
) {
    let session_id = Uuid::new_v4().to_string();
    let (ws_sink, ws_stream) = socket.split();
    let mut sink = client_sink(ws_sink);
    let stream = client_stream(ws_stream);

    info!(session = %session_id, target = %target, "Client connected");

    let timeout = state.config.connect_timeout();
    let connected = match tokio::time::timeout(timeout, state.connector.connect(&target)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::TimedOut(timeout.as_secs())),
    };
    let remote = match connected {
        Ok(remote) => remote,
        Err(e) => {
            warn!(session = %session_id, target = %target, "SSH connection failed: {e}");
            let _ = sink
                .send(DuplexMessage::Text(format!("SSH connection failed: {e}\r\n")))
                .await;
            let _ = sink.close().await;
            return;
        }
    };

    let outcome = Bridge::new(
        session_id.clone(),
        remote,
        sink,
        stream,
        state.config.bridge_options(),
    )
    .run()
    .await;

    match outcome {
        BridgeOutcome::Completed { exit, .. } => {
            info!(session = %session_id, ?exit, "Client disconnected");
        }
        BridgeOutcome::SetupFailed(e) => {
            info!(session = %session_id, "Session ended during setup: {e}");
        }
    }
    drop(permit);
}
