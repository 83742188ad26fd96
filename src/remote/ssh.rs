//! russh-backed [`Connector`] and [`RemoteSession`].
//!
//! A russh [`Channel`] is a single message queue: output, extended output and
//! request replies all arrive through `wait()`, and every write goes through
//! the same handle. To present it as three independent byte streams the
//! session spawns one driver task that owns the channel and:
//!
//! - demultiplexes `Data` into the stdout pipe and `ExtendedData { ext: 1 }`
//!   into the stderr pipe,
//! - copies bytes from the stdin pipe into `channel.data()`,
//! - executes PTY/shell/resize/close commands sent over an mpsc queue and
//!   matches `Success`/`Failure` replies to them in order.
//!
//! When the channel ends, or a close command arrives, the driver drops its
//! ends of the pipes, so the bridge's readers see EOF.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use russh_keys::key::PublicKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{Connector, PtyRequest, RemoteError, RemoteSession, SessionStreams, SshTarget};

/// In-memory pipe capacity between the driver and the bridge, per stream.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Bytes moved from the stdin pipe to the channel per `data()` call.
const STDIN_CHUNK: usize = 4096;

/// SSH extended data type code for stderr.
const EXTENDED_DATA_STDERR: u32 = 1;

/// Dials SSH servers with password authentication.
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let handler = HostKeyHandler {
            host: target.host.clone(),
        };
        let mut handle = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| RemoteError::Connect(e.to_string()))?;

        let accepted = handle
            .authenticate_password(target.user.as_str(), target.password.as_str())
            .await
            .map_err(|e| RemoteError::Connect(e.to_string()))?;
        if !accepted {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(RemoteError::AuthRejected);
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        info!(target = %target, "SSH session channel open");
        Ok(Box::new(SshSession::start(handle, channel)))
    }
}

/// Accepts every host key and logs its fingerprint.
///
/// There is no known-hosts store; the gateway trusts whatever the target
/// presents.
struct HostKeyHandler {
    host: String,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

type Reply = oneshot::Sender<Result<(), RemoteError>>;

enum ChannelCommand {
    RequestPty { request: PtyRequest, reply: Reply },
    Shell { reply: Reply },
    Resize { rows: u32, cols: u32 },
    Close,
}

/// A live SSH session channel driven by a background task.
pub struct SshSession {
    handle: Handle<HostKeyHandler>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    streams: Option<SessionStreams>,
}

impl SshSession {
    fn start(handle: Handle<HostKeyHandler>, channel: Channel<Msg>) -> Self {
        let (stdin_bridge, stdin_driver) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_bridge, stdout_driver) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_bridge, stderr_driver) = tokio::io::duplex(PIPE_CAPACITY);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive_channel(
            channel,
            commands_rx,
            stdin_driver,
            stdout_driver,
            stderr_driver,
        ));

        Self {
            handle,
            commands,
            streams: Some(SessionStreams {
                stdin: Box::new(stdin_bridge),
                stdout: Box::new(stdout_bridge),
                stderr: Box::new(stderr_bridge),
            }),
        }
    }

    /// Queue a request that expects a `Success`/`Failure` reply and wait for it.
    async fn request(
        &self,
        build: impl FnOnce(Reply) -> ChannelCommand,
    ) -> Result<(), RemoteError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| RemoteError::Closed)?;
        reply_rx.await.map_err(|_| RemoteError::Closed)?
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn request_pty(&self, request: &PtyRequest) -> Result<(), RemoteError> {
        let request = request.clone();
        self.request(|reply| ChannelCommand::RequestPty { request, reply })
            .await
    }

    fn take_streams(&mut self) -> Result<SessionStreams, RemoteError> {
        self.streams.take().ok_or(RemoteError::StreamsTaken)
    }

    async fn start_shell(&self) -> Result<(), RemoteError> {
        self.request(|reply| ChannelCommand::Shell { reply }).await
    }

    async fn resize(&self, rows: u32, cols: u32) -> Result<(), RemoteError> {
        self.commands
            .send(ChannelCommand::Resize { rows, cols })
            .map_err(|_| RemoteError::Closed)
    }

    async fn close(&self) {
        // Both calls fail harmlessly once the driver or connection is gone.
        let _ = self.commands.send(ChannelCommand::Close);
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
    }
}

fn terminal_modes(request: &PtyRequest) -> [(Pty, u32); 3] {
    [
        (Pty::ECHO, u32::from(request.echo)),
        (Pty::TTY_OP_ISPEED, request.baud),
        (Pty::TTY_OP_OSPEED, request.baud),
    ]
}

/// Owns the channel for the session lifetime. See the module docs.
async fn drive_channel(
    mut channel: Channel<Msg>,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
) {
    let mut pending: VecDeque<Reply> = VecDeque::new();
    let mut stdin_buf = vec![0u8; STDIN_CHUNK];
    let mut stdin_open = true;

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if stdout.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == EXTENDED_DATA_STDERR => {
                    if stderr.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::Success) => {
                    if let Some(reply) = pending.pop_front() {
                        let _ = reply.send(Ok(()));
                    }
                }
                Some(ChannelMsg::Failure) => {
                    if let Some(reply) = pending.pop_front() {
                        let _ = reply.send(Err(RemoteError::RequestRejected("channel")));
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            command = commands.recv() => match command {
                Some(ChannelCommand::RequestPty { request, reply }) => {
                    let modes = terminal_modes(&request);
                    match channel
                        .request_pty(true, &request.term, request.cols, request.rows, 0, 0, &modes)
                        .await
                    {
                        Ok(()) => pending.push_back(reply),
                        Err(e) => {
                            let _ = reply.send(Err(RemoteError::Channel(e.to_string())));
                        }
                    }
                }
                Some(ChannelCommand::Shell { reply }) => match channel.request_shell(true).await {
                    Ok(()) => pending.push_back(reply),
                    Err(e) => {
                        let _ = reply.send(Err(RemoteError::Channel(e.to_string())));
                    }
                },
                Some(ChannelCommand::Resize { rows, cols }) => {
                    if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                        debug!("window-change failed: {e}");
                    }
                }
                Some(ChannelCommand::Close) | None => break,
            },
            read = stdin.read(&mut stdin_buf), if stdin_open => match read {
                Ok(0) | Err(_) => {
                    stdin_open = false;
                    let _ = channel.eof().await;
                }
                Ok(n) => {
                    if let Err(e) = channel.data(&stdin_buf[..n]).await {
                        warn!("SSH stdin write failed: {e}");
                        break;
                    }
                }
            },
        }
    }

    // Unanswered requests resolve to `Closed` when their senders drop here.
    pending.clear();
    let _ = channel.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_modes_echo_and_speed() {
        let request = PtyRequest {
            term: "xterm-256color".into(),
            rows: 24,
            cols: 80,
            echo: true,
            baud: 14400,
        };
        let modes = terminal_modes(&request);
        assert_eq!(modes[0], (Pty::ECHO, 1));
        assert_eq!(modes[1], (Pty::TTY_OP_ISPEED, 14400));
        assert_eq!(modes[2], (Pty::TTY_OP_OSPEED, 14400));
    }

    #[test]
    fn test_terminal_modes_echo_off() {
        let request = PtyRequest {
            term: "vt100".into(),
            rows: 24,
            cols: 80,
            echo: false,
            baud: 9600,
        };
        assert_eq!(terminal_modes(&request)[0], (Pty::ECHO, 0));
    }
}
