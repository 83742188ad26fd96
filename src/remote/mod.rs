//! Remote shell sessions.
//!
//! The bridge never talks to an SSH library directly. It drives a
//! [`RemoteSession`] obtained from a [`Connector`]; [`ssh`] provides the
//! russh-backed implementation used by the server, tests provide in-memory
//! fakes.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod ssh;

/// Writable half handed to the bridge for terminal input.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;
/// Readable half handed to the bridge for terminal output.
pub type RemoteReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Where to open the shell, resolved from the upgrade request and config.
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pseudo-terminal allocation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub rows: u32,
    pub cols: u32,
    pub echo: bool,
    /// Applied to both input and output speed.
    pub baud: u32,
}

/// The three byte streams of a running shell.
///
/// The streams are `Sync` so sessions that park them in a field until
/// [`RemoteSession::take_streams`] remain `Sync` themselves.
pub struct SessionStreams {
    pub stdin: RemoteWriter,
    pub stdout: RemoteReader,
    pub stderr: RemoteReader,
}

/// Errors reported by a [`Connector`] or [`RemoteSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// TCP connect or SSH handshake failed.
    Connect(String),
    /// The server refused the supplied credentials.
    AuthRejected,
    /// Opening or using the session channel failed.
    Channel(String),
    /// The server answered a channel request with failure.
    RequestRejected(&'static str),
    /// [`RemoteSession::take_streams`] was already called.
    StreamsTaken,
    /// The session is gone.
    Closed,
    /// Connecting took longer than the configured limit.
    TimedOut(u64),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Connect(e) => write!(f, "connect error: {e}"),
            RemoteError::AuthRejected => write!(f, "authentication rejected"),
            RemoteError::Channel(e) => write!(f, "channel error: {e}"),
            RemoteError::RequestRejected(what) => write!(f, "server rejected {what} request"),
            RemoteError::StreamsTaken => write!(f, "session streams already taken"),
            RemoteError::Closed => write!(f, "session closed"),
            RemoteError::TimedOut(secs) => write!(f, "timed out after {secs}s"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// An authenticated, not yet started, interactive shell session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Allocate a pseudo-terminal. Must be called before [`Self::start_shell`].
    async fn request_pty(&self, request: &PtyRequest) -> Result<(), RemoteError>;

    /// Hand out stdin/stdout/stderr. Succeeds once.
    fn take_streams(&mut self) -> Result<SessionStreams, RemoteError>;

    async fn start_shell(&self) -> Result<(), RemoteError>;

    /// Change the terminal geometry. Best effort.
    async fn resize(&self, rows: u32, cols: u32) -> Result<(), RemoteError>;

    /// Tear the session down. Readers obtained from [`Self::take_streams`]
    /// reach end-of-stream afterwards. Safe to call any number of times.
    async fn close(&self);
}

/// Opens [`RemoteSession`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SshTarget {
        SshTarget {
            host: "example.org".into(),
            port: 2222,
            user: "alice".into(),
            password: "hunter2".into(),
        }
    }

    #[test]
    fn test_target_display_omits_password() {
        assert_eq!(target().to_string(), "alice@example.org:2222");
    }

    #[test]
    fn test_target_debug_redacts_password() {
        let debug = format!("{:?}", target());
        assert!(debug.contains("example.org"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            RemoteError::RequestRejected("pty").to_string(),
            "server rejected pty request"
        );
        assert_eq!(RemoteError::TimedOut(15).to_string(), "timed out after 15s");
    }
}
