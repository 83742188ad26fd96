//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Config;
use crate::remote::Connector;

/// Shared application state for the termgate server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Opens remote shells for new WebSocket clients.
    pub connector: Arc<dyn Connector>,
    /// One permit per live terminal session, `server.max_sessions` in total.
    sessions: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let sessions = Arc::new(Semaphore::new(config.server.max_sessions));
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            connector,
            sessions,
        }
    }

    /// Reserve a session slot; the slot frees when the permit drops.
    pub fn try_acquire_session(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.sessions).try_acquire_owned().ok()
    }

    /// Number of sessions currently holding a permit.
    pub fn active_sessions(&self) -> usize {
        self.config
            .server
            .max_sessions
            .saturating_sub(self.sessions.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::remote::{RemoteError, RemoteSession, SshTarget};

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(
            &self,
            _target: &SshTarget,
        ) -> Result<Box<dyn RemoteSession>, RemoteError> {
            Err(RemoteError::Connect("unreachable".into()))
        }
    }

    #[test]
    fn test_session_permits() {
        let mut config = Config::default();
        config.server.max_sessions = 2;
        let state = AppState::new(config, Arc::new(Unreachable));
        assert_eq!(state.active_sessions(), 0);

        let first = state.try_acquire_session().unwrap();
        let second = state.try_acquire_session().unwrap();
        assert_eq!(state.active_sessions(), 2);
        assert!(state.try_acquire_session().is_none());

        drop(first);
        assert_eq!(state.active_sessions(), 1);
        assert!(state.try_acquire_session().is_some());
        drop(second);
    }
}
