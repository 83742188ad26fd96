//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health` - liveness probe.
///
/// Returns status, uptime, version and session usage. Suitable for
/// load-balancer health checks.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.active_sessions(),
        "max_sessions": state.config.server.max_sessions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::config::Config;
    use crate::remote::ssh::SshConnector;

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let mut config = Config::default();
        config.server.max_sessions = 3;
        let state = AppState::new(config, Arc::new(SshConnector::new()));
        let _permit = state.try_acquire_session().unwrap();

        let Json(body) = health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["max_sessions"], 3);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
