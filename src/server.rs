//! Router assembly.

use std::path::Path;

use axum::{routing::get, Router};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::{routes, ws, AppState};

/// Build the full application router.
///
/// | Method | Path          | Description                      |
/// |--------|---------------|----------------------------------|
/// | GET    | `/`           | `index.html` from the static dir |
/// | GET    | `/static/*`   | client assets                    |
/// | GET    | `/ws`         | terminal WebSocket               |
/// | GET    | `/api/health` | liveness probe                   |
pub fn router(state: AppState) -> Router {
    let static_dir = Path::new(&state.config.server.static_dir);
    let index = ServeFile::new(static_dir.join("index.html"));
    let assets = ServeDir::new(static_dir);

    Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/ws", get(ws::ws_upgrade))
        .route_service("/", index)
        .nest_service("/static", assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
