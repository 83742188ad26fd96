#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # termgate
//!
//! Browser terminal gateway. A web page opens a WebSocket; termgate logs in
//! to an SSH server with the credentials from the query string, starts an
//! interactive shell on a PTY, and relays the terminal byte-for-byte.
//!
//! ## API surface
//!
//! | Method | Path          | Description                                   |
//! |--------|---------------|-----------------------------------------------|
//! | GET    | `/`           | Terminal page (`static/index.html`)           |
//! | GET    | `/static/*`   | Client assets                                 |
//! | GET    | `/ws`         | WebSocket: `?host=&port=&user=&pass=`         |
//! | GET    | `/api/health` | Liveness probe                                |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          - entry point, clap flags, tracing, graceful shutdown
//! config.rs        - TOML + env-var + CLI configuration
//! server.rs        - router assembly
//! state.rs         - AppState (config, connector, session permits)
//! routes/
//!   health.rs      - GET /api/health
//! ws/
//!   mod.rs         - WebSocket upgrade, SSH connect, frame adaptation
//! bridge/
//!   mod.rs         - Bridge: setup, inbound pump, outbound pumps, drain
//!   resize.rs      - {"rows","cols"} decoder
//!   shutdown.rs    - per-session shutdown latch
//! remote/
//!   mod.rs         - RemoteSession / Connector traits
//!   ssh.rs         - russh client and channel driver
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use termgate::config::{Config, Overrides};
use termgate::remote::ssh::SshConnector;
use termgate::{server, AppState};

/// Browser terminal gateway: WebSocket to SSH shell bridge.
#[derive(Parser)]
#[command(name = "termgate", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Address to listen on, e.g. `0.0.0.0:8000`.
    #[arg(long)]
    listen: Option<String>,
    /// Default SSH host when the client does not send one.
    #[arg(long)]
    ssh_host: Option<String>,
    /// Default SSH port when the client does not send one.
    #[arg(long)]
    ssh_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("termgate: {e}");
            std::process::exit(1);
        }
    };
    config.apply_overrides(Overrides {
        listen: cli.listen,
        ssh_host: cli.ssh_host,
        ssh_port: cli.ssh_port,
    });

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("termgate v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "SSH target default: {}:{}",
        config.ssh.default_host, config.ssh.default_port
    );

    let listener = match TcpListener::bind(&config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {e}", config.server.listen);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", config.server.listen);

    let state = AppState::new(config, Arc::new(SshConnector::new()));
    let app = server::router(state);

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("Received SIGINT"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    error!("Failed to register SIGTERM: {e}");
                    ctrl_c.await.ok();
                    info!("Received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }

    info!("Goodbye");
}
