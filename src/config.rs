//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Command-line flags** - `--listen`, `--ssh-host`, `--ssh-port`
//!    (applied by `main` through [`Config::apply_overrides`])
//! 2. **Environment variables** - `TERMGATE_LISTEN`, `TERMGATE_SSH_HOST`,
//!    `TERMGATE_SSH_PORT`
//! 3. **Config file** - path via `--config <path>`, or `termgate.toml` in CWD
//! 4. **Compiled defaults** - see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8000"
//! max_sessions = 64
//! static_dir = "static"
//!
//! [ssh]
//! default_host = "localhost"
//! default_port = 22
//! connect_timeout_secs = 15
//!
//! [terminal]
//! term = "xterm-256color"
//! rows = 24
//! cols = 80
//! baud = 14400
//!
//! [bridge]
//! read_chunk_size = 1024
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::bridge::{BridgeOptions, TerminalSpec};

/// Largest accepted outbound read chunk.
const MAX_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent terminal sessions (default 64). Upgrades beyond this
    /// are refused with `503`.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Directory holding `index.html` and the client assets (default `static`).
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

/// Remote shell endpoint defaults, used when the upgrade request omits them.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Host dialed when the client sends no `host` (default `localhost`).
    #[serde(default = "default_ssh_host")]
    pub default_host: String,
    /// Port dialed when the client sends no `port` (default 22).
    #[serde(default = "default_ssh_port")]
    pub default_port: u16,
    /// Upper bound on dial + authentication + channel open, in seconds (default 15).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Pseudo-terminal parameters requested on every session.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    /// `TERM` value sent with the PTY request (default `xterm-256color`).
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default = "default_cols")]
    pub cols: u32,
    /// Input and output baud rate encoded in the terminal modes (default 14400).
    #[serde(default = "default_baud")]
    pub baud: u32,
}

/// Bridge tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Bytes read from stdout/stderr per outbound message (default 1024).
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Values taken from the command line, highest precedence.
#[derive(Debug, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_sessions() -> usize {
    64
}
fn default_static_dir() -> String {
    "static".to_string()
}
fn default_ssh_host() -> String {
    "localhost".to_string()
}
fn default_ssh_port() -> u16 {
    22
}
fn default_connect_timeout_secs() -> u64 {
    15
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_rows() -> u32 {
    24
}
fn default_cols() -> u32 {
    80
}
fn default_baud() -> u32 {
    14400
}
fn default_read_chunk_size() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_sessions: default_max_sessions(),
            static_dir: default_static_dir(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_host: default_ssh_host(),
            default_port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            rows: default_rows(),
            cols: default_cols(),
            baud: default_baud(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise looks for
    /// `termgate.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .map_err(|e| format!("Failed to read config file {p}: {e}"))?;
            Self::from_toml_str(&content)
                .map_err(|e| format!("Failed to parse config file {p}: {e}"))?
        } else if Path::new("termgate.toml").exists() {
            let content = std::fs::read_to_string("termgate.toml")
                .map_err(|e| format!("Failed to read termgate.toml: {e}"))?;
            Self::from_toml_str(&content)
                .map_err(|e| format!("Failed to parse termgate.toml: {e}"))?
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("TERMGATE_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(host) = std::env::var("TERMGATE_SSH_HOST") {
            config.ssh.default_host = host;
        }
        if let Ok(port) = std::env::var("TERMGATE_SSH_PORT") {
            config.ssh.default_port = port
                .parse()
                .map_err(|e| format!("Invalid TERMGATE_SSH_PORT {port:?}: {e}"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        let max = self.server.max_sessions;
        if max == 0 || max > Semaphore::MAX_PERMITS {
            return Err(format!(
                "server.max_sessions must be between 1 and {}, got {max}",
                Semaphore::MAX_PERMITS
            ));
        }
        Ok(())
    }

    /// Parse a TOML document; absent sections and keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply command-line values on top of everything else.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(listen) = overrides.listen {
            self.server.listen = listen;
        }
        if let Some(host) = overrides.ssh_host {
            self.ssh.default_host = host;
        }
        if let Some(port) = overrides.ssh_port {
            self.ssh.default_port = port;
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.connect_timeout_secs)
    }

    /// Per-session bridge parameters derived from `[terminal]` and `[bridge]`.
    ///
    /// The read chunk size is clamped to `1..=65536`.
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            terminal: TerminalSpec {
                term: self.terminal.term.clone(),
                rows: self.terminal.rows,
                cols: self.terminal.cols,
                echo: true,
                baud: self.terminal.baud,
            },
            read_chunk_size: self.bridge.read_chunk_size.clamp(1, MAX_READ_CHUNK_SIZE),
        }
    }
}
