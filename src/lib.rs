#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

//! termgate library - the building blocks of the browser terminal gateway.
//!
//! - `bridge` - per-connection relay between a WebSocket and a remote shell
//! - `remote` - remote session traits and the russh-backed SSH client
//! - `ws` - WebSocket upgrade and frame adaptation
//! - `routes` - REST handlers
//! - `config` - configuration loading
//! - `server` - router assembly

pub mod bridge;
pub mod config;
pub mod remote;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use bridge::{Bridge, BridgeOptions, BridgeOutcome, DuplexMessage};
pub use config::Config;
pub use remote::{Connector, RemoteSession, SshTarget};
pub use state::AppState;
