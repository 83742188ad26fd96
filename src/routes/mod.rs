//! HTTP route handlers.
//!
//! The terminal itself lives on the WebSocket route in [`crate::ws`]; the
//! handlers here are plain JSON endpoints.

pub mod health;
