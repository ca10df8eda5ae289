//! WebSocket gateway: per-connection session task and frame dispatch.

pub mod handler;
pub mod session;
