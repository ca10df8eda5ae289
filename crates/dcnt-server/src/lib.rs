//! # dcnt-server
//!
//! Network front end of the relay.
//!
//! - One listener per configured address, each independently started and
//!   stopped, optionally wrapped in TLS
//! - WebSocket upgrade on `/` and `/ws`, handing each connection to the
//!   [`SignalRouter`](dcnt_relay::SignalRouter)
//! - `/health` with registry counters
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod listener;
pub mod server;
pub mod shutdown;
pub mod tls;
pub mod websocket;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{RelayServer, StartOutcome, StopOutcome};
pub use tls::{TlsAcceptor, TlsError};
