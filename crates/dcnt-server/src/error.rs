//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

use crate::tls::TlsError;

/// Errors raised while configuring or starting listeners.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called with an empty address list.
    #[error("no listen addresses given")]
    NoAddresses,
    /// `start` was called after `shutdown_gracefully`.
    #[error("server is shut down")]
    ShutDown,
    /// An address is not an IP literal.
    #[error("invalid listen address `{0}`")]
    InvalidAddress(String),
    /// Binding a listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Socket address that could not be bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Certificate or key could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),
}
