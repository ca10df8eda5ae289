//! Relay error taxonomy and connection close reasons.

/// Errors raised while handling a peer's frame.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Malformed encoding or unrecognized frame shape.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A signaling frame from a session with no subscriptions.
    #[error("unauthorized")]
    Unauthorized,
    /// No subscription arrived within the grace period.
    #[error("authorization timeout")]
    AuthorizationTimeout,
    /// Relay target absent or unreachable. Never reported to the sender.
    #[error("target not found")]
    TargetNotFound,
}

impl RelayError {
    /// Whether the error is swallowed without affecting the sender.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::TargetNotFound)
    }

    /// How the sender's connection is closed, if at all.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Self::ProtocolViolation(_) => Some(CloseReason::ProtocolViolation),
            Self::Unauthorized => Some(CloseReason::Unauthorized),
            Self::AuthorizationTimeout => Some(CloseReason::AuthorizationTimeout),
            Self::TargetNotFound => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Unauthorized => "unauthorized",
            Self::AuthorizationTimeout => "authorization_timeout",
            Self::TargetNotFound => "target_not_found",
        }
    }
}

/// Why the relay closed a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The session never subscribed within the grace period.
    AuthorizationTimeout,
    /// The session sent signaling before subscribing.
    Unauthorized,
    /// The session sent a malformed or unrecognized frame.
    ProtocolViolation,
    /// The server is shutting down.
    GoingAway,
}

impl CloseReason {
    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::AuthorizationTimeout => 1000,
            Self::Unauthorized | Self::ProtocolViolation => 1008,
            Self::GoingAway => 1001,
        }
    }

    /// WebSocket close reason text.
    pub fn text(self) -> &'static str {
        match self {
            Self::AuthorizationTimeout | Self::Unauthorized => "Unauthorized",
            Self::ProtocolViolation => "Protocol violation",
            Self::GoingAway => "Going away",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_not_found_is_silent() {
        assert!(RelayError::TargetNotFound.is_silent());
        assert!(RelayError::TargetNotFound.close_reason().is_none());
        assert!(!RelayError::Unauthorized.is_silent());
    }

    #[test]
    fn violations_close_the_connection() {
        let err = RelayError::ProtocolViolation("bad".into());
        assert_eq!(err.close_reason(), Some(CloseReason::ProtocolViolation));
        assert_eq!(err.to_string(), "protocol violation: bad");
    }

    #[test]
    fn timeout_reason_is_distinguishable() {
        let timeout = CloseReason::AuthorizationTimeout;
        assert_eq!(timeout.text(), "Unauthorized");
        assert_eq!(timeout.code(), 1000);
        assert_ne!(timeout.code(), CloseReason::ProtocolViolation.code());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(RelayError::Unauthorized.error_kind(), "unauthorized");
        assert_eq!(RelayError::AuthorizationTimeout.error_kind(), "authorization_timeout");
        assert_eq!(RelayError::TargetNotFound.error_kind(), "target_not_found");
    }
}
