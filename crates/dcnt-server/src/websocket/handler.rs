//! Inbound frame dispatch: hands text to the router and turns relay errors
//! into connection closes.

use axum::extract::ws::Message;
use dcnt_core::RelayError;
use dcnt_relay::{FrameOutcome, PeerConnection, SignalRouter};
use tracing::{debug, info, trace, warn};

/// What the read loop should do after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Stop reading; the session is closing or the peer left.
    Stop,
    /// The peer started the close handshake. The stream must be drained so
    /// the close reply gets flushed.
    PeerClosed,
}

/// Handle one WebSocket message from `session`.
pub fn handle_message(router: &SignalRouter, session: &PeerConnection, msg: &Message) -> Flow {
    match msg {
        Message::Text(text) => handle_text(router, session, text.as_str()),
        // Binary frames are accepted when they carry UTF-8 text.
        Message::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => handle_text(router, session, text),
            Err(_) => reject(
                session,
                &RelayError::ProtocolViolation("binary frame is not UTF-8".into()),
            ),
        },
        Message::Ping(_) | Message::Pong(_) => Flow::Continue,
        Message::Close(frame) => {
            debug!(session_id = %session.id(), ?frame, "peer sent close frame");
            Flow::PeerClosed
        }
    }
}

/// Handle one text frame from `session`.
pub fn handle_text(router: &SignalRouter, session: &PeerConnection, text: &str) -> Flow {
    match router.handle_text(session, text) {
        Ok(FrameOutcome::Registered {
            added,
            newly_authorized,
        }) => {
            if newly_authorized {
                info!(
                    session_id = %session.id(),
                    locality = %session.locality(),
                    added,
                    "session authorized"
                );
            }
            Flow::Continue
        }
        Ok(FrameOutcome::Relayed { delivered }) => {
            trace!(session_id = %session.id(), delivered, "signal relayed");
            Flow::Continue
        }
        Ok(FrameOutcome::Ignored) => Flow::Stop,
        Err(e) if e.is_silent() => Flow::Continue,
        Err(e) => reject(session, &e),
    }
}

fn reject(session: &PeerConnection, error: &RelayError) -> Flow {
    warn!(
        session_id = %session.id(),
        peer = session.peer_addr(),
        error_kind = error.error_kind(),
        %error,
        "closing session"
    );
    if let Some(reason) = error.close_reason() {
        let _ = session.close(reason);
    }
    Flow::Stop
}
