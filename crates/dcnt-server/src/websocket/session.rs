//! WebSocket session lifecycle: one connected peer from upgrade through
//! cleanup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use dcnt_core::CloseReason;
use dcnt_relay::PeerConnection;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::handler::{handle_message, Flow};
use crate::server::AppState;

/// How long the writer may spend flushing the close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a relay session for an upgraded connection.
///
/// 1. Registers the connection with the router and arms the authorization
///    timer
/// 2. Spawns the writer, which drains the outbound queue, pings
///    periodically and sends the close frame once the session is closed
/// 3. Feeds inbound frames to the router until the peer leaves, the
///    session is closed, or the writer fails
/// 4. Purges the session from every registry
#[instrument(skip_all, fields(peer = %peer, session_id))]
pub async fn run_session(ws: WebSocket, peer: SocketAddr, state: AppState) {
    let (tx, rx) = mpsc::channel(state.config.send_queue.max(1));
    let session = state.router.accept(&peer.to_string(), tx);
    let _ = tracing::Span::current().record("session_id", session.id().as_str());

    let gate = state
        .gate
        .arm(Arc::clone(&state.router), Arc::clone(&session));

    let (sink, mut stream) = ws.split();
    let mut writer = tokio::spawn(write_loop(
        sink,
        rx,
        Arc::clone(&session),
        state.config.heartbeat_interval(),
    ));
    let mut writer_done = false;
    let mut peer_closed = false;

    loop {
        tokio::select! {
            () = session.closed() => break,
            _ = &mut writer => {
                writer_done = true;
                debug!("writer ended");
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(msg)) => match handle_message(&state.router, &session, &msg) {
                    Flow::Continue => {}
                    Flow::Stop => break,
                    Flow::PeerClosed => {
                        peer_closed = true;
                        break;
                    }
                },
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    break;
                }
                None => break,
            },
        }
    }

    let report = state.router.disconnect(&session);
    gate.abort();

    if !writer_done {
        if session.is_closing() {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
        } else {
            writer.abort();
        }
    }

    // Reading on flushes the close reply queued by the protocol layer; the
    // stream ends once the handshake completes.
    if peer_closed {
        let drain = async { while let Some(Ok(_)) = stream.next().await {} };
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, drain).await.is_err() {
            debug!("peer never finished the close handshake");
        }
    }

    info!(
        reason = session.close_reason().map(CloseReason::text),
        protocols = ?report.protocols,
        purged_remote = report.purged_remote.len(),
        dropped = session.drop_count(),
        duration_ms = u64::try_from(session.age().as_millis()).unwrap_or(u64::MAX),
        "session ended"
    );
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
    session: Arc<PeerConnection>,
    heartbeat: Option<Duration>,
) {
    let ping_enabled = heartbeat.is_some();
    let mut ping = tokio::time::interval(heartbeat.unwrap_or(Duration::from_secs(30)));
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = session.closed() => {
                let reason = session.close_reason().unwrap_or(CloseReason::GoingAway);
                let frame = CloseFrame {
                    code: reason.code(),
                    reason: Utf8Bytes::from_static(reason.text()),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                let _ = sink.close().await;
                break;
            }
            msg = rx.recv() => {
                let Some(text) = msg else { break };
                if sink.send(Message::Text(text.to_string().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick(), if ping_enabled => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!("ping failed, ending session");
                    break;
                }
            }
        }
    }
}
