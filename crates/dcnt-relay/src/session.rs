//! A live session: id, locality and the outbound side of its connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dcnt_core::{CloseReason, Locality, SessionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Produces session identifiers. Implementations must never repeat an id.
pub trait SessionIdSource: Send + Sync {
    /// Next unused identifier.
    fn next_id(&self) -> SessionId;
}

/// UUIDv7 identifiers.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidSessionIds;

impl SessionIdSource for UuidSessionIds {
    fn next_id(&self) -> SessionId {
        SessionId::new()
    }
}

/// One accepted connection.
///
/// Outbound text goes through a bounded channel drained by the connection's
/// writer task. Closing cancels a token the writer watches; the first close
/// reason wins.
pub struct PeerConnection {
    id: SessionId,
    locality: Locality,
    peer_addr: String,
    tx: mpsc::Sender<Arc<str>>,
    close: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    dropped_messages: AtomicU64,
    accepted_at: Instant,
}

impl PeerConnection {
    /// Create a session handle.
    pub fn new(
        id: SessionId,
        locality: Locality,
        peer_addr: impl Into<String>,
        tx: mpsc::Sender<Arc<str>>,
    ) -> Self {
        Self {
            id,
            locality,
            peer_addr: peer_addr.into(),
            tx,
            close: CancellationToken::new(),
            close_reason: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
            accepted_at: Instant::now(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Locality fixed at accept time.
    pub fn locality(&self) -> Locality {
        self.locality
    }

    /// Peer address as `ip:port`.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Queue a text frame for the peer.
    ///
    /// Returns `false` when the session is closing or its queue is full or
    /// gone; the message is dropped.
    pub fn send(&self, text: Arc<str>) -> bool {
        if self.close.is_cancelled() {
            return false;
        }
        if self.tx.try_send(text).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Ask the writer to close the connection.
    ///
    /// Returns `false` if the session was already closing.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut slot = self.close_reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.close.cancel();
        true
    }

    /// Reason passed to the first [`close`](Self::close) call.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Whether a close was requested.
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once a close is requested.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    /// Messages dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Time since accept.
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("locality", &self.locality)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (PeerConnection, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = PeerConnection::new(
            SessionId::from_raw("s1"),
            Locality::Local,
            "127.0.0.1:5000",
            tx,
        );
        (conn, rx)
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send(Arc::from("hello")));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn send_to_full_channel_drops() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::from("one")));
        assert!(!conn.send(Arc::from("two")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_closed_channel_returns_false() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.send(Arc::from("hello")));
    }

    #[test]
    fn first_close_reason_wins() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.close(CloseReason::AuthorizationTimeout));
        assert!(!conn.close(CloseReason::ProtocolViolation));
        assert_eq!(conn.close_reason(), Some(CloseReason::AuthorizationTimeout));
        assert!(conn.is_closing());
    }

    #[test]
    fn closing_session_refuses_sends() {
        let (conn, mut rx) = make_connection(4);
        let _ = conn.close(CloseReason::GoingAway);
        assert!(!conn.send(Arc::from("late")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_future_resolves() {
        let (conn, _rx) = make_connection(4);
        let conn = Arc::new(conn);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        let _ = conn.close(CloseReason::Unauthorized);
        waiter.await.unwrap();
    }

    #[test]
    fn uuid_source_is_unique() {
        let src = UuidSessionIds;
        assert_ne!(src.next_id(), src.next_id());
    }
}
