//! Authorization grace timer.
//!
//! Every accepted session gets one timer. When it fires, a session that is
//! still live and holds no subscription is closed with
//! [`CloseReason::AuthorizationTimeout`](dcnt_core::CloseReason). A session
//! that closes first cancels its timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::info;

use crate::router::SignalRouter;
use crate::session::PeerConnection;

/// How a grace timer ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// The session was authorized (or already gone) when the timer fired.
    Passed,
    /// The session was closed for failing to subscribe in time.
    Expired,
    /// The session closed before the timer fired.
    Cancelled,
}

/// Arms per-session authorization timers.
#[derive(Clone, Copy, Debug)]
pub struct AuthorizationGate {
    grace: Duration,
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_GRACE)
    }
}

impl AuthorizationGate {
    /// Grace period used when none is configured.
    pub const DEFAULT_GRACE: Duration = Duration::from_millis(1000);

    /// Gate with the given grace period.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Configured grace period.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Wait out the grace period for `session`, then enforce authorization.
    pub async fn watch(&self, router: &SignalRouter, session: &PeerConnection) -> GateOutcome {
        tokio::select! {
            () = time::sleep(self.grace) => {
                if router.enforce_authorization(session) {
                    info!(
                        session_id = %session.id(),
                        peer = session.peer_addr(),
                        grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                        "no subscription within grace period, closing"
                    );
                    GateOutcome::Expired
                } else {
                    GateOutcome::Passed
                }
            }
            () = session.closed() => GateOutcome::Cancelled,
        }
    }

    /// Spawn [`watch`](Self::watch) on the runtime.
    pub fn arm(
        &self,
        router: Arc<SignalRouter>,
        session: Arc<PeerConnection>,
    ) -> JoinHandle<GateOutcome> {
        let gate = *self;
        tokio::spawn(async move { gate.watch(&router, &session).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RelayOptions;
    use dcnt_core::CloseReason;
    use tokio::sync::mpsc;

    fn setup(addr: &str) -> (Arc<SignalRouter>, Arc<PeerConnection>, mpsc::Receiver<Arc<str>>) {
        let router = Arc::new(SignalRouter::new(RelayOptions::default()));
        let (tx, rx) = mpsc::channel(4);
        let session = router.accept(addr, tx);
        (router, session, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_session_is_closed_after_grace() {
        let (router, session, _rx) = setup("203.0.113.1:4000");
        let handle = AuthorizationGate::default().arm(Arc::clone(&router), Arc::clone(&session));

        time::advance(Duration::from_millis(999)).await;
        assert!(!session.is_closing());

        assert_eq!(handle.await.unwrap(), GateOutcome::Expired);
        assert_eq!(session.close_reason(), Some(CloseReason::AuthorizationTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribed_session_passes() {
        let (router, session, _rx) = setup("127.0.0.1:4000");
        let handle = AuthorizationGate::default().arm(Arc::clone(&router), Arc::clone(&session));

        let _ = router.register(&session, &["demo".to_owned()]);
        assert_eq!(handle.await.unwrap(), GateOutcome::Passed);
        assert!(!session.is_closing());
    }

    #[tokio::test(start_paused = true)]
    async fn session_that_loses_subscriptions_is_closed() {
        let (router, session, _rx) = setup("203.0.113.1:4000");
        let _ = router.register(&session, &["demo".to_owned()]);
        let _ = router.unregister(session.locality(), session.id());

        let outcome = AuthorizationGate::default().watch(&router, &session).await;
        assert_eq!(outcome, GateOutcome::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_session_is_left_alone() {
        let (router, session, _rx) = setup("203.0.113.1:4000");
        let _ = router.disconnect(&session);

        let outcome = AuthorizationGate::default().watch(&router, &session).await;
        assert_eq!(outcome, GateOutcome::Passed);
        assert!(!session.is_closing());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_first_cancels_the_timer() {
        let (router, session, _rx) = setup("203.0.113.1:4000");
        let handle = AuthorizationGate::new(Duration::from_secs(30))
            .arm(Arc::clone(&router), Arc::clone(&session));

        let _ = session.close(CloseReason::ProtocolViolation);
        assert_eq!(handle.await.unwrap(), GateOutcome::Cancelled);
        assert_eq!(session.close_reason(), Some(CloseReason::ProtocolViolation));
    }

    #[test]
    fn default_grace_is_one_second() {
        assert_eq!(AuthorizationGate::default().grace(), Duration::from_millis(1000));
    }
}
