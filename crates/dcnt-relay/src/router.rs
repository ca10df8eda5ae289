//! `SignalRouter`: the relay aggregate.
//!
//! Owns the connection and subscription registries of both localities
//! behind one mutex and exposes the operations that touch them: accept,
//! register/unregister, the authorization predicate, relay and disconnect
//! cleanup.
//!
//! Routing rules:
//! - Local → Remote: point-to-point to the remote session named by
//!   `session_id`.
//! - Remote → Local: fan-out to every local subscriber of any protocol the
//!   remote sender is subscribed to, each target at most once.
//!
//! Unknown or unreachable targets are skipped silently.

use std::collections::HashSet;
use std::sync::Arc;

use dcnt_core::{
    CloseReason, Envelope, InboundFrame, Locality, LocalityClassifier, LoopbackHeuristic,
    RelayError, SessionId, Signal,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connections::ConnectionRegistry;
use crate::session::{PeerConnection, SessionIdSource, UuidSessionIds};
use crate::subscriptions::SubscriptionRegistry;

/// Behavior switches.
#[derive(Clone, Debug)]
pub struct RelayOptions {
    /// When a local session disconnects, remove every remote subscriber of
    /// each protocol it held from the remote registry. The remote
    /// connections stay open but lose authorization.
    pub purge_remote_on_local_disconnect: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            purge_remote_on_local_disconnect: true,
        }
    }
}

/// Result of handling one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was a registration.
    Registered {
        /// Names new to this session.
        added: usize,
        /// Whether the session was unauthorized before this frame.
        newly_authorized: bool,
    },
    /// The frame was a signaling message.
    Relayed {
        /// Number of sessions the envelope was queued to.
        delivered: usize,
    },
    /// The session is no longer registered; the frame was dropped.
    Ignored,
}

/// What disconnect cleanup removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Protocol names the session was subscribed to.
    pub protocols: Vec<String>,
    /// Remote sessions stripped of all subscriptions by the local cascade.
    pub purged_remote: Vec<SessionId>,
}

/// Registry sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Live local sessions.
    pub local_sessions: usize,
    /// Live remote sessions.
    pub remote_sessions: usize,
    /// Protocol names with at least one local subscriber.
    pub local_protocols: usize,
    /// Protocol names with at least one remote subscriber.
    pub remote_protocols: usize,
}

#[derive(Default)]
struct Side {
    connections: ConnectionRegistry,
    subscriptions: SubscriptionRegistry,
}

#[derive(Default)]
struct RelayState {
    local: Side,
    remote: Side,
}

impl RelayState {
    fn side(&self, locality: Locality) -> &Side {
        match locality {
            Locality::Local => &self.local,
            Locality::Remote => &self.remote,
        }
    }

    fn side_mut(&mut self, locality: Locality) -> &mut Side {
        match locality {
            Locality::Local => &mut self.local,
            Locality::Remote => &mut self.remote,
        }
    }

    fn is_live(&self, session: &PeerConnection) -> bool {
        self.side(session.locality())
            .connections
            .contains(session.id())
    }

    fn is_authorized(&self, session: &PeerConnection) -> bool {
        self.side(session.locality())
            .subscriptions
            .is_subscribed(session.id())
    }
}

/// The relay aggregate.
pub struct SignalRouter {
    state: Mutex<RelayState>,
    classifier: Arc<dyn LocalityClassifier>,
    ids: Arc<dyn SessionIdSource>,
    options: RelayOptions,
}

impl SignalRouter {
    /// Router with the loopback heuristic and UUID session ids.
    pub fn new(options: RelayOptions) -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
            classifier: Arc::new(LoopbackHeuristic::default()),
            ids: Arc::new(UuidSessionIds),
            options,
        }
    }

    /// Replace the locality classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn LocalityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the session id source.
    #[must_use]
    pub fn with_id_source(mut self, ids: Arc<dyn SessionIdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Active options.
    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Classify a peer address with the configured classifier.
    pub fn classify(&self, peer_addr: &str) -> Locality {
        self.classifier.classify(peer_addr)
    }

    /// Register a newly accepted connection.
    pub fn accept(&self, peer_addr: &str, tx: mpsc::Sender<Arc<str>>) -> Arc<PeerConnection> {
        let id = self.ids.next_id();
        let locality = self.classify(peer_addr);
        let session = Arc::new(PeerConnection::new(id, locality, peer_addr, tx));

        let mut state = self.state.lock();
        state.side_mut(locality).connections.insert(Arc::clone(&session));
        info!(
            session_id = %session.id(),
            %locality,
            peer = peer_addr,
            "session accepted"
        );
        session
    }

    /// Live connection of `locality` with id `id`.
    pub fn lookup(&self, locality: Locality, id: &SessionId) -> Option<Arc<PeerConnection>> {
        self.state
            .lock()
            .side(locality)
            .connections
            .get(id)
            .cloned()
    }

    /// Whether the session currently holds at least one subscription in its
    /// locality's registry. Recomputed on every call.
    pub fn is_authorized(&self, session: &PeerConnection) -> bool {
        self.state.lock().is_authorized(session)
    }

    /// Subscribe a live session to protocol names. Returns how many names
    /// were new to it; a session that is no longer live is left untouched.
    pub fn register(&self, session: &PeerConnection, protocols: &[String]) -> usize {
        let mut state = self.state.lock();
        if !state.is_live(session) {
            return 0;
        }
        Self::register_locked(&mut state, session, protocols)
    }

    /// Remove a session from every protocol of a locality. Returns the names
    /// it held.
    pub fn unregister(&self, locality: Locality, id: &SessionId) -> Vec<String> {
        self.state
            .lock()
            .side_mut(locality)
            .subscriptions
            .unregister(id)
    }

    /// Protocol names a session is subscribed to.
    pub fn protocols_of(&self, locality: Locality, id: &SessionId) -> Vec<String> {
        self.state
            .lock()
            .side(locality)
            .subscriptions
            .protocols_of(id)
            .to_vec()
    }

    /// Parse and dispatch one text frame from `session`.
    ///
    /// Registration frames are accepted in any state. Signaling frames are
    /// relayed only when the session is authorized at this moment.
    pub fn handle_text(
        &self,
        session: &PeerConnection,
        text: &str,
    ) -> Result<FrameOutcome, RelayError> {
        let frame = InboundFrame::parse(text)?;

        let mut state = self.state.lock();
        if !state.is_live(session) {
            return Ok(FrameOutcome::Ignored);
        }
        let authorized = state.is_authorized(session);

        match frame {
            InboundFrame::Register { protocols } => {
                let added = Self::register_locked(&mut state, session, &protocols);
                Ok(FrameOutcome::Registered {
                    added,
                    newly_authorized: !authorized && state.is_authorized(session),
                })
            }
            InboundFrame::Signal(signal) if authorized => Ok(FrameOutcome::Relayed {
                delivered: Self::route_locked(&state, session, signal),
            }),
            InboundFrame::Signal(_) => Err(RelayError::Unauthorized),
        }
    }

    /// Relay a parsed signal from an authorized session. Returns the number
    /// of sessions it was queued to.
    pub fn relay(&self, session: &PeerConnection, signal: Signal) -> Result<usize, RelayError> {
        let state = self.state.lock();
        if !state.is_live(session) {
            return Ok(0);
        }
        if !state.is_authorized(session) {
            return Err(RelayError::Unauthorized);
        }
        Ok(Self::route_locked(&state, session, signal))
    }

    /// Close the session if it is live and still unauthorized. Returns
    /// whether it was closed.
    pub fn enforce_authorization(&self, session: &PeerConnection) -> bool {
        let state = self.state.lock();
        if !state.is_live(session) || state.is_authorized(session) {
            return false;
        }
        session.close(CloseReason::AuthorizationTimeout)
    }

    /// Purge a closed or failed session from every registry.
    ///
    /// For a local session with the cascade enabled, every remote subscriber
    /// of each protocol it held is removed from the remote registry as well.
    /// Calling this twice for the same session is a no-op.
    pub fn disconnect(&self, session: &PeerConnection) -> CleanupReport {
        let mut state = self.state.lock();
        let locality = session.locality();
        let side = state.side_mut(locality);
        if side.connections.remove(session.id()).is_none() {
            return CleanupReport::default();
        }
        let protocols = side.subscriptions.unregister(session.id());

        let mut purged_remote = Vec::new();
        if locality == Locality::Local && self.options.purge_remote_on_local_disconnect {
            let remote = &mut state.remote.subscriptions;
            for name in &protocols {
                let subscribers = remote.subscribers(name).to_vec();
                for id in subscribers {
                    let _ = remote.unregister(&id);
                    purged_remote.push(id);
                }
            }
        }

        info!(
            session_id = %session.id(),
            %locality,
            protocols = protocols.len(),
            purged_remote = purged_remote.len(),
            "session cleaned up"
        );
        CleanupReport {
            protocols,
            purged_remote,
        }
    }

    /// Close every live session.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let state = self.state.lock();
        state
            .local
            .connections
            .iter()
            .chain(state.remote.connections.iter())
            .filter(|session| session.close(reason))
            .count()
    }

    /// Number of sessions of `locality` subscribed to `protocol`.
    pub fn subscriber_count(&self, locality: Locality, protocol: &str) -> usize {
        self.state
            .lock()
            .side(locality)
            .subscriptions
            .subscribers(protocol)
            .len()
    }

    /// Current registry sizes.
    pub fn stats(&self) -> RelayStats {
        let state = self.state.lock();
        RelayStats {
            local_sessions: state.local.connections.len(),
            remote_sessions: state.remote.connections.len(),
            local_protocols: state.local.subscriptions.protocol_count(),
            remote_protocols: state.remote.subscriptions.protocol_count(),
        }
    }

    fn register_locked(
        state: &mut RelayState,
        session: &PeerConnection,
        protocols: &[String],
    ) -> usize {
        let added = state
            .side_mut(session.locality())
            .subscriptions
            .register(session.id(), protocols);
        debug!(
            session_id = %session.id(),
            locality = %session.locality(),
            ?protocols,
            added,
            "protocols registered"
        );
        added
    }

    fn route_locked(state: &RelayState, session: &PeerConnection, signal: Signal) -> usize {
        let kind = signal.payload.kind();
        match session.locality() {
            Locality::Local => {
                let Some(target_id) = signal.session_id.clone() else {
                    debug!(session_id = %session.id(), kind, "no target session, dropped");
                    return 0;
                };
                let Some(target) = state.remote.connections.get(&target_id) else {
                    debug!(session_id = %session.id(), target_session = %target_id, kind, "target not found, dropped");
                    return 0;
                };
                let Some(text) = encode(&Envelope::to_remote(signal, session.peer_addr())) else {
                    return 0;
                };
                let delivered = usize::from(target.send(text));
                debug!(session_id = %session.id(), target_session = %target_id, kind, delivered, "relayed to remote");
                delivered
            }
            Locality::Remote => {
                let mut seen = HashSet::new();
                let targets: Vec<&Arc<PeerConnection>> = state
                    .remote
                    .subscriptions
                    .protocols_of(session.id())
                    .iter()
                    .flat_map(|name| state.local.subscriptions.subscribers(name))
                    .filter(|id| seen.insert(*id))
                    .filter_map(|id| state.local.connections.get(id))
                    .collect();
                if targets.is_empty() {
                    debug!(session_id = %session.id(), kind, "no local subscribers, dropped");
                    return 0;
                }
                let Some(text) = encode(&Envelope::to_local(signal, session.id())) else {
                    return 0;
                };
                let delivered = targets
                    .into_iter()
                    .filter(|target| target.send(Arc::clone(&text)))
                    .count();
                debug!(session_id = %session.id(), kind, delivered, "relayed to local subscribers");
                delivered
            }
        }
    }
}

fn encode(envelope: &Envelope) -> Option<Arc<str>> {
    match envelope.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(error = %e, "failed to serialize envelope");
            None
        }
    }
}
