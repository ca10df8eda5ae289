//! # dcnt-relay
//!
//! The relay core. Every accepted connection becomes a [`PeerConnection`]
//! tagged with a [`Locality`](dcnt_core::Locality); sessions subscribe to
//! protocol names and the [`SignalRouter`] forwards signaling envelopes
//! between local and remote subscribers of the same name.
//!
//! All four maps (connections and subscriptions, per locality) live behind a
//! single lock inside [`SignalRouter`], so registration, relay lookups and the
//! disconnect cascade never observe each other half-done.

#![deny(unsafe_code)]

pub mod connections;
pub mod gate;
pub mod router;
pub mod session;
pub mod subscriptions;

pub use connections::ConnectionRegistry;
pub use gate::{AuthorizationGate, GateOutcome};
pub use router::{CleanupReport, FrameOutcome, RelayOptions, RelayStats, SignalRouter};
pub use session::{PeerConnection, SessionIdSource, UuidSessionIds};
pub use subscriptions::SubscriptionRegistry;
