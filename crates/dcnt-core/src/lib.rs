//! # dcnt-core
//!
//! Shared vocabulary for the dcnt signaling relay.
//!
//! - [`SessionId`]: opaque identifier assigned to every accepted connection
//! - [`Locality`] and the [`LocalityClassifier`] seam (local = trusted, loopback-originated)
//! - Wire frames ([`InboundFrame`]) and forwarded envelopes ([`Envelope`])
//! - The relay error taxonomy ([`RelayError`]) and WebSocket [`CloseReason`]s

#![deny(unsafe_code)]

pub mod errors;
pub mod frames;
pub mod ids;
pub mod locality;

pub use errors::{CloseReason, RelayError};
pub use frames::{Envelope, InboundFrame, Payload, Signal};
pub use ids::SessionId;
pub use locality::{Locality, LocalityClassifier, LoopbackHeuristic};
