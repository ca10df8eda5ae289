//! Local vs. remote classification of peers.
//!
//! The classification is a textual heuristic over the peer address, not
//! authentication. With the default markers only addresses containing
//! `127.0.0.1` (including the IPv4-mapped form `::ffff:127.0.0.1`) are local;
//! the IPv6 loopback `::1` is classified remote.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the relay a session belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    /// Trusted, device-resident instance.
    Local,
    /// Untrusted external peer.
    Remote,
}

impl Locality {
    /// The other locality.
    pub fn opposite(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides the locality of a peer from its address text.
pub trait LocalityClassifier: Send + Sync {
    /// Classify a peer address such as `127.0.0.1:51234`.
    fn classify(&self, peer_address: &str) -> Locality;
}

/// Marks a peer local when its address contains any configured marker.
#[derive(Clone, Debug)]
pub struct LoopbackHeuristic {
    markers: Vec<String>,
}

impl LoopbackHeuristic {
    /// Marker used when none are configured.
    pub const DEFAULT_MARKER: &'static str = "127.0.0.1";

    /// Build a classifier from a list of local host markers.
    ///
    /// Empty markers are ignored; an empty list falls back to the default.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers: Vec<String> = markers
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.is_empty())
            .collect();
        if markers.is_empty() {
            Self::default()
        } else {
            Self { markers }
        }
    }

    /// Configured markers.
    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for LoopbackHeuristic {
    fn default() -> Self {
        Self {
            markers: vec![Self::DEFAULT_MARKER.to_owned()],
        }
    }
}

impl LocalityClassifier for LoopbackHeuristic {
    fn classify(&self, peer_address: &str) -> Locality {
        if self.markers.iter().any(|m| peer_address.contains(m.as_str())) {
            Locality::Local
        } else {
            Locality::Remote
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_loopback_is_local() {
        let c = LoopbackHeuristic::default();
        assert_eq!(c.classify("127.0.0.1:4200"), Locality::Local);
    }

    #[test]
    fn ipv4_mapped_loopback_is_local() {
        let c = LoopbackHeuristic::default();
        assert_eq!(c.classify("[::ffff:127.0.0.1]:51000"), Locality::Local);
    }

    #[test]
    fn ipv6_loopback_is_remote_by_default() {
        let c = LoopbackHeuristic::default();
        assert_eq!(c.classify("[::1]:51000"), Locality::Remote);
    }

    #[test]
    fn other_loopback_addresses_are_remote() {
        let c = LoopbackHeuristic::default();
        assert_eq!(c.classify("127.0.0.2:51000"), Locality::Remote);
        assert_eq!(c.classify("192.168.1.20:51000"), Locality::Remote);
    }

    #[test]
    fn custom_markers() {
        let c = LoopbackHeuristic::new(["127.0.0.1", "[::1]"]);
        assert_eq!(c.classify("[::1]:9"), Locality::Local);
        assert_eq!(c.classify("10.0.0.1:9"), Locality::Remote);
    }

    #[test]
    fn empty_markers_fall_back_to_default() {
        let c = LoopbackHeuristic::new(Vec::<String>::new());
        assert_eq!(c.markers(), [LoopbackHeuristic::DEFAULT_MARKER]);
        let c = LoopbackHeuristic::new([""]);
        assert_eq!(c.markers(), [LoopbackHeuristic::DEFAULT_MARKER]);
    }

    #[test]
    fn opposite() {
        assert_eq!(Locality::Local.opposite(), Locality::Remote);
        assert_eq!(Locality::Remote.opposite(), Locality::Local);
    }

    #[test]
    fn serde_lowercase() {
        assert_eq!(serde_json::to_string(&Locality::Remote).unwrap(), r#""remote""#);
    }
}
