//! `/health` endpoint.

use std::time::Instant;

use dcnt_relay::RelayStats;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` until shutdown starts, `"stopping"` after. Does not depend on
    /// the listener count.
    pub status: &'static str,
    /// Seconds since the server was created.
    pub uptime_secs: u64,
    /// Live local sessions.
    pub local_sessions: usize,
    /// Live remote sessions.
    pub remote_sessions: usize,
    /// Protocol names with a local subscriber.
    pub local_protocols: usize,
    /// Protocol names with a remote subscriber.
    pub remote_protocols: usize,
    /// Active listeners.
    pub listeners: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    stats: RelayStats,
    listeners: usize,
    shutting_down: bool,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "stopping" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        local_sessions: stats.local_sessions,
        remote_sessions: stats.remote_sessions,
        local_protocols: stats.local_protocols,
        remote_protocols: stats.remote_protocols,
        listeners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), RelayStats::default(), 1, false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_is_ok_without_listeners() {
        let resp = health_check(Instant::now(), RelayStats::default(), 0, false);
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.listeners, 0);
    }

    #[test]
    fn status_while_stopping() {
        let resp = health_check(Instant::now(), RelayStats::default(), 0, true);
        assert_eq!(resp.status, "stopping");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, RelayStats::default(), 0, false);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counters_are_copied() {
        let stats = RelayStats {
            local_sessions: 2,
            remote_sessions: 3,
            local_protocols: 1,
            remote_protocols: 4,
        };
        let resp = health_check(Instant::now(), stats, 2, false);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["local_sessions"], 2);
        assert_eq!(json["remote_sessions"], 3);
        assert_eq!(json["local_protocols"], 1);
        assert_eq!(json["remote_protocols"], 4);
        assert_eq!(json["listeners"], 2);
    }
}
