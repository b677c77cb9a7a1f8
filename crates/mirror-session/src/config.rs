use std::time::Duration;

/// Tunables for a mirroring session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the worker waits for socket readiness before re-checking the
    /// lifecycle state.
    pub poll_interval: Duration,
    /// Deadline for finishing one record once its first byte has arrived.
    pub record_deadline: Duration,
    /// Largest accepted record payload; bigger records terminate the stream
    /// before any allocation happens.
    pub max_payload: usize,
    /// Listen on IPv6 when the negotiated peer address is IPv6.
    pub prefer_ipv6: bool,
    /// Accept the data connection only from the negotiated peer address.
    pub require_known_peer: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            record_deadline: Duration::from_secs(10),
            max_payload: 8 * 1024 * 1024,
            prefer_ipv6: false,
            require_known_peer: false,
        }
    }
}
