//! A built onion circuit, as handed to the session by the path-builder
//! collaborator's `on_path_built` hook.

use crate::contact::RouterContact;
use duskrelay_core::{time::TimestampMs, PathId, RouterId};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Path {
    pub id: PathId,
    pub hops: Vec<RouterContact>,
    pub built_at: TimestampMs,
    pub lifetime: Duration,
    /// Measured round-trip latency of this circuit.
    pub latency: Duration,
    /// Latency of the remote introduction this path was built toward, if
    /// any; zero for a direct exit path, which has no introduction hop.
    pub remote_intro_latency: Duration,
}

impl Path {
    /// The last hop in the circuit — the exit or service-node this path
    /// terminates at.
    pub fn terminus(&self) -> Option<RouterId> {
        self.hops.last().map(|h| h.router)
    }

    pub fn expires_at(&self) -> TimestampMs {
        self.built_at.saturating_add(self.lifetime)
    }

    pub fn is_expired(&self, now: TimestampMs) -> bool {
        now > self.expires_at()
    }

    /// `rtt = (path.latency + remote_intro.latency) × 2`.
    pub fn estimated_rtt(&self) -> Duration {
        (self.latency + self.remote_intro_latency) * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(latency_ms: u64, intro_ms: u64) -> Path {
        Path {
            id: PathId::from_bytes([1; 16]),
            hops: vec![RouterContact::new(RouterId::from_bytes([2; 32]))],
            built_at: TimestampMs::from_millis(0),
            lifetime: Duration::from_secs(600),
            latency: Duration::from_millis(latency_ms),
            remote_intro_latency: Duration::from_millis(intro_ms),
        }
    }

    #[test]
    fn estimated_rtt_sums_and_doubles() {
        let p = path(50, 25);
        assert_eq!(p.estimated_rtt(), Duration::from_millis(150));
    }

    #[test]
    fn expiry_follows_built_at_plus_lifetime() {
        let p = path(0, 0);
        assert!(!p.is_expired(TimestampMs::from_millis(600_000)));
        assert!(p.is_expired(TimestampMs::from_millis(600_001)));
    }

    #[test]
    fn terminus_is_last_hop() {
        let exit = RouterId::from_bytes([9; 32]);
        let p = Path {
            hops: vec![
                RouterContact::new(RouterId::from_bytes([1; 32])),
                RouterContact::new(exit),
            ],
            ..path(0, 0)
        };
        assert_eq!(p.terminus(), Some(exit));
    }
}
