//! The two routing-message shapes `ExitSession` exchanges with its exit:
//! `ObtainExit` (request) and `GotExit`/close-exit (response/teardown).
//! Actual onion-routing wire bytes are a non-goal (spec.md §1); this is a
//! small `serde_json`-based envelope good enough for the session's own
//! handshake bookkeeping and for tests.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoutingFrame {
    /// spec.md §4.3.3: carries the E/X flags. `E=1` for exit-mode sessions,
    /// `E=0` for direct-to-snode sessions; `X` is reserved for expiration
    /// and currently always 0.
    ObtainExit { e: u8, x: u8, bundle_rc: bool },
    /// Dispatched by `stop()` on the session's current path, if any.
    CloseExit,
}

pub fn encode(frame: &RoutingFrame) -> Vec<u8> {
    serde_json::to_vec(frame).unwrap_or_default()
}

pub fn decode(bytes: &[u8]) -> Option<RoutingFrame> {
    serde_json::from_slice(bytes).ok()
}
