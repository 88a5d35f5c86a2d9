//! The `PathPool` collaborator contract. The core consumes this trait; it
//! never owns the build logic behind it — grounded on `llarp::path::Builder`'s
//! virtual surface (`BaseSession : public llarp::path::Builder`),
//! transliterated from inheritance to composition: the session holds a
//! pool handle, paths never hold a strong reference back to their session.

use crate::contact::RouterContact;
use crate::path::Path;
use async_trait::async_trait;
use duskrelay_core::{time::TimestampMs, PathId, RouterId};
use std::collections::HashSet;
use std::time::Duration;

/// Capabilities the core relies on to keep a pool of paths toward a chosen
/// terminus alive. `Send + Sync` so it can be held behind an `Arc` and
/// shared across the daemon's worker tasks.
#[async_trait]
pub trait PathPool: Send + Sync {
    /// True when fewer than [`PathPool::number_of_paths`] paths are alive,
    /// or the current path is within one lifetime quarter of expiry
    /// (urgent rebuild). The pool itself decides which condition applies;
    /// the session only asks.
    fn should_build_more(&self, now: TimestampMs) -> bool;

    /// The intermediate hops the builder would use for the next path, with
    /// `blacklist` already excluded and `exit_router` not yet appended —
    /// the session is responsible for forcing the exit as the terminal hop.
    /// Returns `None` when no build is currently possible (e.g. every hop
    /// is blacklisted).
    async fn hops_for_build(
        &self,
        blacklist: &HashSet<RouterId>,
        exit_router: RouterId,
    ) -> Option<Vec<RouterContact>>;

    /// Enqueue an upstream frame on `path_id`'s routing-message queue.
    /// Returns `false` if that path's own outgoing queue is saturated, in
    /// which case the caller retains the message for the next flush tick.
    fn send_routing_message(&self, path_id: PathId, payload: Vec<u8>) -> bool;

    /// Look up a currently alive path terminating at `router`.
    fn get_path_by_router(&self, router: RouterId) -> Option<Path>;

    /// Pick the best currently alive path (lowest latency), if any.
    fn best_path(&self) -> Option<Path>;

    fn number_of_paths(&self) -> usize;

    fn path_lifetime(&self) -> Duration;
}

/// Hooks fired by whatever drives path construction (the real builder
/// framework, or [`crate::TestPathPool`] in tests) back into the session
/// that owns the pool. Kept as a separate trait so this crate never needs
/// to know about `ExitSession`'s internals — only that *something*
/// implements these two callbacks.
pub trait PathEventSink: Send + Sync {
    /// A new path finished building; the session should make it a
    /// handshake candidate.
    fn on_path_built(&self, path: Path);

    /// A path died; the session should clear `current_path` if it matches
    /// and request a rebuild.
    fn on_path_died(&self, path_id: PathId);
}
