//! In-memory [`PathPool`] reference implementation, used by
//! `duskrelay-router`'s tests and by the daemon when no real path-builder
//! framework is wired in. Paths are built and killed by explicit test calls
//! rather than by a real onion-circuit construction process.

use crate::contact::RouterContact;
use crate::path::Path;
use crate::pool::{PathEventSink, PathPool};
use async_trait::async_trait;
use duskrelay_core::{time::TimestampMs, PathId, RouterId};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct State {
    alive: HashMap<PathId, Path>,
    sink: Option<Arc<dyn PathEventSink>>,
    sent: Vec<(PathId, Vec<u8>)>,
    candidate_hops: Vec<RouterContact>,
    saturated: bool,
}

pub struct TestPathPool {
    state: Mutex<State>,
    num_paths: usize,
    lifetime: Duration,
}

impl TestPathPool {
    pub fn new(num_paths: usize, lifetime: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            num_paths,
            lifetime,
        }
    }

    /// Register the session hooks that `simulate_build`/`simulate_death`
    /// fire into. A real path-builder would hold this same handle.
    pub fn register_sink(&self, sink: Arc<dyn PathEventSink>) {
        self.state.lock().expect("lock").sink = Some(sink);
    }

    /// Restrict `hops_for_build`'s intermediate-hop pool to a fixed set, for
    /// deterministic tests.
    pub fn set_candidate_hops(&self, hops: Vec<RouterContact>) {
        self.state.lock().expect("lock").candidate_hops = hops;
    }

    /// Make `send_routing_message` report the path's outgoing queue as
    /// saturated (returns `false`).
    pub fn set_saturated(&self, saturated: bool) {
        self.state.lock().expect("lock").saturated = saturated;
    }

    /// Simulate the builder finishing a path: stores it and fires
    /// `on_path_built` on the registered sink, exactly as a real builder
    /// would when a circuit completes.
    pub fn simulate_build(&self, id: PathId, hops: Vec<RouterContact>, latency: Duration) -> Path {
        let path = Path {
            id,
            hops,
            built_at: TimestampMs::now(),
            lifetime: self.lifetime,
            latency,
            remote_intro_latency: Duration::ZERO,
        };
        let sink = {
            let mut state = self.state.lock().expect("lock");
            state.alive.insert(id, path.clone());
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.on_path_built(path.clone());
        }
        path
    }

    /// Simulate a path dying: removes it from the alive set and fires
    /// `on_path_died`.
    pub fn simulate_death(&self, id: PathId) {
        let sink = {
            let mut state = self.state.lock().expect("lock");
            state.alive.remove(&id);
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.on_path_died(id);
        }
    }

    pub fn sent_messages(&self) -> Vec<(PathId, Vec<u8>)> {
        self.state.lock().expect("lock").sent.clone()
    }

    pub fn alive_count(&self) -> usize {
        self.state.lock().expect("lock").alive.len()
    }

    pub fn random_path_id() -> PathId {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        PathId::from_bytes(bytes)
    }
}

#[async_trait]
impl PathPool for TestPathPool {
    fn should_build_more(&self, _now: TimestampMs) -> bool {
        self.alive_count() < self.num_paths
    }

    async fn hops_for_build(
        &self,
        blacklist: &HashSet<RouterId>,
        exit_router: RouterId,
    ) -> Option<Vec<RouterContact>> {
        if exit_router.is_zero() || blacklist.contains(&exit_router) {
            return None;
        }
        let state = self.state.lock().expect("lock");
        let mut hops: Vec<RouterContact> = state
            .candidate_hops
            .iter()
            .filter(|c| !blacklist.contains(&c.router))
            .copied()
            .collect();
        if hops.is_empty() && !state.candidate_hops.is_empty() {
            // every configured candidate hop is blacklisted; nothing to
            // build with this tick, caller reselects on the next one.
            return None;
        }
        hops.push(RouterContact::new(exit_router));
        Some(hops)
    }

    fn send_routing_message(&self, path_id: PathId, payload: Vec<u8>) -> bool {
        let mut state = self.state.lock().expect("lock");
        if state.saturated || !state.alive.contains_key(&path_id) {
            return false;
        }
        state.sent.push((path_id, payload));
        true
    }

    fn get_path_by_router(&self, router: RouterId) -> Option<Path> {
        self.state
            .lock()
            .expect("lock")
            .alive
            .values()
            .find(|p| p.terminus() == Some(router))
            .cloned()
    }

    fn best_path(&self) -> Option<Path> {
        self.state
            .lock()
            .expect("lock")
            .alive
            .values()
            .min_by_key(|p| p.latency)
            .cloned()
    }

    fn number_of_paths(&self) -> usize {
        self.num_paths
    }

    fn path_lifetime(&self) -> Duration {
        self.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        built: AtomicUsize,
        died: AtomicUsize,
    }

    impl PathEventSink for CountingSink {
        fn on_path_built(&self, _path: Path) {
            self.built.fetch_add(1, Ordering::SeqCst);
        }
        fn on_path_died(&self, _path_id: PathId) {
            self.died.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn hops_for_build_appends_exit_and_respects_blacklist() {
        let pool = TestPathPool::new(2, Duration::from_secs(600));
        let hop_a = RouterContact::new(RouterId::from_bytes([1; 32]));
        let hop_b = RouterContact::new(RouterId::from_bytes([2; 32]));
        pool.set_candidate_hops(vec![hop_a, hop_b]);
        let exit = RouterId::from_bytes([9; 32]);

        let hops = pool
            .hops_for_build(&HashSet::new(), exit)
            .await
            .expect("hops");
        assert_eq!(hops.last().map(|c| c.router), Some(exit));
        assert_eq!(hops.len(), 3);

        let mut blacklist = HashSet::new();
        blacklist.insert(hop_a.router);
        blacklist.insert(hop_b.router);
        assert!(pool.hops_for_build(&blacklist, exit).await.is_none());
    }

    #[tokio::test]
    async fn blacklisted_exit_yields_no_hops() {
        let pool = TestPathPool::new(1, Duration::from_secs(600));
        let exit = RouterId::from_bytes([9; 32]);
        let mut blacklist = HashSet::new();
        blacklist.insert(exit);
        assert!(pool.hops_for_build(&blacklist, exit).await.is_none());
    }

    #[test]
    fn simulate_build_and_death_fire_sink_once_each() {
        let pool = TestPathPool::new(1, Duration::from_secs(600));
        let sink = Arc::new(CountingSink {
            built: AtomicUsize::new(0),
            died: AtomicUsize::new(0),
        });
        pool.register_sink(sink.clone());

        let id = TestPathPool::random_path_id();
        let exit = RouterId::from_bytes([7; 32]);
        pool.simulate_build(id, vec![RouterContact::new(exit)], Duration::from_millis(10));
        assert_eq!(sink.built.load(Ordering::SeqCst), 1);
        assert_eq!(pool.alive_count(), 1);
        assert!(pool.get_path_by_router(exit).is_some());

        pool.simulate_death(id);
        assert_eq!(sink.died.load(Ordering::SeqCst), 1);
        assert_eq!(pool.alive_count(), 0);
    }

    #[test]
    fn send_routing_message_fails_when_saturated_or_unknown_path() {
        let pool = TestPathPool::new(1, Duration::from_secs(600));
        let unknown = TestPathPool::random_path_id();
        assert!(!pool.send_routing_message(unknown, vec![1, 2, 3]));

        let id = TestPathPool::random_path_id();
        pool.simulate_build(id, vec![RouterContact::new(RouterId::from_bytes([1; 32]))], Duration::ZERO);
        assert!(pool.send_routing_message(id, vec![1]));
        pool.set_saturated(true);
        assert!(!pool.send_routing_message(id, vec![2]));
    }
}
