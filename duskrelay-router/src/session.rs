//! `ExitSession`: the lifecycle state machine that builds and maintains a
//! pool of onion paths toward a designated exit router, admits upstream IP
//! packets, orders and releases downstream ones, and enforces the
//! queueing/backpressure/expiry invariants.
//!
//! Grounded on `llarp::exit::BaseSession`. `ExitSession` vs `SNodeSession`
//! in the original are two subclasses differing only in the
//! `PopulateRequest` step, collapsed here into the `SessionKind` tagged
//! variant rather than a class hierarchy.

use crate::handshake::{encode, RoutingFrame};
use crate::queues::{DownstreamPkt, DownstreamQueue, TransferMessage, UpstreamQueue};
use duskrelay_core::time::TimestampMs;
use duskrelay_core::{PathId, RouterId};
use duskrelay_crypto::SecretKey;
use duskrelay_net::IpPacket;
use duskrelay_path::{Path, PathEventSink, PathPool};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A tagged variant replacing the `is_snode_session` / `is_exit_session`
/// boolean pair the original keeps as separate flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionKind {
    Exit,
    SNode { use_router_key: bool },
}

impl SessionKind {
    fn e_bit(self) -> u8 {
        match self {
            SessionKind::Exit => 1,
            SessionKind::SNode { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Init,
    Building,
    Ready,
    Rebuilding,
    Stopping,
    Stopped,
}

/// Outcome delivered to a ready-hook: either the session became ready, or
/// it was torn down (via `stop()` or an auth failure) before that happened.
pub enum ReadyOutcome {
    Ready(SessionStatus),
    Failed,
}

pub type ReadyHook = Box<dyn FnOnce(ReadyOutcome) + Send>;

/// Snapshot returned by `ExitSession::status()` — the supplemented
/// `ExtractStatus()` from `original_source/llarp/exit/session.hpp` (see
/// SPEC_FULL.md §10), consumed by the RPC `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub exit_router: RouterId,
    pub kind: SessionKind,
    pub state: SessionState,
    pub current_path: PathId,
    pub upstream_len: usize,
    pub downstream_len: usize,
    pub drop_count: u64,
    pub estimated_rtt_ms: u64,
    pub last_use_ms: u64,
}

struct Inner {
    state: SessionState,
    upstream: UpstreamQueue,
    downstream: DownstreamQueue,
    current_path: PathId,
    /// Path awaiting a `GotExit` response, if a handshake is in flight.
    handshake_path: Option<PathId>,
    handshake_started_at: Option<TimestampMs>,
    blacklist: HashSet<RouterId>,
    counter: u64,
    last_use: TimestampMs,
    pending_ready_hooks: Vec<ReadyHook>,
    ever_ready: bool,
    drop_count: u64,
    estimated_rtt: Duration,
}

pub struct ExitSession {
    exit_router: RouterId,
    #[allow(dead_code)] // identity is carried for the ObtainExit request's authentication material
    identity: SecretKey,
    write_packet: Box<dyn Fn(&IpPacket) -> bool + Send + Sync>,
    pool: Arc<dyn PathPool>,
    kind: SessionKind,
    bundle_rc: bool,
    life_span: Duration,
    handshake_timeout: Duration,
    stale_after: Duration,
    inner: Mutex<Inner>,
}

impl ExitSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exit_router: RouterId,
        identity: SecretKey,
        write_packet: impl Fn(&IpPacket) -> bool + Send + Sync + 'static,
        pool: Arc<dyn PathPool>,
        kind: SessionKind,
        bundle_rc: bool,
        life_span: Duration,
        handshake_timeout: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            exit_router,
            identity,
            write_packet: Box::new(write_packet),
            pool,
            kind,
            bundle_rc,
            life_span,
            handshake_timeout,
            stale_after,
            inner: Mutex::new(Inner {
                state: SessionState::Init,
                upstream: UpstreamQueue::new(),
                downstream: DownstreamQueue::new(1, stale_after),
                current_path: PathId::ZERO,
                handshake_path: None,
                handshake_started_at: None,
                blacklist: HashSet::new(),
                counter: 0,
                last_use: TimestampMs::now(),
                pending_ready_hooks: Vec::new(),
                ever_ready: false,
                drop_count: 0,
                estimated_rtt: Duration::ZERO,
            }),
        }
    }

    pub fn exit_router(&self) -> RouterId {
        self.exit_router
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// spec.md §4.3.1: admits an upstream IP packet. `proto` both tags the
    /// outbound `TransferMessage` and selects its priority class.
    pub fn queue_upstream(&self, pkt: IpPacket, proto: u8) -> bool {
        let mut inner = self.inner.lock().expect("session lock");
        if matches!(inner.state, SessionState::Stopping | SessionState::Stopped) {
            return false;
        }
        inner.counter += 1;
        let msg = TransferMessage {
            seq: inner.counter,
            payload: pkt.bytes().to_vec(),
            protocol: proto,
            priority: proto,
        };
        inner.upstream.push(msg)
    }

    /// spec.md §4.3.4: drains the upstream tiered queue into the current
    /// path, accumulating an RMS latency estimate across the flushed
    /// messages. Non-blocking: a saturated path's outgoing queue leaves the
    /// message at the head of its class for the next tick.
    pub fn flush_upstream(&self) {
        let mut inner = self.inner.lock().expect("session lock");
        if inner.current_path.is_zero() {
            return;
        }
        let path = match self.pool.get_path_by_router(self.exit_router) {
            Some(p) if p.id == inner.current_path => p,
            _ => return,
        };
        let mut rms = 0f64;
        let mut flushed = 0u64;
        while let Some(msg) = inner.upstream.drain_one() {
            let current_path = inner.current_path;
            if self.pool.send_routing_message(current_path, msg.payload.clone()) {
                let rtt_secs = path.estimated_rtt().as_secs_f64();
                rms += rtt_secs * rtt_secs;
                flushed += 1;
            } else {
                inner.upstream.requeue_front(msg);
                break;
            }
        }
        if flushed > 0 {
            inner.estimated_rtt = Duration::from_secs_f64((rms / flushed as f64).sqrt());
        }
    }

    /// spec.md §4.3.5: push an arriving downstream packet and release
    /// whatever is now ready, in order.
    pub fn handle_traffic(&self, buffer: Vec<u8>, seq: u64, now: TimestampMs) {
        let packet = match IpPacket::new(buffer, now) {
            Some(p) => p,
            None => return,
        };
        {
            let mut inner = self.inner.lock().expect("session lock");
            if inner.state == SessionState::Stopped {
                return;
            }
            if inner.downstream.push(DownstreamPkt { seq, packet }, now) {
                inner.last_use = now;
            }
        }
        self.flush_downstream(now);
    }

    pub fn flush_downstream(&self, now: TimestampMs) {
        let (ready, stopped) = {
            let mut inner = self.inner.lock().expect("session lock");
            let stopped = inner.state == SessionState::Stopped;
            let ready = if stopped {
                Vec::new()
            } else {
                inner.downstream.drain_ready(now)
            };
            (ready, stopped)
        };
        if stopped {
            return;
        }
        for pkt in ready {
            (self.write_packet)(&pkt);
        }
    }

    pub fn handle_traffic_drop(&self, _path_id: PathId, _seq: u64) {
        self.inner.lock().expect("session lock").drop_count += 1;
    }

    /// spec.md §4.3.6: a live path matching `current_path` died.
    fn handle_path_died(&self, path_id: PathId) {
        let mut inner = self.inner.lock().expect("session lock");
        if inner.current_path == path_id {
            inner.current_path = PathId::ZERO;
            if inner.state == SessionState::Ready {
                inner.state = SessionState::Rebuilding;
            }
        }
        if inner.handshake_path == Some(path_id) {
            inner.handshake_path = None;
            inner.handshake_started_at = None;
        }
    }

    pub fn stop(&self) -> bool {
        let already_final = {
            let inner = self.inner.lock().expect("session lock");
            matches!(inner.state, SessionState::Stopping | SessionState::Stopped)
        };
        if already_final {
            return false;
        }

        let current_path = {
            let mut inner = self.inner.lock().expect("session lock");
            inner.state = SessionState::Stopping;
            inner.current_path
        };

        // spec.md §4.3.6: an expiring/stopping session still drains
        // whatever downstream traffic is already queued before going quiet.
        self.flush_downstream(TimestampMs::now());

        let dispatched = if !current_path.is_zero() {
            self.pool
                .send_routing_message(current_path, encode(&RoutingFrame::CloseExit))
        } else {
            false
        };

        let failed_hooks = {
            let mut inner = self.inner.lock().expect("session lock");
            inner.state = SessionState::Stopped;
            std::mem::take(&mut inner.pending_ready_hooks)
        };
        for hook in failed_hooks {
            hook(ReadyOutcome::Failed);
        }
        dispatched
    }

    /// spec.md §4.3.1: ready iff a built path has been handshake-acked.
    pub fn is_ready(&self) -> bool {
        let current_path = self.inner.lock().expect("session lock").current_path;
        if current_path.is_zero() {
            return false;
        }
        self.pool
            .get_path_by_router(self.exit_router)
            .map(|p| p.id)
            == Some(current_path)
    }

    /// spec.md §9, Open Question (a): a session whose first ready-hook has
    /// not yet fired is never considered expired, regardless of age.
    pub fn is_expired(&self, now: TimestampMs) -> bool {
        let inner = self.inner.lock().expect("session lock");
        if !inner.ever_ready {
            return false;
        }
        now.checked_sub(inner.last_use)
            .is_some_and(|age| age > self.life_span)
    }

    /// True once the in-flight handshake (if any) has exceeded
    /// `handshake_timeout` (spec.md §5: "Timeout on handshake defaults to
    /// 5s"). The caller (the daemon's event loop / RPC layer) decides what
    /// to do with this — typically surface `AuthFailed` and call `stop()`.
    pub fn handshake_timed_out(&self, now: TimestampMs) -> bool {
        let inner = self.inner.lock().expect("session lock");
        inner
            .handshake_started_at
            .and_then(|started| now.checked_sub(started))
            .is_some_and(|age| age > self.handshake_timeout)
    }

    pub fn add_ready_hook(&self, hook: ReadyHook) {
        let mut inner = self.inner.lock().expect("session lock");
        if inner.ever_ready {
            drop(inner);
            hook(ReadyOutcome::Ready(self.status()));
        } else {
            inner.pending_ready_hooks.push(hook);
        }
    }

    pub fn blacklist_snode(&self, rid: RouterId) {
        self.inner.lock().expect("session lock").blacklist.insert(rid);
    }

    pub fn should_build_more(&self, now: TimestampMs) -> bool {
        if self.pool.should_build_more(now) {
            return true;
        }
        let current_path = self.inner.lock().expect("session lock").current_path;
        if current_path.is_zero() {
            return false;
        }
        match self.pool.get_path_by_router(self.exit_router) {
            Some(p) if p.id == current_path => {
                let quarter = self.pool.path_lifetime() / 4;
                p.expires_at()
                    .checked_sub(now)
                    .map_or(true, |remaining| remaining <= quarter)
            }
            _ => false,
        }
    }

    /// spec.md §4.3.2: the builder's chosen intermediate hops plus
    /// `exit_router` forced as the terminal hop, with the session's
    /// blacklist already excluded.
    pub async fn hops_for_build(&self) -> Option<Vec<duskrelay_path::RouterContact>> {
        let blacklist = self.inner.lock().expect("session lock").blacklist.clone();
        self.pool.hops_for_build(&blacklist, self.exit_router).await
    }

    /// spec.md §4.3.3: on receipt of `GotExit`. `success=false` blacklists
    /// the exit's hop-chain prefix (not the exit itself) so the next build
    /// picks different intermediates; `success=true` completes the ready
    /// transition and fires every pending ready-hook exactly once, in
    /// registration order.
    pub fn handle_got_exit(&self, path_id: PathId, success: bool, timestamp: TimestampMs) {
        let ready_hooks = {
            let mut inner = self.inner.lock().expect("session lock");
            if inner.handshake_path != Some(path_id) {
                return;
            }
            inner.handshake_path = None;
            inner.handshake_started_at = None;
            if success {
                inner.current_path = path_id;
                inner.state = SessionState::Ready;
                inner.ever_ready = true;
                inner.last_use = timestamp;
                std::mem::take(&mut inner.pending_ready_hooks)
            } else {
                if let Some(path) = self.pool.get_path_by_router(self.exit_router) {
                    for hop in path.hops.iter().rev().skip(1) {
                        inner.blacklist.insert(hop.router);
                    }
                }
                Vec::new()
            }
        };
        let status = self.status();
        for hook in ready_hooks {
            hook(ReadyOutcome::Ready(status.clone()));
        }
    }

    /// spec.md §10 (`ResetInternalState`): clears built state while keeping
    /// `exit_router` and `identity`, for identity rotation without
    /// rebuilding the whole session object.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("session lock");
        inner.state = SessionState::Init;
        inner.upstream = UpstreamQueue::new();
        inner.downstream = DownstreamQueue::new(1, self.stale_after);
        inner.current_path = PathId::ZERO;
        inner.handshake_path = None;
        inner.handshake_started_at = None;
        inner.pending_ready_hooks.clear();
        inner.ever_ready = false;
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.inner.lock().expect("session lock");
        SessionStatus {
            exit_router: self.exit_router,
            kind: self.kind,
            state: inner.state,
            current_path: inner.current_path,
            upstream_len: inner.upstream.len(),
            downstream_len: inner.downstream.len(),
            drop_count: inner.drop_count,
            estimated_rtt_ms: inner.estimated_rtt.as_millis() as u64,
            last_use_ms: inner.last_use.0,
        }
    }
}

impl PathEventSink for ExitSession {
    /// spec.md §4.3.3: a new path is a handshake candidate — send
    /// `ObtainExit` on it and wait for `GotExit`.
    fn on_path_built(&self, path: Path) {
        let now = TimestampMs::now();
        {
            let mut inner = self.inner.lock().expect("session lock");
            if matches!(inner.state, SessionState::Stopping | SessionState::Stopped) {
                return;
            }
            if inner.state == SessionState::Init {
                inner.state = SessionState::Building;
            }
            inner.handshake_path = Some(path.id);
            inner.handshake_started_at = Some(now);
        }
        let frame = RoutingFrame::ObtainExit {
            e: self.kind.e_bit(),
            x: 0,
            bundle_rc: self.bundle_rc,
        };
        self.pool.send_routing_message(path.id, encode(&frame));
    }

    fn on_path_died(&self, path_id: PathId) {
        self.handle_path_died(path_id);
    }
}
