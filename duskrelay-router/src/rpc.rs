//! JSON-over-Unix-socket RPC listener (spec.md §6). Newline-delimited JSON
//! request/response, matching the `{"error": ..}` / `{"result": ..}` shapes
//! of `llarp/rpc/rpc_server.cpp`. Owns no business logic of its own — every
//! handler is a thin translation from a wire command onto [`DaemonState`].

use crate::error::RouterError;
use crate::route_poker::RoutePoker;
use crate::session::{ExitSession, ReadyOutcome, SessionKind};
use duskrelay_core::time::TimestampMs;
use duskrelay_core::{DaemonConfig, RouterId};
use duskrelay_crypto::SecretKey;
use duskrelay_net::{NetworkInterface, VpnPlatform};
use duskrelay_path::PathPool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// `exit {exit?, unmap?, range?, token?, endpoint?}` (spec.md §6). `range`
/// and `token`/`endpoint` are accepted for wire compatibility but, since
/// per-exit CIDR mapping and authentication tokens belong to collaborators
/// this crate does not own (spec.md §1 Non-goals), are only recorded, not
/// interpreted.
#[derive(Debug, Deserialize)]
pub struct ExitRequest {
    pub exit: Option<String>,
    #[serde(default)]
    pub unmap: bool,
    pub range: Option<String>,
    pub token: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Ok { result: String },
    Err { error: String },
    Status(Box<crate::session::SessionStatus>),
    Version { result: VersionInfo },
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

fn ok() -> RpcReply {
    RpcReply::Ok { result: "OK".to_string() }
}

fn err(e: impl ToString) -> RpcReply {
    RpcReply::Err { error: e.to_string() }
}

/// All the state a single RPC request handler needs: the collaborators
/// (`pool`, `poker`, `platform`), the daemon's own identity/config, and the
/// currently mapped exit session, if any (spec.md §6: `exit` maps/unmaps
/// "an exit range to a remote exit" — a single active mapping in this
/// implementation, since per-range multiplexing is an external
/// collaborator's concern, spec.md §1).
pub struct DaemonState {
    pub session: Mutex<Option<Arc<ExitSession>>>,
    pub pool: Arc<dyn PathPool>,
    pub poker: Arc<RoutePoker>,
    pub platform: Arc<dyn VpnPlatform>,
    pub tunnel: Arc<dyn NetworkInterface>,
    pub identity: SecretKey,
    pub known_exits: BTreeMap<String, RouterId>,
    pub config: DaemonConfig,
}

impl DaemonState {
    pub fn new(
        pool: Arc<dyn PathPool>,
        poker: Arc<RoutePoker>,
        platform: Arc<dyn VpnPlatform>,
        tunnel: Arc<dyn NetworkInterface>,
        identity: SecretKey,
        config: DaemonConfig,
    ) -> Self {
        let known_exits = config
            .known_exits
            .iter()
            .filter_map(|(name, hex)| RouterId::from_hex(hex).map(|id| (name.clone(), id)))
            .collect();
        Self {
            session: Mutex::new(None),
            pool,
            poker,
            platform,
            tunnel,
            identity,
            known_exits,
            config,
        }
    }

    /// Resolve the `exit` field per spec.md §7's RPC precondition chain:
    /// hex address first, then the known-exits name table, else
    /// `InvalidExitAddress`. An empty/missing field with a known exit table
    /// of exactly one entry is not special-cased — callers must be explicit.
    fn resolve_exit(&self, addr: &str) -> Result<RouterId, RouterError> {
        if let Some(id) = RouterId::from_hex(addr) {
            return Ok(id);
        }
        self.known_exits
            .get(addr)
            .copied()
            .ok_or(RouterError::ExitNameNotFound)
    }

    /// spec.md §6/§7: map a new exit, waiting (bounded by the handshake
    /// timeout) for the session to become ready before replying.
    pub async fn handle_exit_map(&self, exit_router: RouterId) -> Result<(), RouterError> {
        let new_session = Arc::new(ExitSession::new(
            exit_router,
            self.identity.clone(),
            {
                let tunnel = self.tunnel.clone();
                move |pkt| tunnel.write_packet(pkt)
            },
            self.pool.clone(),
            SessionKind::Exit,
            false,
            self.config.session_lifetime(),
            self.config.handshake_timeout(),
            self.config.downstream_stale_after(),
        ));

        let (tx, rx) = tokio::sync::oneshot::channel();
        new_session.add_ready_hook(Box::new(move |outcome| {
            let _ = tx.send(matches!(outcome, ReadyOutcome::Ready(_)));
        }));

        {
            let mut slot = self.session.lock().await;
            if let Some(old) = slot.take() {
                old.stop();
            }
            *slot = Some(new_session.clone());
        }

        let became_ready = tokio::time::timeout(self.config.handshake_timeout(), rx)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(false);

        if !became_ready {
            new_session.stop();
            let mut slot = self.session.lock().await;
            *slot = None;
            return Err(RouterError::ExitUnreachable);
        }

        self.poker.enable().await;
        Ok(())
    }

    pub async fn handle_exit_unmap(&self) -> Result<(), RouterError> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.stop();
        }
        self.poker.disable().await;
        Ok(())
    }

    pub async fn handle_exit(&self, req: ExitRequest) -> RpcReply {
        if req.unmap {
            return match self.handle_exit_unmap().await {
                Ok(()) => ok(),
                Err(e) => err(e),
            };
        }
        let addr = match req.exit.as_deref() {
            Some(addr) => addr,
            None => return err(RouterError::InvalidExitAddress),
        };
        let exit_router = match self.resolve_exit(addr) {
            Ok(id) => id,
            Err(e) => return err(e),
        };
        match self.handle_exit_map(exit_router).await {
            Ok(()) => ok(),
            Err(e) => err(e),
        }
    }

    pub async fn handle_status(&self) -> RpcReply {
        match self.session.lock().await.as_ref() {
            Some(session) => RpcReply::Status(Box::new(session.status())),
            None => err(RouterError::NoSession),
        }
    }

    pub async fn handle_halt(&self) -> RpcReply {
        self.handle_exit_unmap().await.ok();
        ok()
    }

    /// One tick of the background reconciliation loop: flush queues,
    /// rebuild if the session calls for it, and keep the route poker
    /// pointed at the live default gateway. Grounded on the original's
    /// periodic-timer-driven `RoutePoker::Update` (spec.md §2 control flow).
    pub async fn tick(&self) {
        let now = TimestampMs::now();
        let session = self.session.lock().await.clone();
        if let Some(session) = &session {
            session.flush_upstream();
            if session.handshake_timed_out(now) {
                warn!("handshake timed out, tearing down session");
                session.stop();
            } else if session.is_expired(now) {
                info!("session idle for longer than its lifetime, stopping");
                session.stop();
            }
        }
        if self.poker.is_enabled().await {
            if let Err(e) = self.poker.update().await {
                warn!(error = %e, "route poker update failed");
            }
        }
    }
}

fn decode_request(line: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(line)
}

async fn handle_connection(stream: UnixStream, state: Arc<DaemonState>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) if !l.trim().is_empty() => l,
            Ok(Some(_)) => continue,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "rpc connection read failed");
                return;
            }
        };

        let reply = match decode_request(&line) {
            Ok(value) => dispatch(&state, value).await,
            Err(e) => err(format!("invalid request: {e}")),
        };

        let mut bytes = match serde_json::to_vec(&reply) {
            Ok(b) => b,
            Err(_) => continue,
        };
        bytes.push(b'\n');
        if writer.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

async fn dispatch(state: &Arc<DaemonState>, value: serde_json::Value) -> RpcReply {
    let method = match value.get("method").and_then(|m| m.as_str()) {
        Some(m) => m,
        None => return err("missing \"method\" field"),
    };
    match method {
        "exit" => {
            let params = value.get("params").cloned().unwrap_or(serde_json::json!({}));
            match serde_json::from_value::<ExitRequest>(params) {
                Ok(req) => state.handle_exit(req).await,
                Err(e) => err(format!("invalid exit request: {e}")),
            }
        }
        "status" => state.handle_status().await,
        "halt" => state.handle_halt().await,
        "version" => RpcReply::Version {
            result: VersionInfo {
                name: "duskrelayd",
                version: env!("CARGO_PKG_VERSION"),
            },
        },
        "config" => ok(),
        other => err(format!("unknown method: {other}")),
    }
}

/// Bind `socket_path` and serve RPC connections until the process exits.
/// Removes a stale socket file left behind by an unclean shutdown, mirroring
/// the original daemon's startup behavior.
pub async fn serve(socket_path: &str, state: Arc<DaemonState>) -> std::io::Result<()> {
    if std::path::Path::new(socket_path).exists() {
        let _ = std::fs::remove_file(socket_path);
    }
    let listener = UnixListener::bind(socket_path)?;
    info!(%socket_path, "rpc listener bound");
    loop {
        let (stream, _addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, state).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duskrelay_net::ip_packet::IpPacket;
    use duskrelay_net::platform::{InterfaceInfo, PlatformError, RouteInfoV4};
    use duskrelay_path::TestPathPool;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    struct NullPlatform;
    #[async_trait::async_trait]
    impl VpnPlatform for NullPlatform {
        async fn obtain_interface(&self, _info: InterfaceInfo) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn add_route(&self, _route: RouteInfoV4) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn del_route(&self, _route: RouteInfoV4) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn add_default_route_via(&self, _ifname: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn del_default_route_via(&self, _ifname: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn default_gateways_not_on(&self, _ifname: &str) -> Result<Vec<Ipv4Addr>, PlatformError> {
            Ok(vec![])
        }
    }

    struct NullTunnel;
    #[async_trait::async_trait]
    impl NetworkInterface for NullTunnel {
        fn info(&self) -> InterfaceInfo {
            InterfaceInfo {
                ifname: "dusktun0".to_string(),
                dns_addr: None,
                addrs: vec![],
            }
        }
        async fn read_next_packet(&self) -> Option<IpPacket> {
            None
        }
        fn write_packet(&self, _pkt: &IpPacket) -> bool {
            true
        }
        fn has_next_packet(&self) -> bool {
            false
        }
    }

    fn state_with(known_exits: BTreeMap<String, String>) -> Arc<DaemonState> {
        let pool: Arc<dyn PathPool> = Arc::new(TestPathPool::new(1, Duration::from_secs(600)));
        let poker = Arc::new(RoutePoker::new());
        let mut config = DaemonConfig::default();
        config.known_exits = known_exits;
        config.handshake_timeout_ms = 20;
        Arc::new(DaemonState::new(
            pool,
            poker,
            Arc::new(NullPlatform),
            Arc::new(NullTunnel),
            SecretKey::random(),
            config,
        ))
    }

    #[tokio::test]
    async fn invalid_exit_address_is_rejected_without_touching_the_pool() {
        let state = state_with(BTreeMap::new());
        let reply = state
            .handle_exit(ExitRequest {
                exit: Some("not-hex-and-not-a-known-name".to_string()),
                unmap: false,
                range: None,
                token: None,
                endpoint: None,
            })
            .await;
        assert!(matches!(reply, RpcReply::Err { .. }));
        assert!(state.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn unknown_exit_name_is_rejected() {
        let state = state_with(BTreeMap::new());
        let reply = state
            .handle_exit(ExitRequest {
                exit: Some("my-favorite-exit".to_string()),
                unmap: false,
                range: None,
                token: None,
                endpoint: None,
            })
            .await;
        match reply {
            RpcReply::Err { error } => assert_eq!(error, RouterError::ExitNameNotFound.to_string()),
            _ => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn unreachable_exit_times_out_and_reports_could_not_find_exit() {
        // no path builder will ever build a path toward this exit, so the
        // ready-hook never fires and the handshake timeout (20ms) elapses.
        let state = state_with(BTreeMap::new());
        let hex = RouterId::from_bytes([1; 32]).to_string();
        let reply = state
            .handle_exit(ExitRequest {
                exit: Some(hex),
                unmap: false,
                range: None,
                token: None,
                endpoint: None,
            })
            .await;
        match reply {
            RpcReply::Err { error } => assert_eq!(error, RouterError::ExitUnreachable.to_string()),
            _ => panic!("expected error"),
        }
        assert!(state.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn status_without_a_mapped_session_is_no_session() {
        let state = state_with(BTreeMap::new());
        let reply = state.handle_status().await;
        match reply {
            RpcReply::Err { error } => assert_eq!(error, RouterError::NoSession.to_string()),
            _ => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn halt_with_no_session_is_ok_and_idempotent() {
        let state = state_with(BTreeMap::new());
        assert!(matches!(state.handle_halt().await, RpcReply::Ok { .. }));
        assert!(matches!(state.handle_halt().await, RpcReply::Ok { .. }));
    }

    #[tokio::test]
    async fn known_exit_name_resolves_to_configured_router_id() {
        let id = RouterId::from_bytes([4; 32]);
        let mut names = BTreeMap::new();
        names.insert("friend".to_string(), id.to_string());
        let state = state_with(names);
        assert_eq!(state.resolve_exit("friend"), Ok(id));
    }
}
