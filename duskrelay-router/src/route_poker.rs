//! `RoutePoker` (spec.md §4.4): keeps the host's kernel routing table
//! consistent with the currently active exit across gateway changes and
//! tunnel up/down transitions. Grounded on `llarp::RoutePoker`
//! (`examples/original_source/llarp/router/route_poker.{hpp,cpp}`), ported
//! near-verbatim: the tear-down/enable-under-new-gateway sequencing in
//! `update()`, and the `enabling` two-phase flag that skips tear-down on
//! first activation (spec.md §4.4.4).

use crate::error::{Result, RouterError};
use duskrelay_net::platform::RouteInfoV4;
use duskrelay_net::{NetworkInterface, VpnPlatform};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const HOST_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

fn host_route(ip: Ipv4Addr, gateway: Ipv4Addr) -> RouteInfoV4 {
    RouteInfoV4 {
        gateway,
        addr: ip,
        netmask: HOST_NETMASK,
    }
}

struct State {
    platform: Option<Arc<dyn VpnPlatform>>,
    tunnel: Option<Arc<dyn NetworkInterface>>,
    /// spec.md §3: destination → gateway at the time the route was
    /// installed (or would be, if currently disabled).
    poked: HashMap<Ipv4Addr, Ipv4Addr>,
    current_gateway: Ipv4Addr,
    enabled: bool,
    enabling: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            platform: None,
            tunnel: None,
            poked: HashMap::new(),
            current_gateway: Ipv4Addr::UNSPECIFIED,
            enabled: false,
            enabling: false,
        }
    }
}

/// Single-owner host-routing controller. Guarded by a `tokio::sync::Mutex`
/// so `enable`/`disable`/`update` are serialized end to end (held across
/// the platform's `.await` points) — spec.md §5: "a concurrent update()
/// observes either fully-enabled or fully-disabled state, never a
/// half-reconciled table."
pub struct RoutePoker {
    state: Mutex<State>,
}

impl Default for RoutePoker {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutePoker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// spec.md §4.4.1: binds the platform/tunnel collaborators, sets the
    /// initial `enabled` flag, and clears `current_gateway`.
    pub async fn init(&self, platform: Arc<dyn VpnPlatform>, tunnel: Arc<dyn NetworkInterface>, enable: bool) {
        let mut state = self.state.lock().await;
        state.platform = Some(platform);
        state.tunnel = Some(tunnel);
        state.enabled = enable;
        state.current_gateway = Ipv4Addr::UNSPECIFIED;
    }

    /// spec.md §4.4.1: record a desired `/32` route to `ip`; installs it
    /// immediately if the poker is already enabled/enabling and a gateway
    /// is known.
    pub async fn add_route(&self, ip: Ipv4Addr) -> Result<()> {
        let mut state = self.state.lock().await;
        let platform = state.platform.clone().ok_or(RouterError::NotInitialized)?;
        let gateway = state.current_gateway;
        state.poked.insert(ip, gateway);

        if gateway == Ipv4Addr::UNSPECIFIED {
            debug!(%ip, "add_route: no current gateway, cannot enable route yet");
        } else if state.enabled || state.enabling {
            info!(%ip, %gateway, "add_route: enabling route");
            if let Err(e) = platform.add_route(host_route(ip, gateway)).await {
                warn!(error = %e, %ip, "add_route failed");
            }
        } else {
            debug!(%ip, "add_route: disabled, recording desired route only");
        }
        Ok(())
    }

    /// spec.md §4.4.1: drop `ip` from the desired set and uninstall it if
    /// currently enabled.
    pub async fn del_route(&self, ip: Ipv4Addr) -> Result<()> {
        let mut state = self.state.lock().await;
        let platform = state.platform.clone().ok_or(RouterError::NotInitialized)?;
        let gateway = match state.poked.remove(&ip) {
            Some(gw) => gw,
            None => return Ok(()),
        };
        if state.enabled {
            if let Err(e) = platform.del_route(host_route(ip, gateway)).await {
                warn!(error = %e, %ip, "del_route failed");
            }
        }
        Ok(())
    }

    /// Tears down under the OLD gateway — uses each entry's *stored*
    /// gateway, which may differ from `current_gateway` mid-transition
    /// (spec.md §4.4.3: "critical to actually remove the kernel entry").
    async fn disable_all_routes(&self, state: &mut State) {
        let platform = match &state.platform {
            Some(p) => p.clone(),
            None => return,
        };
        if let Some(tunnel) = &state.tunnel {
            let ifname = tunnel.info().ifname.clone();
            if let Err(e) = platform.del_default_route_via(&ifname).await {
                warn!(error = %e, "del_default_route_via failed");
            }
        }
        for (ip, gateway) in state.poked.clone() {
            if let Err(e) = platform.del_route(host_route(ip, gateway)).await {
                warn!(error = %e, %ip, "disable_all_routes: del_route failed");
            }
        }
    }

    /// Installs under the NEW gateway, rewriting each entry's stored
    /// gateway to `current_gateway` (spec.md §4.4.3).
    async fn enable_all_routes(&self, state: &mut State) -> Result<()> {
        let platform = state.platform.clone().ok_or(RouterError::NotInitialized)?;
        let gateway = state.current_gateway;
        let ips: Vec<Ipv4Addr> = state.poked.keys().copied().collect();
        for ip in ips {
            state.poked.insert(ip, gateway);
            if let Err(e) = platform.add_route(host_route(ip, gateway)).await {
                warn!(error = %e, %ip, "enable_all_routes: add_route failed");
            }
        }
        Ok(())
    }

    /// spec.md §4.4.2/4.4.3: re-discover the default gateway and reconcile
    /// the kernel table to it.
    pub async fn update(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let platform = state.platform.clone().ok_or(RouterError::NotInitialized)?;
        let tunnel = state.tunnel.clone().ok_or(RouterError::NotInitialized)?;
        let info = tunnel.info();

        let gateways = platform
            .default_gateways_not_on(&info.ifname)
            .await
            .map_err(RouterError::from)?;
        // spec.md §3 invariant: current_gateway is never the tunnel's own
        // address, even if the platform's interface-index exclusion missed it.
        let own_addrs: HashSet<Ipv4Addr> = info.addrs.iter().copied().collect();
        let maybe_gw = gateways.into_iter().find(|gw| !own_addrs.contains(gw));

        let gw = match maybe_gw {
            Some(gw) => gw,
            None => {
                warn!("network is down");
                return Err(RouterError::NetworkDown);
            }
        };

        if gw == state.current_gateway && !state.enabling {
            return Ok(());
        }

        // spec.md §4.4.4: `enabling` skips tear-down on first activation —
        // there is nothing yet to tear down.
        if !state.enabling {
            self.disable_all_routes(&mut state).await;
        }
        state.current_gateway = gw;
        self.enable_all_routes(&mut state).await?;

        if let Err(e) = platform.add_default_route_via(&info.ifname).await {
            warn!(error = %e, "add_default_route_via failed");
        }
        info!(gateway = %gw, "route poker: gateway updated");
        Ok(())
    }

    /// spec.md §4.4.4: two-phase enable. `enabling` is set before calling
    /// `update()` so its tear-down branch is skipped, then cleared in
    /// favor of the steady-state `enabled` flag.
    pub async fn enable(&self) {
        {
            let state = self.state.lock().await;
            if state.enabled {
                return;
            }
        }
        {
            let mut state = self.state.lock().await;
            state.enabling = true;
        }
        let _ = self.update().await;
        let mut state = self.state.lock().await;
        state.enabling = false;
        state.enabled = true;
    }

    /// spec.md §4.4.1: uninstall every desired route and the tunnel
    /// default route.
    pub async fn disable(&self) {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return;
        }
        self.disable_all_routes(&mut state).await;
        state.enabled = false;
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    pub async fn current_gateway(&self) -> Option<Ipv4Addr> {
        let gw = self.state.lock().await.current_gateway;
        (gw != Ipv4Addr::UNSPECIFIED).then_some(gw)
    }
}

impl Drop for RoutePoker {
    /// spec.md §3 invariant: "On destruction, every installed kernel route
    /// is removed." `Drop` cannot `.await`, so — matching the original's
    /// synchronous destructor as closely as an async platform allows —
    /// this spawns a best-effort cleanup task onto the ambient runtime
    /// rather than blocking; an explicit `disable()` before dropping is the
    /// reliable path.
    fn drop(&mut self) {
        let Ok(state) = self.state.try_lock() else {
            return;
        };
        let Some(platform) = state.platform.clone() else {
            return;
        };
        let poked: Vec<(Ipv4Addr, Ipv4Addr)> = state.poked.clone().into_iter().collect();
        drop(state);
        if poked.is_empty() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for (ip, gateway) in poked {
                    let _ = platform.del_route(host_route(ip, gateway)).await;
                }
            });
        }
    }
}
