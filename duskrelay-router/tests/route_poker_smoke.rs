//! End-to-end smoke test for `RoutePoker` against a fake `VpnPlatform` /
//! `NetworkInterface` pair, exercising spec.md §8 scenario 3 (gateway
//! change) end to end through the public `init`/`add_route`/`enable`/
//! `update` surface rather than against its internal `State`.

use async_trait::async_trait;
use duskrelay_net::ip_packet::IpPacket;
use duskrelay_net::platform::{InterfaceInfo, PlatformError, RouteInfoV4};
use duskrelay_net::{NetworkInterface, VpnPlatform};
use duskrelay_router::RoutePoker;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Add(Ipv4Addr, Ipv4Addr),
    Del(Ipv4Addr, Ipv4Addr),
    DefaultUp,
    DefaultDown,
}

#[derive(Default)]
struct RecordingPlatform {
    calls: Mutex<Vec<Call>>,
    gateways: Mutex<Vec<Ipv4Addr>>,
}

impl RecordingPlatform {
    fn set_gateways(&self, gws: Vec<Ipv4Addr>) {
        *self.gateways.lock().expect("lock") = gws;
    }
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl VpnPlatform for RecordingPlatform {
    async fn obtain_interface(&self, _info: InterfaceInfo) -> Result<(), PlatformError> {
        Ok(())
    }
    async fn add_route(&self, route: RouteInfoV4) -> Result<(), PlatformError> {
        self.calls.lock().expect("lock").push(Call::Add(route.addr, route.gateway));
        Ok(())
    }
    async fn del_route(&self, route: RouteInfoV4) -> Result<(), PlatformError> {
        self.calls.lock().expect("lock").push(Call::Del(route.addr, route.gateway));
        Ok(())
    }
    async fn add_default_route_via(&self, _ifname: &str) -> Result<(), PlatformError> {
        self.calls.lock().expect("lock").push(Call::DefaultUp);
        Ok(())
    }
    async fn del_default_route_via(&self, _ifname: &str) -> Result<(), PlatformError> {
        self.calls.lock().expect("lock").push(Call::DefaultDown);
        Ok(())
    }
    async fn default_gateways_not_on(&self, _ifname: &str) -> Result<Vec<Ipv4Addr>, PlatformError> {
        Ok(self.gateways.lock().expect("lock").clone())
    }
}

struct StubTunnel;

#[async_trait]
impl NetworkInterface for StubTunnel {
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

#[tokio::test]
async fn gateway_change_removes_old_host_route_before_installing_under_new_gateway() {
    let gw1 = Ipv4Addr::new(192, 168, 1, 1);
    let gw2 = Ipv4Addr::new(192, 168, 1, 254);
    let dest = Ipv4Addr::new(203, 0, 113, 9);

    let platform = Arc::new(RecordingPlatform::default());
    platform.set_gateways(vec![gw1]);

    let poker = RoutePoker::new();
    poker.init(platform.clone(), Arc::new(StubTunnel), false).await;

    poker.add_route(dest).await.expect("add_route before enable just records desired state");
    poker.enable().await;
    assert_eq!(platform.calls(), vec![Call::Add(dest, gw1), Call::DefaultUp]);
    assert_eq!(poker.current_gateway().await, Some(gw1));

    // The host's default gateway changes underneath the tunnel.
    platform.set_gateways(vec![gw2]);
    poker.update().await.expect("update reconciles to the new gateway");

    let calls = platform.calls();
    let del_pos = calls.iter().position(|c| *c == Call::Del(dest, gw1)).expect("old route torn down");
    let add_pos = calls.iter().rposition(|c| *c == Call::Add(dest, gw2)).expect("new route installed");
    assert!(del_pos < add_pos, "must tear down the stale gateway route before installing the new one");
    assert_eq!(poker.current_gateway().await, Some(gw2));

    poker.disable().await;
    let final_calls = platform.calls();
    assert!(final_calls.iter().filter(|c| matches!(c, Call::Del(a, g) if *a == dest && *g == gw2)).count() >= 1);
    assert!(!poker.is_enabled().await);
}
