//! The VPN platform and tunnel interface collaborator traits.
//! Transliterated from `llarp::vpn::Platform` / `llarp::vpn::NetworkInterface`:
//! the core only ever touches these traits, never a concrete backend
//! directly.

use crate::ip_packet::IpPacket;
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// A host route: `addr/netmask` reachable via `gateway`. Generic over the
/// address family so the same shape serves IPv4 and IPv6 routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo<A> {
    pub gateway: A,
    pub addr: A,
    pub netmask: A,
}

pub type RouteInfoV4 = RouteInfo<Ipv4Addr>;
pub type RouteInfoV6 = RouteInfo<Ipv6Addr>;

#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub ifname: String,
    pub dns_addr: Option<Ipv4Addr>,
    pub addrs: Vec<Ipv4Addr>,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform call failed: {0}")]
    Failed(String),
}

/// The tunnel device: read packets coming from the user, write packets
/// destined for the user. Reads happen on a single dedicated task; writes
/// are serialized through `ExitSession`'s event loop.
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    fn info(&self) -> InterfaceInfo;

    async fn read_next_packet(&self) -> Option<IpPacket>;

    fn write_packet(&self, pkt: &IpPacket) -> bool;

    fn has_next_packet(&self) -> bool;
}

/// Host routing table + tunnel-interface-obtaining capability.
#[async_trait]
pub trait VpnPlatform: Send + Sync {
    async fn obtain_interface(&self, info: InterfaceInfo) -> Result<(), PlatformError>;

    async fn add_route(&self, route: RouteInfoV4) -> Result<(), PlatformError>;

    async fn del_route(&self, route: RouteInfoV4) -> Result<(), PlatformError>;

    async fn add_default_route_via(&self, ifname: &str) -> Result<(), PlatformError>;

    async fn del_default_route_via(&self, ifname: &str) -> Result<(), PlatformError>;

    /// Default gateways visible on the host, excluding any route whose
    /// egress interface is `ifname` (so the tunnel never routes itself).
    async fn default_gateways_not_on(&self, ifname: &str) -> Result<Vec<Ipv4Addr>, PlatformError>;
}
