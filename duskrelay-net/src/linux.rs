//! Linux backend for [`VpnPlatform`] / [`NetworkInterface`], built on
//! `rtnetlink` for route manipulation and the `tun` crate for the tunnel
//! device. Grounded on firezone's `tun_device_manager/linux.rs`
//! (idempotent add/remove via raw netlink error codes) and the WAN-gateway
//! discovery routine found in gnosis-vpn-client's routing module.

use crate::ip_packet::IpPacket;
use crate::platform::{InterfaceInfo, NetworkInterface, PlatformError, RouteInfoV4, VpnPlatform};
use async_trait::async_trait;
use duskrelay_core::time::TimestampMs;
use futures::TryStreamExt;
use netlink_packet_route::link::LinkAttribute;
use netlink_packet_route::route::{RouteAddress, RouteAttribute};
use rtnetlink::{Error::NetlinkError, Handle, RouteMessageBuilder};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tun::AsyncDevice;

pub struct LinuxPlatform {
    handle: Handle,
    _connection: tokio::task::JoinHandle<()>,
}

impl LinuxPlatform {
    pub fn new() -> Result<Self, PlatformError> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| PlatformError::Failed(e.to_string()))?;
        let _connection = tokio::spawn(connection);
        Ok(Self { handle, _connection })
    }

    async fn link_index(&self, ifname: &str) -> Result<u32, PlatformError> {
        self.handle
            .link()
            .get()
            .match_name(ifname.to_string())
            .execute()
            .try_next()
            .await
            .map_err(|e| PlatformError::Failed(e.to_string()))?
            .map(|link| link.header.index)
            .ok_or_else(|| PlatformError::Failed(format!("no such interface: {ifname}")))
    }

    fn host_route(idx: u32, route: RouteInfoV4) -> netlink_packet_route::route::RouteMessage {
        RouteMessageBuilder::<Ipv4Addr>::new()
            .output_interface(idx)
            .destination_prefix(route.addr, 32)
            .gateway(route.gateway)
            .build()
    }

    fn default_route(idx: u32) -> netlink_packet_route::route::RouteMessage {
        RouteMessageBuilder::<Ipv4Addr>::new()
            .output_interface(idx)
            .destination_prefix(Ipv4Addr::UNSPECIFIED, 0)
            .build()
    }
}

#[async_trait]
impl VpnPlatform for LinuxPlatform {
    async fn obtain_interface(&self, _info: InterfaceInfo) -> Result<(), PlatformError> {
        // Interface creation itself is handled by `LinuxTunnel::new`; this
        // hook exists so future backends that need extra setup (DNS, MTU)
        // have a home.
        Ok(())
    }

    async fn add_route(&self, route: RouteInfoV4) -> Result<(), PlatformError> {
        let idx = self.link_index_for_gateway(route).await?;
        let message = Self::host_route(idx, route);
        match self.handle.route().add(message).execute().await {
            Ok(()) => Ok(()),
            Err(NetlinkError(e)) if e.raw_code() == -libc::EEXIST => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, ?route, "failed to add host route");
                Err(PlatformError::Failed(e.to_string()))
            }
        }
    }

    async fn del_route(&self, route: RouteInfoV4) -> Result<(), PlatformError> {
        let idx = self.link_index_for_gateway(route).await?;
        let message = Self::host_route(idx, route);
        match self.handle.route().del(message).execute().await {
            Ok(()) => Ok(()),
            Err(NetlinkError(e)) if e.raw_code() == -libc::ENOENT || e.raw_code() == -libc::ESRCH => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, ?route, "failed to delete host route");
                Err(PlatformError::Failed(e.to_string()))
            }
        }
    }

    async fn add_default_route_via(&self, ifname: &str) -> Result<(), PlatformError> {
        let idx = self.link_index(ifname).await?;
        let message = Self::default_route(idx);
        match self.handle.route().add(message).execute().await {
            Ok(()) => Ok(()),
            Err(NetlinkError(e)) if e.raw_code() == -libc::EEXIST => Ok(()),
            Err(e) => Err(PlatformError::Failed(e.to_string())),
        }
    }

    async fn del_default_route_via(&self, ifname: &str) -> Result<(), PlatformError> {
        let idx = self.link_index(ifname).await?;
        let message = Self::default_route(idx);
        match self.handle.route().del(message).execute().await {
            Ok(()) => Ok(()),
            Err(NetlinkError(e)) if e.raw_code() == -libc::ENOENT || e.raw_code() == -libc::ESRCH => Ok(()),
            Err(e) => Err(PlatformError::Failed(e.to_string())),
        }
    }

    /// The default route is the one with the longest prefix match, i.e. the
    /// smallest `destination_prefix_length`; excludes routes whose egress
    /// interface is `ifname` so the tunnel never becomes its own gateway.
    async fn default_gateways_not_on(&self, ifname: &str) -> Result<Vec<Ipv4Addr>, PlatformError> {
        let exclude_idx = self.link_index(ifname).await.ok();

        let routes = self
            .handle
            .route()
            .get(RouteMessageBuilder::<Ipv4Addr>::default().build())
            .execute()
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| PlatformError::Failed(e.to_string()))?;

        let mut defaults: Vec<_> = routes
            .into_iter()
            .filter(|r| r.header.destination_prefix_length == 0)
            .collect();
        defaults.sort_by_key(|r| r.header.destination_prefix_length);

        let mut gateways = Vec::new();
        for route in defaults {
            let oif = route.attributes.iter().find_map(|a| match a {
                RouteAttribute::Oif(idx) => Some(*idx),
                _ => None,
            });
            if oif.is_none() || oif == exclude_idx {
                continue;
            }
            if let Some(gw) = route.attributes.iter().find_map(|a| match a {
                RouteAttribute::Gateway(RouteAddress::Inet(gw)) => Some(*gw),
                _ => None,
            }) {
                gateways.push(gw);
            }
        }
        Ok(gateways)
    }
}

impl LinuxPlatform {
    /// Host routes aren't tied to a specific outbound interface in the
    /// original; they simply need *a* route via `gateway` that the kernel
    /// can resolve. We resolve the gateway to its containing link so the
    /// netlink message has a concrete `output_interface`.
    async fn link_index_for_gateway(&self, route: RouteInfoV4) -> Result<u32, PlatformError> {
        let links = self
            .handle
            .address()
            .get()
            .execute()
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| PlatformError::Failed(e.to_string()))?;
        for addr in &links {
            if let Some(netlink_packet_route::address::AddressAttribute::Address(
                std::net::IpAddr::V4(ip),
            )) = addr
                .attributes
                .iter()
                .find(|a| matches!(a, netlink_packet_route::address::AddressAttribute::Address(_)))
            {
                if is_same_v4_subnet(*ip, route.gateway) {
                    return Ok(addr.header.index);
                }
            }
        }
        Err(PlatformError::Failed(format!(
            "no local interface found for gateway {}",
            route.gateway
        )))
    }
}

fn is_same_v4_subnet(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    // /24 heuristic: good enough to pick the right egress link for a host
    // route without pulling in a full routing-table longest-prefix match.
    a.octets()[..3] == b.octets()[..3]
}

/// TUN-device-backed [`NetworkInterface`].
///
/// Reads happen directly against the device (single reader task); writes
/// are bridged through an unbounded channel drained by a background task
/// owning the write half, so `write_packet` can stay a synchronous,
/// non-blocking call as the trait requires.
pub struct LinuxTunnel {
    reader: AsyncMutex<tokio::io::ReadHalf<AsyncDevice>>,
    outbound_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    _writer_task: tokio::task::JoinHandle<()>,
    info: InterfaceInfo,
    last_read_empty: Mutex<bool>,
}

impl LinuxTunnel {
    pub fn new(ifname: &str, addrs: Vec<Ipv4Addr>) -> Result<Self, PlatformError> {
        let mut config = tun::Configuration::default();
        config.tun_name(ifname).up();
        if let Some(addr) = addrs.first() {
            config.address(*addr);
        }
        let device = tun::create_as_async(&config).map_err(|e| PlatformError::Failed(e.to_string()))?;
        let (reader, mut writer) = tokio::io::split(device);

        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        let writer_task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            while let Some(bytes) = outbound_rx.recv().await {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::warn!(error = %e, "tunnel write failed");
                }
            }
        });

        Ok(Self {
            reader: AsyncMutex::new(reader),
            outbound_tx,
            _writer_task: writer_task,
            info: InterfaceInfo {
                ifname: ifname.to_string(),
                dns_addr: None,
                addrs,
            },
            last_read_empty: Mutex::new(true),
        })
    }
}

#[async_trait]
impl NetworkInterface for LinuxTunnel {
    fn info(&self) -> InterfaceInfo {
        self.info.clone()
    }

    async fn read_next_packet(&self) -> Option<IpPacket> {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; crate::ip_packet::MAX_SIZE];
        let mut reader = self.reader.lock().await;
        let n = reader.read(&mut buf).await.ok()?;
        *self.last_read_empty.lock().unwrap_or_else(|e| e.into_inner()) = n == 0;
        if n == 0 {
            return None;
        }
        buf.truncate(n);
        IpPacket::new(buf, TimestampMs::now())
    }

    fn write_packet(&self, pkt: &IpPacket) -> bool {
        self.outbound_tx.send(pkt.bytes().to_vec()).is_ok()
    }

    fn has_next_packet(&self) -> bool {
        !*self.last_read_empty.lock().unwrap_or_else(|e| e.into_inner())
    }
}
