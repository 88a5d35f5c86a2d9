#![forbid(unsafe_code)]

//! The narrow platform/tunnel capability set the core consumes: IP packet
//! parsing, host route manipulation, and the tunnel device. Everything in
//! this crate is either a pure data structure (`IpPacket`,
//! `RouteInfo`) or a trait the core holds by `Arc<dyn _>` — the concrete
//! Linux backend is the only platform-specific code, gated behind
//! `cfg(target_os = "linux")`.

pub mod ip_packet;
pub mod platform;

#[cfg(target_os = "linux")]
pub mod linux;

pub use ip_packet::IpPacket;
pub use platform::{InterfaceInfo, NetworkInterface, RouteInfo, VpnPlatform};
