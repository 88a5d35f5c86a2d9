//! Daemon configuration. Parsed from a TOML file into a strongly-typed
//! structure; kept deliberately small since most knobs belong to the
//! platform/path-builder collaborators this crate does not own.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Network identity of the remote exit router to build paths toward.
    pub exit_router: Option<String>,
    /// Path to a 64-byte raw secret key file; random identity if unset.
    pub identity_file: Option<String>,
    /// Number of paths the path pool should try to keep alive.
    pub num_paths: usize,
    /// Name to give the tunnel interface.
    pub tunnel_ifname: String,
    /// Address to assign the tunnel interface, if any.
    pub tunnel_addr: Option<Ipv4Addr>,
    /// Unix socket path for the JSON RPC listener.
    pub rpc_socket: String,
    /// Whether the route poker starts enabled.
    pub enable_routing: bool,
    /// Log filter, passed to `tracing_subscriber::EnvFilter`.
    pub log_filter: String,
    /// Handshake timeout, in milliseconds. Defaults to 5s.
    pub handshake_timeout_ms: u64,
    /// Session idle lifetime, in milliseconds, before `is_expired` is true.
    pub session_lifetime_ms: u64,
    /// Downstream gap-stall bound, in milliseconds.
    pub downstream_stale_after_ms: u64,
    /// Friendly name → hex `RouterId`, a stand-in for the NodeDB/router
    /// registry the RPC `exit` command's name-lookup precondition consults;
    /// the on-disk router cache itself is an external collaborator this
    /// crate does not own.
    pub known_exits: BTreeMap<String, String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            exit_router: None,
            identity_file: None,
            num_paths: 4,
            tunnel_ifname: "dusktun0".to_string(),
            tunnel_addr: None,
            rpc_socket: "/var/run/duskrelay.sock".to_string(),
            enable_routing: false,
            log_filter: "info".to_string(),
            handshake_timeout_ms: 5_000,
            session_lifetime_ms: 600_000,
            downstream_stale_after_ms: 30_000,
            known_exits: BTreeMap::new(),
        }
    }
}

impl DaemonConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_millis(self.session_lifetime_ms)
    }

    pub fn downstream_stale_after(&self) -> Duration {
        Duration::from_millis(self.downstream_stale_after_ms)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: DaemonConfig = toml::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.num_paths == 0 {
            return Err(Error::config("num_paths must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("duskrelay.toml");
        std::fs::write(&path, "exit_router = \"deadbeef\"\nnum_paths = 2\n").expect("write");
        let cfg = DaemonConfig::load(&path).expect("load");
        assert_eq!(cfg.exit_router.as_deref(), Some("deadbeef"));
        assert_eq!(cfg.num_paths, 2);
        assert_eq!(cfg.tunnel_ifname, "dusktun0");
    }

    #[test]
    fn rejects_zero_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("duskrelay.toml");
        std::fs::write(&path, "num_paths = 0\n").expect("write");
        assert!(DaemonConfig::load(&path).is_err());
    }
}
