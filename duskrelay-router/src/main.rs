//! `duskrelayd`: the exit-session/route-poker daemon binary. CLI shape
//! grounded on `nyx-cli`'s `#[derive(Parser)]` pattern; top-level error
//! handling uses `anyhow`, matching `nyx-daemon`'s `main`.

use anyhow::{Context, Result};
use clap::Parser;
use duskrelay_core::DaemonConfig;
use duskrelay_crypto::SecretKey;
use duskrelay_net::{NetworkInterface, VpnPlatform};
use duskrelay_path::{PathPool, TestPathPool};
use duskrelay_router::route_poker::RoutePoker;
use duskrelay_router::rpc::{self, DaemonState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "duskrelay exit-session / route-poker daemon", long_about = None)]
struct Cli {
    /// Path to the daemon's TOML configuration file.
    #[arg(short, long, default_value = "/etc/duskrelay/duskrelay.toml")]
    config: PathBuf,

    /// Override the configured log filter (e.g. "debug", "duskrelay_router=trace,info").
    #[arg(long)]
    log_filter: Option<String>,
}

fn load_or_generate_identity(config: &DaemonConfig) -> Result<SecretKey> {
    let Some(path) = &config.identity_file else {
        info!("no identity_file configured, using an ephemeral random identity");
        return Ok(SecretKey::random());
    };
    match SecretKey::load_from_file(path) {
        Ok(key) => Ok(key),
        Err(_) => {
            info!(%path, "no identity on disk yet, generating one");
            let key = SecretKey::random();
            key.save_to_file(path).context("saving generated identity")?;
            Ok(key)
        }
    }
}

#[cfg(target_os = "linux")]
fn build_platform_and_tunnel(
    config: &DaemonConfig,
) -> Result<(Arc<dyn VpnPlatform>, Arc<dyn NetworkInterface>)> {
    let platform = duskrelay_net::linux::LinuxPlatform::new().context("opening netlink socket")?;
    let addrs = config.tunnel_addr.into_iter().collect();
    let tunnel = duskrelay_net::linux::LinuxTunnel::new(&config.tunnel_ifname, addrs)
        .context("creating tunnel device")?;
    Ok((Arc::new(platform), Arc::new(tunnel)))
}

#[cfg(not(target_os = "linux"))]
fn build_platform_and_tunnel(
    _config: &DaemonConfig,
) -> Result<(Arc<dyn VpnPlatform>, Arc<dyn NetworkInterface>)> {
    anyhow::bail!("duskrelayd has no platform backend for this operating system yet")
}

async fn run_reconciliation_loop(state: Arc<DaemonState>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        ticker.tick().await;
        state.tick().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    duskrelay_core::logging::init(cli.log_filter.as_deref().unwrap_or(&config.log_filter));

    info!(config_path = %cli.config.display(), "starting duskrelayd");

    let identity = load_or_generate_identity(&config)?;
    let (platform, tunnel) = build_platform_and_tunnel(&config)?;

    // spec.md §2: "the generic path-builder framework ... is treated as an
    // EXTERNAL COLLABORATOR". `TestPathPool` stands in as the reference
    // implementation until a real path-builder is wired in.
    let pool: Arc<dyn PathPool> = Arc::new(TestPathPool::new(config.num_paths, Duration::from_secs(600)));

    let poker = Arc::new(RoutePoker::new());
    poker.init(platform.clone(), tunnel.clone(), config.enable_routing).await;

    let rpc_socket = config.rpc_socket.clone();
    let state = Arc::new(DaemonState::new(pool, poker, platform, tunnel, identity, config));

    let reconciliation = tokio::spawn(run_reconciliation_loop(state.clone()));

    let serve_result = rpc::serve(&rpc_socket, state).await;
    reconciliation.abort();
    if let Err(e) = serve_result {
        warn!(error = %e, "rpc listener exited");
        return Err(e).context("rpc listener");
    }
    Ok(())
}
