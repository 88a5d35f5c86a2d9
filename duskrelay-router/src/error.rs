//! Error kinds surfaced by the core. Transient kinds are recovered locally
//! and never surface to RPC;
//! `AuthFailed` surfaces through ready-hooks and the `exit` RPC reply;
//! `NotInitialized` is a programming error, fatal at the caller.

use thiserror::Error;

pub type Result<T, E = RouterError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Upstream admission denied: the tiered queue is at its 256-message
    /// cap. Recovered locally; caller drops the packet.
    #[error("upstream queue full")]
    QueueFull,

    /// No alive path for the current exit. Recovered locally; caller
    /// retries after the next build tick.
    #[error("no alive path")]
    NoPath,

    /// Send attempted without a cached session key.
    #[error("no session")]
    NoSession,

    /// Handshake rejected, or the authentication token was not accepted.
    /// Surfaces through ready-hooks and the `exit` RPC reply.
    #[error("authentication failed")]
    AuthFailed,

    /// `RoutePoker` could not find any default gateway. Recovered locally;
    /// `update()` is a no-op, retried on the next tick.
    #[error("network is down")]
    NetworkDown,

    /// A `RoutePoker` operation was called before `init()`. Fatal at the
    /// caller — a programming error, not a runtime condition.
    #[error("route poker used before init()")]
    NotInitialized,

    /// A platform call failed. Logged, state unchanged, retried on the
    /// next reconciliation.
    #[error("platform error: {0}")]
    PlatformError(String),

    /// The `exit` RPC's address parse failed.
    #[error("invalid exit address")]
    InvalidExitAddress,

    /// The `exit` RPC's name lookup failed (no router known by that name).
    #[error("we could not find an exit with that name")]
    ExitNameNotFound,

    /// Path setup toward a resolved exit timed out.
    #[error("could not find exit")]
    ExitUnreachable,
}

impl From<duskrelay_net::platform::PlatformError> for RouterError {
    fn from(e: duskrelay_net::platform::PlatformError) -> Self {
        RouterError::PlatformError(e.to_string())
    }
}
