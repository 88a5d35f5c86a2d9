#![forbid(unsafe_code)]

//! The exit session state machine, the packet queues it drives, the host
//! route poker, and the JSON RPC surface that ties them to the outside
//! world (spec.md §1: "these two are THE CORE of this specification").

pub mod error;
pub mod handshake;
pub mod queues;
pub mod route_poker;
pub mod rpc;
pub mod session;

pub use error::{Result, RouterError};
pub use route_poker::RoutePoker;
pub use rpc::DaemonState;
pub use session::{ExitSession, ReadyOutcome, SessionKind, SessionState, SessionStatus};
