#![forbid(unsafe_code)]

//! The `PathPool` collaborator contract: the narrow surface
//! the core (`duskrelay-router`) uses to request path builds, send upstream
//! frames, and learn when paths build or die. This crate owns no real
//! onion-circuit construction logic — that lives in whatever generic
//! path-builder framework is wired in as the collaborator; [`TestPathPool`]
//! is an in-memory stand-in used by tests and by the daemon when none is
//! configured.

pub mod contact;
pub mod path;
pub mod pool;
pub mod test_pool;

pub use contact::RouterContact;
pub use path::Path;
pub use pool::{PathEventSink, PathPool};
pub use test_pool::TestPathPool;
