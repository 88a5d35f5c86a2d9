//! A single hop offered by the path-builder collaborator. Deliberately
//! thin: the wire format used to actually reach a router is out of scope
//! here; the core only ever needs the router's identity to enforce the
//! blacklist and to mandate the exit as the terminal hop.

use duskrelay_core::RouterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterContact {
    pub router: RouterId,
}

impl RouterContact {
    pub fn new(router: RouterId) -> Self {
        Self { router }
    }
}

impl From<RouterId> for RouterContact {
    fn from(router: RouterId) -> Self {
        Self::new(router)
    }
}
