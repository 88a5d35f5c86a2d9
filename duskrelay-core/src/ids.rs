//! Opaque network identifiers.
//!
//! [`RouterId`] names a router on the network; [`PathId`] names one circuit
//! within a path set. Both are plain byte arrays with no internal structure
//! assumed by this crate — equality, hashing and a zero sentinel are all
//! that the core logic in `duskrelay-router` needs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte opaque router identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouterId([u8; 32]);

impl RouterId {
    pub const ZERO: RouterId = RouterId([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string, as accepted by the RPC `exit`
    /// command's `exit` address field. `None` on malformed input.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterId({})", hex::encode(self.0))
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Default for RouterId {
    fn default() -> Self {
        Self::ZERO
    }
}

/// 16-byte opaque circuit identifier within a path set. Zero means "unset".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathId([u8; 16]);

impl PathId {
    pub const ZERO: PathId = PathId([0u8; 16]);

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Debug for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathId({})", hex::encode(self.0))
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Default for PathId {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_router_id_is_zero() {
        assert!(RouterId::ZERO.is_zero());
        assert!(RouterId::default().is_zero());
    }

    #[test]
    fn nonzero_path_id_is_not_zero() {
        let mut bytes = [0u8; 16];
        bytes[0] = 1;
        let id = PathId::from_bytes(bytes);
        assert!(!id.is_zero());
        assert_eq!(format!("{id:?}"), format!("PathId({})", hex::encode(bytes)));
    }

    #[test]
    fn from_hex_round_trips_and_rejects_garbage() {
        let id = RouterId::from_bytes([9; 32]);
        let parsed = RouterId::from_hex(&id.to_string()).expect("parse");
        assert_eq!(id, parsed);
        assert!(RouterId::from_hex("not hex").is_none());
        assert!(RouterId::from_hex("deadbeef").is_none()); // too short
    }

    #[test]
    fn router_id_round_trips_through_serde() {
        let mut bytes = [0u8; 32];
        bytes[3] = 42;
        let id = RouterId::from_bytes(bytes);
        let json = serde_json::to_string(&id).expect("serialize");
        let back: RouterId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }
}
