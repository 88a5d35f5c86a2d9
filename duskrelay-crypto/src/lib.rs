#![forbid(unsafe_code)]

//! Session identity keys. This crate intentionally does not implement any
//! onion-routing cryptography — that lives in an external primitives
//! library the core consumes. It only owns the 64-byte secret key used to
//! identify an `ExitSession` to the exit it is handshaking with.

use rand_core::RngCore;
use std::path::Path;
use thiserror::Error;

pub const SECRET_KEY_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity file has {found} bytes, expected {SECRET_KEY_LEN}")]
    WrongLength { found: usize },
}

/// An opaque session identity key. Never serialized or logged in full.
#[derive(Clone)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    /// Generate a random identity using the system CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Load a raw 64-byte secret key from disk.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let data = std::fs::read(path)?;
        if data.len() != SECRET_KEY_LEN {
            return Err(KeyError::WrongLength { found: data.len() });
        }
        let mut bytes = [0u8; SECRET_KEY_LEN];
        bytes.copy_from_slice(&data);
        Ok(Self(bytes))
    }

    /// Persist the raw key bytes to disk (used by daemons that generate an
    /// identity on first run and want it stable across restarts).
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), KeyError> {
        std::fs::write(path, self.0)?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey").field("bytes", &"<redacted>").finish()
    }
}
