// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Wire representation of opaque file handles and handle-minting flags

use serde::{Deserialize, Serialize};

/// Size in bytes of the opaque handle as it crosses the boundary.
pub const HANDLE_SIZE: usize = 16;

/// Flag accepted by handle minting: do not follow a trailing symbolic link.
pub const GETFH_NOFOLLOW: u32 = libc::AT_SYMLINK_NOFOLLOW as u32;

/// An opaque, fixed-size file handle as supplied by callers.
///
/// The encoding is the volume identifier followed by the object identifier,
/// both little-endian u64. Callers treat the bytes as opaque; only the
/// privileged layer packs and unpacks them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawFileHandle(pub [u8; HANDLE_SIZE]);

impl RawFileHandle {
    pub fn pack(volume: u64, object: u64) -> Self {
        let mut bytes = [0u8; HANDLE_SIZE];
        bytes[0..8].copy_from_slice(&volume.to_le_bytes());
        bytes[8..16].copy_from_slice(&object.to_le_bytes());
        Self(bytes)
    }

    pub fn volume(&self) -> u64 {
        u64::from_le_bytes(self.0[0..8].try_into().expect("handle layout"))
    }

    pub fn object(&self) -> u64 {
        u64::from_le_bytes(self.0[8..16].try_into().expect("handle layout"))
    }

    pub fn as_bytes(&self) -> &[u8; HANDLE_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for RawFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
