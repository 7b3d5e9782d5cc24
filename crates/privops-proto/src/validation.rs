// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Up-front validation of caller-supplied arguments
//!
//! Everything here runs before any privileged work: a request that fails
//! validation is rejected without resolving handles or touching thread
//! credentials.

use crate::messages::{RawFileHandle, GETFH_NOFOLLOW, HANDLE_SIZE};
use thiserror::Error;

/// Validation error
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("handle must be exactly 16 bytes, got {0}")]
    HandleSize(usize),
    #[error("unsupported flag bits: {0:#x}")]
    Flags(u32),
    #[error("group count {0} exceeds the configured maximum of {1}")]
    GroupCount(usize, usize),
}

/// Decode a caller-supplied handle buffer, insisting on the exact size.
pub fn handle_from_bytes(bytes: &[u8]) -> Result<RawFileHandle, ValidationError> {
    let raw: [u8; HANDLE_SIZE] =
        bytes.try_into().map_err(|_| ValidationError::HandleSize(bytes.len()))?;
    Ok(RawFileHandle(raw))
}

/// Validate the flag word passed to handle minting.
pub fn validate_getfh_flags(flags: u32) -> Result<(), ValidationError> {
    let unknown = flags & !GETFH_NOFOLLOW;
    if unknown != 0 {
        return Err(ValidationError::Flags(unknown));
    }
    Ok(())
}

/// Validate a requested supplementary-group count against the configured
/// maximum. One extra slot is allowed for the effective group at index 0.
pub fn validate_group_count(count: usize, max_groups: usize) -> Result<(), ValidationError> {
    if count > max_groups + 1 {
        return Err(ValidationError::GroupCount(count, max_groups));
    }
    Ok(())
}
