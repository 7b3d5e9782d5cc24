// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! privops Protocol — wire-level types crossing the privileged boundary
//!
//! This crate defines the artifacts that cross between an unprivileged
//! caller and the privileged operation layer: the fixed-size opaque file
//! handle encoding, the flag bits accepted by handle minting, and the
//! validation routines applied to caller-supplied buffers before any
//! privileged work begins.

pub mod messages;
pub mod validation;

// Re-export key types
pub use messages::{RawFileHandle, GETFH_NOFOLLOW, HANDLE_SIZE};
pub use validation::*;
