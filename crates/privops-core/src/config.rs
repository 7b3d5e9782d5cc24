// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for the privileged operation layer
//!
//! All policy toggles are fixed at construction; the engines read them per
//! call but never consult ambient global state.

use serde::{Deserialize, Serialize};

/// Default ceiling for a single read-back transfer.
pub const DEFAULT_MAX_IO_SIZE: usize = i32::MAX as usize;

/// Default ceiling for supplementary-group list length (excluding the
/// effective group at index 0).
pub const DEFAULT_MAX_GROUPS: usize = 1023;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct OpsConfig {
    /// Ownership policy applied when linking through a raw handle
    #[serde(default)]
    pub link: LinkPolicy,

    /// Resource ceilings
    #[serde(default)]
    pub limits: OpsLimits,
}

/// Ownership/group policy gate for handle-addressed link creation.
///
/// Raw-handle linking bypasses the permission checks a path-based link
/// operation performs during traversal, so an explicit ownership
/// equivalence check is substituted when these toggles are set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LinkPolicy {
    /// Require the caller's effective uid to match the object owner
    #[serde(default)]
    pub check_uid: bool,

    /// Require the caller to be a member of the object's group
    #[serde(default)]
    pub check_gid: bool,
}

/// Resource ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpsLimits {
    /// Largest buffer accepted by a single read-back
    pub max_io_size: usize,

    /// Largest supplementary-group list accepted, not counting index 0
    pub max_groups: usize,
}

impl Default for OpsLimits {
    fn default() -> Self {
        Self {
            max_io_size: DEFAULT_MAX_IO_SIZE,
            max_groups: DEFAULT_MAX_GROUPS,
        }
    }
}
