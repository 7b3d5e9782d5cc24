// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Privilege substrate boundary
//!
//! The decision "may this credential exercise this privilege" belongs to an
//! external policy engine; this layer only defines the boundary and a
//! minimal default implementation.

use crate::cred::Credentials;
use crate::error::{OpsError, OpsResult};

/// Privileges consulted by the operation layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// Resolve and mint raw file handles
    UseFileHandles,
    /// Hard-link objects the caller does not own
    LinkOverride,
    /// Assume an effective uid outside the real/saved pair
    SetEffectiveUid,
    /// Assume an effective gid outside the real/saved pair
    SetEffectiveGid,
    /// Replace the supplementary group set
    SetGroups,
}

/// Privilege policy boundary
#[cfg_attr(test, mockall::automock)]
pub trait PrivilegeChecker: Send + Sync {
    /// Decide whether `cred` may exercise `privilege`. A denial is
    /// authoritative and surfaces to the caller unchanged.
    fn check(&self, cred: &Credentials, privilege: Privilege) -> OpsResult<()>;
}

/// Default policy: the superuser holds every privilege, nobody else holds
/// any.
pub struct SuperuserPolicy;

impl PrivilegeChecker for SuperuserPolicy {
    fn check(&self, cred: &Credentials, _privilege: Privilege) -> OpsResult<()> {
        if cred.euid == 0 {
            Ok(())
        } else {
            Err(OpsError::PermissionDenied)
        }
    }
}
