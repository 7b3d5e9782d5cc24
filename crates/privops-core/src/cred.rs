// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Thread-scoped credential overrides
//!
//! Credentials are immutable once installed on a thread and shared by
//! reference. Every mutation clones the snapshot, edits the clone, and
//! atomically swaps the thread's pointer; a failed call discards the clone
//! and leaves the installed snapshot untouched.

use std::sync::Arc;

use tracing::debug;

use crate::config::{OpsConfig, OpsLimits};
use crate::error::{OpsError, OpsResult};
use crate::security::{Privilege, PrivilegeChecker};
use crate::thread::ThreadContext;
use crate::types::{Gid, Uid};

/// A credential snapshot: user identity, group identity, and the
/// supplementary group set.
///
/// `groups[0]` is the effective gid. It keeps its position across every
/// mutation; `groups[1..]` is held sorted ascending so membership tests can
/// binary-search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub euid: Uid,
    pub ruid: Uid,
    pub suid: Uid,
    pub rgid: Gid,
    pub sgid: Gid,
    groups: Vec<Gid>,
}

impl Credentials {
    /// Fresh credential with all three uids and gids set from one identity.
    pub fn new(uid: Uid, gid: Gid) -> Self {
        Self {
            euid: uid,
            ruid: uid,
            suid: uid,
            rgid: gid,
            sgid: gid,
            groups: vec![gid],
        }
    }

    /// Builder-style supplementary group installation for setup code.
    pub fn with_supplementary(mut self, groups: &[Gid]) -> Self {
        let egid = self.egid();
        let mut full = Vec::with_capacity(groups.len() + 1);
        full.push(egid);
        full.extend_from_slice(groups);
        self.install_groups(&full);
        self
    }

    /// Effective gid, stored at index 0 of the group set.
    pub fn egid(&self) -> Gid {
        self.groups[0]
    }

    pub fn groups(&self) -> &[Gid] {
        &self.groups
    }

    /// Membership test: the effective group at index 0 is checked directly,
    /// the sorted remainder by binary search.
    pub fn is_group_member(&self, gid: Gid) -> bool {
        if self.groups[0] == gid {
            return true;
        }
        self.groups[1..].binary_search(&gid).is_ok()
    }

    /// Clone with the group vector grown to hold `ngroups` entries.
    fn clone_with_group_capacity(&self, ngroups: usize) -> OpsResult<Self> {
        let mut cred = self.clone();
        if ngroups > cred.groups.len() {
            cred.groups
                .try_reserve(ngroups - cred.groups.len())
                .map_err(|_| OpsError::OutOfMemory)?;
        }
        Ok(cred)
    }

    fn set_effective_gid(&mut self, gid: Gid) {
        self.groups[0] = gid;
    }

    /// Drop every supplementary group, leaving exactly the effective group.
    fn reset_groups_to_effective(&mut self) {
        self.groups.truncate(1);
    }

    /// Install a group set verbatim: index 0 stays where the caller put it,
    /// indices 1..N are insertion-sorted ascending so membership tests can
    /// binary-search. Fine for the small group counts expected here;
    /// oversized sets are rejected before this point.
    fn install_groups(&mut self, groups: &[Gid]) {
        self.groups.clear();
        self.groups.extend_from_slice(groups);
        for i in 2..self.groups.len() {
            let g = self.groups[i];
            let mut j = i;
            while j > 1 && g < self.groups[j - 1] {
                self.groups[j] = self.groups[j - 1];
                j -= 1;
            }
            self.groups[j] = g;
        }
    }
}

/// Thread credential mutation entry points
pub struct CredOps {
    limits: OpsLimits,
    privileges: Arc<dyn PrivilegeChecker>,
}

impl CredOps {
    pub fn new(config: &OpsConfig, privileges: Arc<dyn PrivilegeChecker>) -> Self {
        Self {
            limits: config.limits.clone(),
            privileges,
        }
    }

    /// Override the calling thread's effective uid.
    ///
    /// Moving to the real or saved uid needs no privilege; any other value
    /// does.
    pub fn set_thread_uid(&self, td: &ThreadContext, uid: Uid) -> OpsResult<()> {
        let oldcred = td.credentials();
        let mut newcred = (*oldcred).clone();

        if uid != oldcred.ruid && uid != oldcred.suid {
            self.privileges.check(&oldcred, Privilege::SetEffectiveUid)?;
        }

        if oldcred.euid != uid {
            newcred.euid = uid;
        }
        td.install_credentials(Arc::new(newcred));
        debug!(tid = td.tid().as_u32(), uid, "thread effective uid installed");
        Ok(())
    }

    /// Override the calling thread's effective gid.
    pub fn set_thread_gid(&self, td: &ThreadContext, gid: Gid) -> OpsResult<()> {
        let oldcred = td.credentials();
        let mut newcred = (*oldcred).clone();

        if gid != oldcred.rgid && gid != oldcred.sgid {
            self.privileges.check(&oldcred, Privilege::SetEffectiveGid)?;
        }

        if oldcred.egid() != gid {
            newcred.set_effective_gid(gid);
        }
        td.install_credentials(Arc::new(newcred));
        debug!(tid = td.tid().as_u32(), gid, "thread effective gid installed");
        Ok(())
    }

    /// Replace the calling thread's supplementary group set.
    ///
    /// An empty request resets the set to exactly the effective group:
    /// callers from systems that do not keep the effective gid at index 0
    /// clear the vector this way and still expect an effective group to
    /// remain.
    pub fn set_thread_groups(&self, td: &ThreadContext, groups: &[Gid]) -> OpsResult<()> {
        if groups.len() > self.limits.max_groups + 1 {
            return Err(OpsError::InvalidArgument);
        }

        let oldcred = td.credentials();
        let mut newcred = oldcred.clone_with_group_capacity(groups.len())?;

        self.privileges.check(&oldcred, Privilege::SetGroups)?;

        if groups.is_empty() {
            newcred.reset_groups_to_effective();
        } else {
            newcred.install_groups(groups);
        }
        td.install_credentials(Arc::new(newcred));
        debug!(
            tid = td.tid().as_u32(),
            ngroups = groups.len(),
            "thread group set installed"
        );
        Ok(())
    }
}
