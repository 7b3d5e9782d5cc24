// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Handle-addressed operations
//!
//! Resolution of opaque file handles back to live objects, hard-link
//! creation at a path without re-traversing one for the source, read-back
//! of symbolic-link text, and handle minting. Link creation retries from
//! scratch when the target volume refuses write admission: no lock or busy
//! token is ever held across the wait.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{LinkPolicy, OpsConfig, OpsLimits};
use crate::error::{OpsError, OpsResult};
use crate::security::{Privilege, PrivilegeChecker};
use crate::thread::ThreadContext;
use crate::types::FileHandle;
use crate::vfs::{current_timestamp, Object, ObjectKind, Volume, VolumeTable};
use crate::Credentials;

/// One pass through the link state machine
enum LinkProgress {
    Done,
    /// Admission was refused; wait on this volume and restart
    Contended(Arc<Volume>),
}

/// Handle-addressed operation engine
pub struct HandleOps {
    volumes: Arc<VolumeTable>,
    link: LinkPolicy,
    limits: OpsLimits,
    privileges: Arc<dyn PrivilegeChecker>,
}

impl HandleOps {
    pub fn new(
        config: &OpsConfig,
        volumes: Arc<VolumeTable>,
        privileges: Arc<dyn PrivilegeChecker>,
    ) -> Self {
        Self {
            volumes,
            link: config.link.clone(),
            limits: config.limits.clone(),
            privileges,
        }
    }

    /// Resolve a handle to a live object reference.
    ///
    /// The handle's volume is held busy only for the span of the id lookup;
    /// once the object reference exists it alone keeps the object alive.
    pub fn resolve(&self, fh: &FileHandle) -> OpsResult<Arc<Object>> {
        let (_volume, object) = self.resolve_on_volume(fh)?;
        Ok(object)
    }

    fn resolve_on_volume(&self, fh: &FileHandle) -> OpsResult<(Arc<Volume>, Arc<Object>)> {
        let busy = self.volumes.busy(fh.volume)?;
        let volume = Arc::clone(busy.volume());
        let object = volume.object(fh.object)?;
        Ok((volume, object))
    }

    /// Create a hard link to the object a handle names, at `path` relative
    /// to the directory `dir` names.
    pub fn fh_link(
        &self,
        td: &ThreadContext,
        fh: &FileHandle,
        dir: &FileHandle,
        path: &Path,
    ) -> OpsResult<()> {
        let cred = td.credentials();
        self.privileges.check(&cred, Privilege::UseFileHandles)?;

        loop {
            match self.link_once(&cred, fh, dir, path)? {
                LinkProgress::Done => return Ok(()),
                LinkProgress::Contended(volume) => {
                    debug!(handle = %fh, "target volume refuses writes, waiting to retry");
                    volume.await_writable(td)?;
                }
            }
        }
    }

    fn link_once(
        &self,
        cred: &Credentials,
        fh: &FileHandle,
        dir: &FileHandle,
        path: &Path,
    ) -> OpsResult<LinkProgress> {
        let (volume, object) = self.resolve_on_volume(fh)?;
        // the kind tag is fixed at creation, so no lock is needed here and
        // no recheck after the parent lookup below
        if object.is_dir() {
            return Err(OpsError::NotPermitted);
        }

        let (dir_volume, base) = self.resolve_on_volume(dir)?;
        let (parent, name) = dir_volume.lookup_parent(&base, path)?;

        let mut object_state = object.state.lock().unwrap();
        let mut parent_state = parent.state.lock().unwrap();
        match &parent_state.kind {
            ObjectKind::Directory { children } => {
                if children.contains_key(&name) {
                    return Err(OpsError::AlreadyExists);
                }
            }
            _ => return Err(OpsError::NotADirectory),
        }
        if parent.volume_id() != object.volume_id() {
            // directory entries are volume-local pointers to object ids
            return Err(OpsError::CrossDevice);
        }
        self.can_hardlink(cred, object_state.uid, object_state.gid)?;

        let _ticket = match volume.try_start_write() {
            Some(ticket) => ticket,
            None => {
                drop(parent_state);
                drop(object_state);
                return Ok(LinkProgress::Contended(volume));
            }
        };

        if let ObjectKind::Directory { children } = &mut parent_state.kind {
            children.insert(name, object.id());
        }
        object_state.nlink += 1;
        object_state.times.ctime = current_timestamp();
        parent_state.times.mtime = current_timestamp();

        Ok(LinkProgress::Done)
    }

    /// Ownership/group equivalence gate for raw-handle link creation.
    /// Substitutes for the traversal-time checks a path-based link gets.
    fn can_hardlink(&self, cred: &Credentials, uid: u32, gid: u32) -> OpsResult<()> {
        if !self.link.check_uid && !self.link.check_gid {
            return Ok(());
        }

        if self.link.check_uid && cred.euid != uid {
            if let Err(err) = self.privileges.check(cred, Privilege::LinkOverride) {
                warn!(euid = cred.euid, owner = uid, "handle link refused by uid policy");
                return Err(err);
            }
        }

        if self.link.check_gid && !cred.is_group_member(gid) {
            if let Err(err) = self.privileges.check(cred, Privilege::LinkOverride) {
                warn!(euid = cred.euid, group = gid, "handle link refused by gid policy");
                return Err(err);
            }
        }

        Ok(())
    }

    /// Read back the link text of the object a handle names into `buf`,
    /// returning the number of bytes written. A buffer shorter than the
    /// text truncates silently.
    pub fn fh_readlink(
        &self,
        td: &ThreadContext,
        fh: &FileHandle,
        buf: &mut [u8],
    ) -> OpsResult<usize> {
        let cred = td.credentials();
        self.privileges.check(&cred, Privilege::UseFileHandles)?;
        if buf.len() > self.limits.max_io_size {
            return Err(OpsError::InvalidArgument);
        }

        let object = self.resolve(fh)?;
        let state = object.state.lock().unwrap();
        let text = state.link_text().ok_or(OpsError::InvalidArgument)?;
        let n = text.len().min(buf.len());
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        Ok(n)
    }

    /// Mint the persistent handle for the object at `path` relative to the
    /// directory `dir` names. An empty path names the base directory
    /// itself. A trailing symbolic link is followed iff `follow`.
    pub fn get_handle_at(
        &self,
        td: &ThreadContext,
        dir: &FileHandle,
        path: &Path,
        follow: bool,
    ) -> OpsResult<FileHandle> {
        let cred = td.credentials();
        self.privileges.check(&cred, Privilege::UseFileHandles)?;

        let (volume, base) = self.resolve_on_volume(dir)?;
        let object = if path.as_os_str().is_empty() {
            base
        } else {
            volume.lookup(&base, path, follow)?
        };
        Ok(volume.handle_of(&object))
    }
}
