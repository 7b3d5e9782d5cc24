// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Calling-thread context
//!
//! Every privileged call executes on behalf of a thread record: the
//! credential snapshot installed on it, its interruption flag, and its
//! directory-descriptor table for the *at-style operations. Credentials are
//! swapped only through the thread's own cell; no cross-thread credential
//! mutation exists in this layer.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cred::Credentials;
use crate::error::{OpsError, OpsResult};
use crate::types::{FileHandle, Tid};

// Directory file descriptor mapping for *at functions
#[derive(Clone, Debug, Default)]
pub struct DirfdTable {
    /// Base handle for AT_FDCWD resolution
    cwd: Option<FileHandle>,
    /// File descriptor to directory-handle mappings
    fd_handles: HashMap<RawFd, FileHandle>,
}

impl DirfdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle for a directory file descriptor
    pub fn get_handle(&self, dirfd: RawFd) -> Option<FileHandle> {
        self.fd_handles.get(&dirfd).copied()
    }

    /// Set the handle for a directory file descriptor
    pub fn set_handle(&mut self, dirfd: RawFd, handle: FileHandle) {
        self.fd_handles.insert(dirfd, handle);
    }

    /// Remove a directory file descriptor mapping
    pub fn remove_handle(&mut self, dirfd: RawFd) {
        self.fd_handles.remove(&dirfd);
    }

    /// Update the current working directory handle
    pub fn set_cwd(&mut self, cwd: FileHandle) {
        self.cwd = Some(cwd);
    }

    /// Current working directory handle, if one was installed
    pub fn get_cwd(&self) -> Option<FileHandle> {
        self.cwd
    }

    /// Duplicate a file descriptor mapping
    pub fn dup_fd(&mut self, old_fd: RawFd, new_fd: RawFd) {
        if let Some(handle) = self.fd_handles.get(&old_fd).copied() {
            self.fd_handles.insert(new_fd, handle);
        }
    }
}

/// The record of a calling thread
pub struct ThreadContext {
    tid: Tid,
    cred: Mutex<Arc<Credentials>>,
    interrupted: AtomicBool,
    dirfds: Mutex<DirfdTable>,
}

impl ThreadContext {
    pub fn new(tid: Tid, cred: Credentials) -> Self {
        Self {
            tid,
            cred: Mutex::new(Arc::new(cred)),
            interrupted: AtomicBool::new(false),
            dirfds: Mutex::new(DirfdTable::new()),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Snapshot reference to the thread's current credentials.
    pub fn credentials(&self) -> Arc<Credentials> {
        self.cred.lock().unwrap().clone()
    }

    /// Install a new credential snapshot, releasing the reference to the
    /// previous one.
    pub(crate) fn install_credentials(&self, new: Arc<Credentials>) {
        *self.cred.lock().unwrap() = new;
    }

    /// Signal cancellation to a blocked operation on this thread.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    pub(crate) fn check_interrupted(&self) -> OpsResult<()> {
        if self.interrupted.load(Ordering::Acquire) {
            return Err(OpsError::Interrupted);
        }
        Ok(())
    }

    /// Set the base handle used for AT_FDCWD resolution
    pub fn set_cwd(&self, handle: FileHandle) {
        self.dirfds.lock().unwrap().set_cwd(handle);
    }

    /// Register an open directory descriptor
    pub fn insert_dirfd(&self, fd: RawFd, handle: FileHandle) {
        self.dirfds.lock().unwrap().set_handle(fd, handle);
    }

    /// Drop a directory descriptor
    pub fn remove_dirfd(&self, fd: RawFd) {
        self.dirfds.lock().unwrap().remove_handle(fd);
    }

    /// Duplicate a directory descriptor
    pub fn dup_dirfd(&self, old_fd: RawFd, new_fd: RawFd) {
        self.dirfds.lock().unwrap().dup_fd(old_fd, new_fd);
    }

    /// Resolve a caller-supplied directory fd to the handle it names.
    /// AT_FDCWD resolves to the thread's cwd handle.
    pub fn resolve_dirfd(&self, fd: RawFd) -> OpsResult<FileHandle> {
        let dirfds = self.dirfds.lock().unwrap();
        if fd == libc::AT_FDCWD {
            return dirfds.get_cwd().ok_or(OpsError::BadDescriptor);
        }
        dirfds.get_handle(fd).ok_or(OpsError::BadDescriptor)
    }
}
