// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Integer-status entry points
//!
//! One function per privileged operation, taking the caller's raw argument
//! forms (opaque handle bytes, directory fds, path strings, caller-supplied
//! buffers) and returning 0 or an errno-style code. Argument validation
//! runs before any privileged work; dirfd arguments resolve through the
//! calling thread's descriptor table.

use std::os::fd::RawFd;
use std::path::Path;

use libc::c_int;
use privops_proto::{handle_from_bytes, validate_getfh_flags, GETFH_NOFOLLOW, HANDLE_SIZE};

use crate::cred::CredOps;
use crate::error::OpsError;
use crate::link::HandleOps;
use crate::thread::ThreadContext;
use crate::types::{FileHandle, Gid, Uid};

/// Map an operation error to its errno value.
pub fn errno_for(err: &OpsError) -> c_int {
    match err {
        OpsError::PermissionDenied => libc::EPERM,
        OpsError::NotPermitted => libc::EPERM,
        OpsError::Stale => libc::ESTALE,
        OpsError::AlreadyExists => libc::EEXIST,
        OpsError::CrossDevice => libc::EXDEV,
        OpsError::InvalidArgument => libc::EINVAL,
        OpsError::NotFound => libc::ENOENT,
        OpsError::NotADirectory => libc::ENOTDIR,
        OpsError::BadDescriptor => libc::EBADF,
        OpsError::TooManyLinks => libc::ELOOP,
        OpsError::Busy => libc::EBUSY,
        OpsError::Interrupted => libc::EINTR,
        OpsError::OutOfMemory => libc::ENOMEM,
        OpsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
    }
}

fn decode_handle(bytes: &[u8]) -> Result<FileHandle, c_int> {
    let raw = handle_from_bytes(bytes).map_err(|_| libc::EINVAL)?;
    Ok(FileHandle::from_raw(&raw))
}

/// Hard-link the object named by `handle` at `to`, relative to `tofd`.
pub fn sys_fh_link(
    ops: &HandleOps,
    td: &ThreadContext,
    handle: &[u8],
    tofd: RawFd,
    to: &str,
) -> c_int {
    let fh = match decode_handle(handle) {
        Ok(fh) => fh,
        Err(errno) => return errno,
    };
    let dir = match td.resolve_dirfd(tofd) {
        Ok(dir) => dir,
        Err(err) => return errno_for(&err),
    };
    match ops.fh_link(td, &fh, &dir, Path::new(to)) {
        Ok(()) => 0,
        Err(err) => errno_for(&err),
    }
}

/// Read back the link text of the object named by `handle` into `buf`.
/// The byte count written is reported through `written`.
pub fn sys_fh_readlink(
    ops: &HandleOps,
    td: &ThreadContext,
    handle: &[u8],
    buf: &mut [u8],
    written: &mut usize,
) -> c_int {
    *written = 0;
    let fh = match decode_handle(handle) {
        Ok(fh) => fh,
        Err(errno) => return errno,
    };
    match ops.fh_readlink(td, &fh, buf) {
        Ok(n) => {
            *written = n;
            0
        }
        Err(err) => errno_for(&err),
    }
}

/// Mint the handle for `path` relative to `fd` into `out`.
pub fn sys_get_handle_at(
    ops: &HandleOps,
    td: &ThreadContext,
    fd: RawFd,
    path: &str,
    flags: u32,
    out: &mut [u8],
) -> c_int {
    if validate_getfh_flags(flags).is_err() {
        return libc::EINVAL;
    }
    if out.len() != HANDLE_SIZE {
        return libc::EINVAL;
    }
    let dir = match td.resolve_dirfd(fd) {
        Ok(dir) => dir,
        Err(err) => return errno_for(&err),
    };
    let follow = flags & GETFH_NOFOLLOW == 0;
    match ops.get_handle_at(td, &dir, Path::new(path), follow) {
        Ok(fh) => {
            out.copy_from_slice(fh.to_raw().as_bytes());
            0
        }
        Err(err) => errno_for(&err),
    }
}

/// Override the calling thread's effective uid.
pub fn sys_set_thread_uid(ops: &CredOps, td: &ThreadContext, uid: Uid) -> c_int {
    match ops.set_thread_uid(td, uid) {
        Ok(()) => 0,
        Err(err) => errno_for(&err),
    }
}

/// Override the calling thread's effective gid.
pub fn sys_set_thread_gid(ops: &CredOps, td: &ThreadContext, gid: Gid) -> c_int {
    match ops.set_thread_gid(td, gid) {
        Ok(()) => 0,
        Err(err) => errno_for(&err),
    }
}

/// Replace the calling thread's supplementary group set.
pub fn sys_set_thread_groups(ops: &CredOps, td: &ThreadContext, gidset: &[Gid]) -> c_int {
    match ops.set_thread_groups(td, gidset) {
        Ok(()) => 0,
        Err(err) => errno_for(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpsConfig;
    use crate::security::SuperuserPolicy;
    use crate::types::Tid;
    use crate::vfs::VolumeTable;
    use crate::Credentials;
    use std::sync::Arc;

    struct Fixture {
        ops: HandleOps,
        cred_ops: CredOps,
        volume: Arc<crate::vfs::Volume>,
        td: ThreadContext,
    }

    fn fixture() -> Fixture {
        let volumes = Arc::new(VolumeTable::new());
        let volume = volumes.mount();
        let config = OpsConfig::default();
        let policy = Arc::new(SuperuserPolicy);
        let ops = HandleOps::new(&config, Arc::clone(&volumes), policy.clone());
        let cred_ops = CredOps::new(&config, policy);
        let td = ThreadContext::new(Tid::new(1), Credentials::new(0, 0));
        let root = volume.root();
        td.set_cwd(volume.handle_of(&root));
        Fixture {
            ops,
            cred_ops,
            volume,
            td,
        }
    }

    #[test]
    fn test_sys_fh_link_happy_path() {
        let fx = fixture();
        let root = fx.volume.root();
        let file = fx.volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        let handle = fx.volume.handle_of(&file).to_raw();

        let status =
            sys_fh_link(&fx.ops, &fx.td, handle.as_bytes(), libc::AT_FDCWD, "g");
        assert_eq!(status, 0);
        assert!(fx.volume.lookup(&root, "g".as_ref(), false).is_ok());
    }

    #[test]
    fn test_sys_fh_link_rejects_malformed_handle() {
        let fx = fixture();
        let status = sys_fh_link(&fx.ops, &fx.td, &[0u8; 3], libc::AT_FDCWD, "g");
        assert_eq!(status, libc::EINVAL);
    }

    #[test]
    fn test_sys_fh_link_unknown_dirfd_is_ebadf() {
        let fx = fixture();
        let root = fx.volume.root();
        let file = fx.volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        let handle = fx.volume.handle_of(&file).to_raw();

        let status = sys_fh_link(&fx.ops, &fx.td, handle.as_bytes(), 44, "g");
        assert_eq!(status, libc::EBADF);
    }

    #[test]
    fn test_sys_fh_link_reports_eexist() {
        let fx = fixture();
        let root = fx.volume.root();
        let file = fx.volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        let handle = fx.volume.handle_of(&file).to_raw();

        let status =
            sys_fh_link(&fx.ops, &fx.td, handle.as_bytes(), libc::AT_FDCWD, "f");
        assert_eq!(status, libc::EEXIST);
    }

    #[test]
    fn test_sys_fh_readlink_reports_bytes_written() {
        let fx = fixture();
        let root = fx.volume.root();
        let link = fx.volume.create_symlink(&root, "l", "/t").unwrap();
        let handle = fx.volume.handle_of(&link).to_raw();

        let mut buf = [0u8; 32];
        let mut written = 0usize;
        let status =
            sys_fh_readlink(&fx.ops, &fx.td, handle.as_bytes(), &mut buf, &mut written);
        assert_eq!(status, 0);
        assert_eq!(written, 2);
        assert_eq!(&buf[..2], b"/t");
    }

    #[test]
    fn test_sys_fh_readlink_stale_handle() {
        let fx = fixture();
        let root = fx.volume.root();
        let file = fx.volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        let handle = fx.volume.handle_of(&file).to_raw();
        fx.volume.unlink(&root, "f").unwrap();

        let mut buf = [0u8; 8];
        let mut written = 0usize;
        let status =
            sys_fh_readlink(&fx.ops, &fx.td, handle.as_bytes(), &mut buf, &mut written);
        assert_eq!(status, libc::ESTALE);
        assert_eq!(written, 0);
    }

    #[test]
    fn test_sys_get_handle_at_roundtrip() {
        let fx = fixture();
        let root = fx.volume.root();
        let file = fx.volume.create_file(&root, "f", 0, 0, 0o644).unwrap();

        let mut out = [0u8; HANDLE_SIZE];
        let status = sys_get_handle_at(&fx.ops, &fx.td, libc::AT_FDCWD, "f", 0, &mut out);
        assert_eq!(status, 0);

        let minted = decode_handle(&out).unwrap();
        assert_eq!(minted, fx.volume.handle_of(&file));
    }

    #[test]
    fn test_sys_get_handle_at_rejects_bad_flags_and_buffer() {
        let fx = fixture();
        let mut out = [0u8; HANDLE_SIZE];
        assert_eq!(
            sys_get_handle_at(&fx.ops, &fx.td, libc::AT_FDCWD, "f", 0x4, &mut out),
            libc::EINVAL
        );
        let mut short = [0u8; 4];
        assert_eq!(
            sys_get_handle_at(&fx.ops, &fx.td, libc::AT_FDCWD, "f", 0, &mut short),
            libc::EINVAL
        );
    }

    #[test]
    fn test_sys_cred_ops_status_codes() {
        let fx = fixture();
        assert_eq!(sys_set_thread_uid(&fx.cred_ops, &fx.td, 10), 0);
        assert_eq!(fx.td.credentials().euid, 10);

        // no longer superuser; arbitrary values now denied
        assert_eq!(sys_set_thread_uid(&fx.cred_ops, &fx.td, 20), libc::EPERM);
        // but the real uid is always reachable
        assert_eq!(sys_set_thread_uid(&fx.cred_ops, &fx.td, 0), 0);

        assert_eq!(sys_set_thread_gid(&fx.cred_ops, &fx.td, 5), 0);
        assert_eq!(sys_set_thread_groups(&fx.cred_ops, &fx.td, &[5, 9, 7]), 0);
        assert_eq!(fx.td.credentials().groups(), &[5, 7, 9]);
    }
}
