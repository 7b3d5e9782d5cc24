// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the privileged operation layer

use std::io;

/// Core operation error type
#[derive(thiserror::Error, Debug)]
pub enum OpsError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("stale file handle")]
    Stale,
    #[error("already exists")]
    AlreadyExists,
    #[error("cross-device link")]
    CrossDevice,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("too many levels of symbolic links")]
    TooManyLinks,
    #[error("busy")]
    Busy,
    #[error("interrupted")]
    Interrupted,
    #[error("out of memory")]
    OutOfMemory,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type OpsResult<T> = Result<T, OpsError>;
