// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the privileged operation layer

use privops_proto::RawFileHandle;
use serde::{Deserialize, Serialize};

/// Numeric user identity
pub type Uid = u32;

/// Numeric group identity
pub type Gid = u32;

/// Identifier of a mounted volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId(pub u64);

/// Volume-local object identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// A persistent, path-independent reference to a filesystem object.
///
/// Handles embed the volume and the volume-local object id. They carry no
/// lifetime tie to the object: resolving a handle whose object (or whole
/// volume) is gone fails with a stale-handle error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle {
    pub volume: VolumeId,
    pub object: ObjectId,
}

impl FileHandle {
    pub fn to_raw(&self) -> RawFileHandle {
        RawFileHandle::pack(self.volume.0, self.object.0)
    }

    pub fn from_raw(raw: &RawFileHandle) -> Self {
        Self {
            volume: VolumeId(raw.volume()),
            object: ObjectId(raw.object()),
        }
    }
}

impl std::fmt::Display for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

/// Thread identifier for type safety in the privileged API.
/// Credential overrides and interruption are scoped to a single thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tid(pub(crate) u32);

impl Tid {
    pub fn new(tid: u32) -> Self {
        Self(tid)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// File timestamps
#[derive(Clone, Copy, Debug)]
pub struct FileTimes {
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

/// Object kind as visible through attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Directory,
    Symlink,
}

/// Object attributes
#[derive(Clone, Debug)]
pub struct Attributes {
    pub kind: ObjectType,
    pub uid: Uid,
    pub gid: Gid,
    pub mode: u32,
    pub nlink: u32,
    pub times: FileTimes,
}
