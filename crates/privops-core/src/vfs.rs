// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory object and volume substrate
//!
//! The resolution substrate the engines sit on: a table of mounted volumes,
//! each owning a tree of reference-counted objects. Volumes hand out busy
//! tokens (a volume cannot be unmounted while one is held) and gate write
//! admission (writes can be suspended for maintenance, e.g. while a
//! snapshot of the volume is being taken). Path lookup, including the
//! create-intent variant used by link creation, lives here as well.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{OpsError, OpsResult};
use crate::thread::ThreadContext;
use crate::types::{Attributes, FileHandle, FileTimes, Gid, ObjectId, ObjectType, Uid, VolumeId};

/// Object flag: the object answers read-back of link text even though its
/// kind is not a symbolic link (alias objects installed by the substrate).
pub const OBJ_READLINK: u32 = 0x0000_0001;

/// Ceiling on symbolic-link expansions during a single lookup.
const MAX_SYMLINK_HOPS: usize = 32;

/// Granularity of the interruption check while parked on the write gate.
const WRITE_GATE_POLL: Duration = Duration::from_millis(10);

/// Object types held by a volume
#[derive(Clone, Debug)]
pub(crate) enum ObjectKind {
    File,
    Directory { children: HashMap<String, ObjectId> },
    Symlink { target: String },
}

/// Mutable object state, guarded by the object's exclusive lock
#[derive(Clone, Debug)]
pub(crate) struct ObjectState {
    pub kind: ObjectKind,
    pub uid: Uid,
    pub gid: Gid,
    pub mode: u32,
    pub nlink: u32,
    pub times: FileTimes,
    pub flags: u32,
    /// Link text for `OBJ_READLINK` alias objects
    pub alias_target: Option<String>,
}

impl ObjectState {
    /// The text a read-back should return, if this object has any.
    pub fn link_text(&self) -> Option<&str> {
        match &self.kind {
            ObjectKind::Symlink { target } => Some(target),
            _ if self.flags & OBJ_READLINK != 0 => self.alias_target.as_deref(),
            _ => None,
        }
    }
}

/// A live filesystem object. The `Arc` is the operation-duration reference;
/// the state mutex is the exclusive object lock. The kind tag is fixed at
/// creation and readable without the lock.
#[derive(Debug)]
pub struct Object {
    id: ObjectId,
    volume: VolumeId,
    kind_tag: ObjectType,
    pub(crate) state: Mutex<ObjectState>,
}

impl Object {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn volume_id(&self) -> VolumeId {
        self.volume
    }

    pub fn object_type(&self) -> ObjectType {
        self.kind_tag
    }

    pub fn is_dir(&self) -> bool {
        self.kind_tag == ObjectType::Directory
    }

    pub fn attributes(&self) -> Attributes {
        let state = self.state.lock().unwrap();
        Attributes {
            kind: self.kind_tag,
            uid: state.uid,
            gid: state.gid,
            mode: state.mode,
            nlink: state.nlink,
            times: state.times,
        }
    }
}

#[derive(Debug)]
struct WriteGate {
    suspended: bool,
    active: u32,
}

/// A mounted volume owning a tree of objects
#[derive(Debug)]
pub struct Volume {
    id: VolumeId,
    root: ObjectId,
    objects: Mutex<HashMap<ObjectId, Arc<Object>>>,
    next_object_id: Mutex<u64>,
    busy_holds: AtomicU32,
    write_gate: Mutex<WriteGate>,
    write_cv: Condvar,
}

impl Volume {
    fn new(id: VolumeId) -> Arc<Self> {
        let root_id = ObjectId(1);
        let now = current_timestamp();
        let root = Arc::new(Object {
            id: root_id,
            volume: id,
            kind_tag: ObjectType::Directory,
            state: Mutex::new(ObjectState {
                kind: ObjectKind::Directory {
                    children: HashMap::new(),
                },
                uid: 0,
                gid: 0,
                mode: 0o755,
                nlink: 2,
                times: FileTimes {
                    atime: now,
                    mtime: now,
                    ctime: now,
                    birthtime: now,
                },
                flags: 0,
                alias_target: None,
            }),
        });

        let mut objects = HashMap::new();
        objects.insert(root_id, root);
        Arc::new(Self {
            id,
            root: root_id,
            objects: Mutex::new(objects),
            next_object_id: Mutex::new(2),
            busy_holds: AtomicU32::new(0),
            write_gate: Mutex::new(WriteGate {
                suspended: false,
                active: 0,
            }),
            write_cv: Condvar::new(),
        })
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    /// Root directory object
    pub fn root(&self) -> Arc<Object> {
        self.objects.lock().unwrap().get(&self.root).cloned().expect("volume root")
    }

    /// Resolve a volume-local object id to a live object.
    /// An id that no longer exists on this volume is a stale reference.
    pub fn object(&self, id: ObjectId) -> OpsResult<Arc<Object>> {
        self.objects.lock().unwrap().get(&id).cloned().ok_or(OpsError::Stale)
    }

    /// Produce the persistent handle naming an object on this volume.
    pub fn handle_of(&self, object: &Object) -> FileHandle {
        FileHandle {
            volume: self.id,
            object: object.id(),
        }
    }

    fn allocate_object_id(&self) -> ObjectId {
        let mut next = self.next_object_id.lock().unwrap();
        let id = ObjectId(*next);
        *next += 1;
        id
    }

    fn insert_object(&self, kind: ObjectKind, uid: Uid, gid: Gid, mode: u32) -> Arc<Object> {
        let id = self.allocate_object_id();
        let now = current_timestamp();
        let kind_tag = match kind {
            ObjectKind::File => ObjectType::File,
            ObjectKind::Directory { .. } => ObjectType::Directory,
            ObjectKind::Symlink { .. } => ObjectType::Symlink,
        };
        let object = Arc::new(Object {
            id,
            volume: self.id,
            kind_tag,
            state: Mutex::new(ObjectState {
                kind,
                uid,
                gid,
                mode,
                nlink: 1,
                times: FileTimes {
                    atime: now,
                    mtime: now,
                    ctime: now,
                    birthtime: now,
                },
                flags: 0,
                alias_target: None,
            }),
        });
        self.objects.lock().unwrap().insert(id, object.clone());
        object
    }

    /// Create a regular file under `parent`.
    pub fn create_file(
        &self,
        parent: &Arc<Object>,
        name: &str,
        uid: Uid,
        gid: Gid,
        mode: u32,
    ) -> OpsResult<Arc<Object>> {
        self.create_child(parent, name, ObjectKind::File, uid, gid, mode)
    }

    /// Create a directory under `parent`.
    pub fn create_dir(
        &self,
        parent: &Arc<Object>,
        name: &str,
        uid: Uid,
        gid: Gid,
        mode: u32,
    ) -> OpsResult<Arc<Object>> {
        self.create_child(
            parent,
            name,
            ObjectKind::Directory {
                children: HashMap::new(),
            },
            uid,
            gid,
            mode,
        )
    }

    /// Create a symbolic link under `parent`.
    pub fn create_symlink(
        &self,
        parent: &Arc<Object>,
        name: &str,
        target: &str,
    ) -> OpsResult<Arc<Object>> {
        // Symlinks carry full permissions; ownership follows the parent
        let (uid, gid) = {
            let state = parent.state.lock().unwrap();
            (state.uid, state.gid)
        };
        self.create_child(
            parent,
            name,
            ObjectKind::Symlink {
                target: target.to_string(),
            },
            uid,
            gid,
            0o777,
        )
    }

    fn create_child(
        &self,
        parent: &Arc<Object>,
        name: &str,
        kind: ObjectKind,
        uid: Uid,
        gid: Gid,
        mode: u32,
    ) -> OpsResult<Arc<Object>> {
        if parent.volume_id() != self.id {
            return Err(OpsError::InvalidArgument);
        }
        if name.is_empty() || name.contains('/') {
            return Err(OpsError::InvalidArgument);
        }
        let object = self.insert_object(kind, uid, gid, mode);
        let mut parent_state = parent.state.lock().unwrap();
        match &mut parent_state.kind {
            ObjectKind::Directory { children } => {
                if children.contains_key(name) {
                    drop(parent_state);
                    self.drop_object(object.id());
                    return Err(OpsError::AlreadyExists);
                }
                children.insert(name.to_string(), object.id());
            }
            _ => {
                drop(parent_state);
                self.drop_object(object.id());
                return Err(OpsError::NotADirectory);
            }
        }
        parent_state.times.mtime = current_timestamp();
        Ok(object)
    }

    /// Remove the entry `name` from `parent`, dropping the object when its
    /// last name goes away. Non-empty directories are refused.
    pub fn unlink(&self, parent: &Arc<Object>, name: &str) -> OpsResult<()> {
        let child = {
            let mut parent_state = parent.state.lock().unwrap();
            let children = match &mut parent_state.kind {
                ObjectKind::Directory { children } => children,
                _ => return Err(OpsError::NotADirectory),
            };
            let child_id = *children.get(name).ok_or(OpsError::NotFound)?;
            let child = self.object(child_id)?;
            if child.is_dir() {
                // directory locks nest parent before child only
                let child_state = child.state.lock().unwrap();
                if let ObjectKind::Directory { children } = &child_state.kind {
                    if !children.is_empty() {
                        return Err(OpsError::NotPermitted);
                    }
                }
            }
            children.remove(name);
            parent_state.times.mtime = current_timestamp();
            child
        };

        // The entry is gone; settle the link count without the parent lock
        let last = {
            let mut child_state = child.state.lock().unwrap();
            child_state.nlink = child_state.nlink.saturating_sub(1);
            child_state.times.ctime = current_timestamp();
            child_state.nlink == 0 || child.is_dir()
        };
        if last {
            self.drop_object(child.id());
        }
        Ok(())
    }

    fn drop_object(&self, id: ObjectId) {
        self.objects.lock().unwrap().remove(&id);
    }

    /// Change an object's ownership.
    pub fn set_owner(&self, object: &Arc<Object>, uid: Uid, gid: Gid) {
        let mut state = object.state.lock().unwrap();
        state.uid = uid;
        state.gid = gid;
        state.times.ctime = current_timestamp();
    }

    /// Mark a non-symlink object as link-like, with the text a read-back
    /// should return.
    pub fn set_readlink_alias(&self, object: &Arc<Object>, text: &str) -> OpsResult<()> {
        if object.is_dir() {
            return Err(OpsError::InvalidArgument);
        }
        let mut state = object.state.lock().unwrap();
        state.flags |= OBJ_READLINK;
        state.alias_target = Some(text.to_string());
        Ok(())
    }

    /// Suspend write admission and wait for in-flight writers to drain.
    pub fn suspend_writes(&self) {
        let mut gate = self.write_gate.lock().unwrap();
        gate.suspended = true;
        while gate.active > 0 {
            gate = self.write_cv.wait_timeout(gate, WRITE_GATE_POLL).unwrap().0;
        }
        debug!(volume = self.id.0, "write admission suspended");
    }

    /// Resume write admission, waking any parked writers.
    pub fn resume_writes(&self) {
        let mut gate = self.write_gate.lock().unwrap();
        gate.suspended = false;
        drop(gate);
        self.write_cv.notify_all();
        debug!(volume = self.id.0, "write admission resumed");
    }

    /// Non-blocking write admission probe. `None` means admission is
    /// currently refused; the caller must release all held state before
    /// waiting.
    pub(crate) fn try_start_write(self: &Arc<Self>) -> Option<WriteTicket> {
        let mut gate = self.write_gate.lock().unwrap();
        if gate.suspended {
            return None;
        }
        gate.active += 1;
        Some(WriteTicket {
            volume: Arc::clone(self),
        })
    }

    /// Park until write admission becomes available or the calling thread
    /// is interrupted. Acquires nothing; callers restart from scratch.
    pub(crate) fn await_writable(&self, td: &ThreadContext) -> OpsResult<()> {
        let mut gate = self.write_gate.lock().unwrap();
        loop {
            if !gate.suspended {
                return Ok(());
            }
            gate = self.write_cv.wait_timeout(gate, WRITE_GATE_POLL).unwrap().0;
            td.check_interrupted()?;
        }
    }

    /// Resolve `path` relative to `base`, following symbolic links in
    /// intermediate components and in the final component iff
    /// `follow_final`.
    pub fn lookup(
        self: &Arc<Self>,
        base: &Arc<Object>,
        path: &std::path::Path,
        follow_final: bool,
    ) -> OpsResult<Arc<Object>> {
        let components = path_components(path);
        self.walk(base, components, follow_final)
    }

    /// Resolve the parent directory for a creation at `path` relative to
    /// `base`: every component but the last is walked (links followed), the
    /// final component is returned by name, looked up by the caller under
    /// the parent's lock.
    pub fn lookup_parent(
        self: &Arc<Self>,
        base: &Arc<Object>,
        path: &std::path::Path,
    ) -> OpsResult<(Arc<Object>, String)> {
        let mut components = path_components(path);
        let name = components.pop_back().ok_or(OpsError::InvalidArgument)?;
        let parent = self.walk(base, components, true)?;
        if !parent.is_dir() {
            return Err(OpsError::NotADirectory);
        }
        Ok((parent, name))
    }

    fn walk(
        self: &Arc<Self>,
        base: &Arc<Object>,
        mut queue: VecDeque<String>,
        follow_final: bool,
    ) -> OpsResult<Arc<Object>> {
        if base.volume_id() != self.id {
            return Err(OpsError::InvalidArgument);
        }
        let mut current = Arc::clone(base);
        let mut hops = 0usize;

        while let Some(name) = queue.pop_front() {
            let next_id = {
                let state = current.state.lock().unwrap();
                match &state.kind {
                    ObjectKind::Directory { children } => {
                        children.get(&name).copied().ok_or(OpsError::NotFound)?
                    }
                    _ => return Err(OpsError::NotADirectory),
                }
            };
            let next = self
                .objects
                .lock()
                .unwrap()
                .get(&next_id)
                .cloned()
                .ok_or(OpsError::NotFound)?;

            let link_target = {
                let state = next.state.lock().unwrap();
                match &state.kind {
                    ObjectKind::Symlink { target } if !queue.is_empty() || follow_final => {
                        Some(target.clone())
                    }
                    _ => None,
                }
            };

            if let Some(target) = link_target {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(OpsError::TooManyLinks);
                }
                for component in path_components(std::path::Path::new(&target)).into_iter().rev() {
                    queue.push_front(component);
                }
                if target.starts_with('/') {
                    current = self.root();
                }
                continue;
            }

            current = next;
        }

        Ok(current)
    }
}

/// RAII write-admission ticket; dropping it finishes the write.
pub(crate) struct WriteTicket {
    volume: Arc<Volume>,
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        let mut gate = self.volume.write_gate.lock().unwrap();
        gate.active -= 1;
        drop(gate);
        self.volume.write_cv.notify_all();
    }
}

/// RAII busy hold; the volume cannot be unmounted while one is alive.
#[derive(Debug)]
pub struct BusyGuard {
    volume: Arc<Volume>,
}

impl BusyGuard {
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.volume.busy_holds.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Table of mounted volumes
pub struct VolumeTable {
    volumes: Mutex<HashMap<VolumeId, Arc<Volume>>>,
    next_volume_id: Mutex<u64>,
}

impl VolumeTable {
    pub fn new() -> Self {
        Self {
            volumes: Mutex::new(HashMap::new()),
            next_volume_id: Mutex::new(1),
        }
    }

    /// Mount a fresh volume and return it.
    pub fn mount(&self) -> Arc<Volume> {
        let id = {
            let mut next = self.next_volume_id.lock().unwrap();
            let id = VolumeId(*next);
            *next += 1;
            id
        };
        let volume = Volume::new(id);
        self.volumes.lock().unwrap().insert(id, volume.clone());
        volume
    }

    /// Unmount a volume. Refused while any busy hold is outstanding.
    pub fn unmount(&self, id: VolumeId) -> OpsResult<()> {
        let mut volumes = self.volumes.lock().unwrap();
        let volume = volumes.get(&id).ok_or(OpsError::NotFound)?;
        if volume.busy_holds.load(Ordering::Acquire) > 0 {
            return Err(OpsError::Busy);
        }
        volumes.remove(&id);
        Ok(())
    }

    /// Mark the volume a handle names as busy. Fails with a stale-handle
    /// error when the volume is no longer mounted.
    pub fn busy(&self, id: VolumeId) -> OpsResult<BusyGuard> {
        let volumes = self.volumes.lock().unwrap();
        let volume = volumes.get(&id).cloned().ok_or(OpsError::Stale)?;
        volume.busy_holds.fetch_add(1, Ordering::AcqRel);
        Ok(BusyGuard { volume })
    }
}

impl Default for VolumeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn path_components(path: &std::path::Path) -> VecDeque<String> {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => s.to_str().map(|s| s.to_string()),
            _ => None,
        })
        .collect()
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadContext;
    use crate::types::Tid;
    use crate::Credentials;

    fn test_table() -> (VolumeTable, Arc<Volume>) {
        let table = VolumeTable::new();
        let volume = table.mount();
        (table, volume)
    }

    #[test]
    fn test_lookup_walks_directories() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let dir = volume.create_dir(&root, "a", 0, 0, 0o755).unwrap();
        let file = volume.create_file(&dir, "b", 0, 0, 0o644).unwrap();

        let found = volume.lookup(&root, "a/b".as_ref(), true).unwrap();
        assert_eq!(found.id(), file.id());
    }

    #[test]
    fn test_lookup_missing_component_is_not_found() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let err = volume.lookup(&root, "nope".as_ref(), true).unwrap_err();
        assert!(matches!(err, OpsError::NotFound));
    }

    #[test]
    fn test_lookup_through_file_is_not_a_directory() {
        let (_table, volume) = test_table();
        let root = volume.root();
        volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        let err = volume.lookup(&root, "f/x".as_ref(), true).unwrap_err();
        assert!(matches!(err, OpsError::NotADirectory));
    }

    #[test]
    fn test_lookup_follows_intermediate_symlink() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let dir = volume.create_dir(&root, "real", 0, 0, 0o755).unwrap();
        let file = volume.create_file(&dir, "inner", 0, 0, 0o644).unwrap();
        volume.create_symlink(&root, "alias", "/real").unwrap();

        let found = volume.lookup(&root, "alias/inner".as_ref(), false).unwrap();
        assert_eq!(found.id(), file.id());
    }

    #[test]
    fn test_lookup_final_symlink_honors_follow_flag() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let file = volume.create_file(&root, "target", 0, 0, 0o644).unwrap();
        let link = volume.create_symlink(&root, "l", "target").unwrap();

        let no_follow = volume.lookup(&root, "l".as_ref(), false).unwrap();
        assert_eq!(no_follow.id(), link.id());

        let followed = volume.lookup(&root, "l".as_ref(), true).unwrap();
        assert_eq!(followed.id(), file.id());
    }

    #[test]
    fn test_lookup_symlink_cycle_errors() {
        let (_table, volume) = test_table();
        let root = volume.root();
        volume.create_symlink(&root, "x", "y").unwrap();
        volume.create_symlink(&root, "y", "x").unwrap();
        let err = volume.lookup(&root, "x".as_ref(), true).unwrap_err();
        assert!(matches!(err, OpsError::TooManyLinks));
    }

    #[test]
    fn test_lookup_parent_returns_final_name() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let dir = volume.create_dir(&root, "d", 0, 0, 0o755).unwrap();
        let (parent, name) = volume.lookup_parent(&root, "d/newfile".as_ref()).unwrap();
        assert_eq!(parent.id(), dir.id());
        assert_eq!(name, "newfile");
    }

    #[test]
    fn test_lookup_parent_of_empty_path_is_invalid() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let err = volume.lookup_parent(&root, "".as_ref()).unwrap_err();
        assert!(matches!(err, OpsError::InvalidArgument));
    }

    #[test]
    fn test_unlinked_object_id_goes_stale() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let file = volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        let id = file.id();

        volume.unlink(&root, "f").unwrap();
        let err = volume.object(id).unwrap_err();
        assert!(matches!(err, OpsError::Stale));
    }

    #[test]
    fn test_unlink_keeps_object_with_remaining_names() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let file = volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        {
            let mut state = file.state.lock().unwrap();
            state.nlink += 1;
        }
        {
            let mut root_state = root.state.lock().unwrap();
            if let ObjectKind::Directory { children } = &mut root_state.kind {
                children.insert("g".to_string(), file.id());
            }
        }

        volume.unlink(&root, "f").unwrap();
        assert!(volume.object(file.id()).is_ok());
        assert_eq!(file.attributes().nlink, 1);
    }

    #[test]
    fn test_unlink_refuses_populated_directory() {
        let (_table, volume) = test_table();
        let root = volume.root();
        let dir = volume.create_dir(&root, "d", 0, 0, 0o755).unwrap();
        volume.create_file(&dir, "f", 0, 0, 0o644).unwrap();

        let err = volume.unlink(&root, "d").unwrap_err();
        assert!(matches!(err, OpsError::NotPermitted));
    }

    #[test]
    fn test_create_duplicate_name_already_exists() {
        let (_table, volume) = test_table();
        let root = volume.root();
        volume.create_file(&root, "f", 0, 0, 0o644).unwrap();
        let err = volume.create_file(&root, "f", 0, 0, 0o644).unwrap_err();
        assert!(matches!(err, OpsError::AlreadyExists));
    }

    #[test]
    fn test_unmount_refused_while_busy() {
        let (table, volume) = test_table();
        let guard = table.busy(volume.id()).unwrap();
        let err = table.unmount(volume.id()).unwrap_err();
        assert!(matches!(err, OpsError::Busy));

        drop(guard);
        table.unmount(volume.id()).unwrap();
        let err = table.busy(volume.id()).unwrap_err();
        assert!(matches!(err, OpsError::Stale));
    }

    #[test]
    fn test_write_gate_refuses_while_suspended() {
        let (_table, volume) = test_table();
        assert!(volume.try_start_write().is_some());

        volume.suspend_writes();
        assert!(volume.try_start_write().is_none());

        volume.resume_writes();
        assert!(volume.try_start_write().is_some());
    }

    #[test]
    fn test_await_writable_interrupts() {
        let (_table, volume) = test_table();
        volume.suspend_writes();

        let td = ThreadContext::new(Tid::new(1), Credentials::new(0, 0));
        td.interrupt();
        let err = volume.await_writable(&td).unwrap_err();
        assert!(matches!(err, OpsError::Interrupted));
    }
}
