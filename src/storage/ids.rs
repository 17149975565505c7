use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::{StorageError, StoreError};
use super::models::EntityKind;

/// Durable per-type id counters.
///
/// Each entity type has one counter file (`<collection>.seq`) holding the last
/// issued id, and one lock. Repositories hold the same lock for their whole
/// load-modify-write sequence, so counter and collection advance together.
pub struct IdAllocator {
    dir: PathBuf,
    locks: [Mutex<()>; EntityKind::COUNT],
}

impl IdAllocator {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: std::array::from_fn(|_| Mutex::new(())),
        })
    }

    /// Acquire the exclusive lock for one entity type.
    ///
    /// A poisoned lock is recovered: every write goes through an atomic
    /// rename, so the files it guards are never half-written.
    pub fn lock(&self, kind: EntityKind) -> MutexGuard<'_, ()> {
        self.locks[kind.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue the next id for `kind`.
    pub fn next_id(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let guard = self.lock(kind);
        self.next_id_locked(kind, 0, &guard)
    }

    /// Last id issued for `kind`, 0 if none.
    pub fn current(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let _guard = self.lock(kind);
        self.read(kind)
    }

    /// Issue an id greater than both the stored counter and `floor`.
    ///
    /// `floor` is the highest id already present in the collection, which
    /// covers a lost counter file.
    pub(crate) fn next_id_locked(
        &self,
        kind: EntityKind,
        floor: u64,
        _guard: &MutexGuard<'_, ()>,
    ) -> Result<u64, StoreError> {
        let next = self.read(kind)?.max(floor) + 1;
        self.write(kind, next)?;
        tracing::debug!(kind = %kind, id = next, "allocated id");
        Ok(next)
    }

    /// Advance the counter so it is at least `id`.
    pub(crate) fn observe_locked(
        &self,
        kind: EntityKind,
        id: u64,
        _guard: &MutexGuard<'_, ()>,
    ) -> Result<(), StoreError> {
        if self.read(kind)? < id {
            self.write(kind, id)?;
        }
        Ok(())
    }

    fn counter_path(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}.seq", kind.collection()))
    }

    fn read(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let path = self.counter_path(kind);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        text.trim().parse().map_err(|_| {
            StorageError::Corrupt(format!("id counter at {}", path.display())).into()
        })
    }

    fn write(&self, kind: EntityKind, value: u64) -> Result<(), StoreError> {
        write_atomic(&self.counter_path(kind), format!("{value}\n").as_bytes())
    }
}

/// Replace `path` with `data` through a temporary sibling and a rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let ids = IdAllocator::open(dir.path()).unwrap();

        assert_eq!(ids.next_id(EntityKind::Request).unwrap(), 1);
        assert_eq!(ids.next_id(EntityKind::Request).unwrap(), 2);
        assert_eq!(ids.next_id(EntityKind::Photo).unwrap(), 1);
        assert_eq!(ids.current(EntityKind::Request).unwrap(), 2);
        assert_eq!(ids.current(EntityKind::User).unwrap(), 0);
    }

    #[test]
    fn floor_skips_ids_already_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let ids = IdAllocator::open(dir.path()).unwrap();

        let guard = ids.lock(EntityKind::User);
        assert_eq!(ids.next_id_locked(EntityKind::User, 7, &guard).unwrap(), 8);
        ids.observe_locked(EntityKind::User, 5, &guard).unwrap();
        drop(guard);

        assert_eq!(ids.next_id(EntityKind::User).unwrap(), 9);
    }

    #[test]
    fn corrupt_counter_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requests.seq"), "not a number").unwrap();
        let ids = IdAllocator::open(dir.path()).unwrap();

        let err = ids.next_id(EntityKind::Request).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }
}
