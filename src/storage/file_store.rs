use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::error::StoreError;
use super::ids::{write_atomic, IdAllocator};
use super::repository::{check_unique, max_id, Entity, Repository};

/// Flat-file repository: one JSON document per entity type holding the
/// whole collection.
///
/// Writes take the type's lock from the [`IdAllocator`], reload the document,
/// apply one insert or replace and swap the new document in with an atomic
/// rename. Reads take no lock; the rename guarantees they see either the old
/// or the new document in full.
pub struct FileRepository<E> {
    path: PathBuf,
    ids: Arc<IdAllocator>,
    commit_delay: Option<Duration>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> FileRepository<E> {
    pub fn open<P: AsRef<Path>>(data_dir: P, ids: Arc<IdAllocator>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let path = data_dir
            .as_ref()
            .join(format!("{}.json", E::KIND.collection()));
        Ok(Self {
            path,
            ids,
            commit_delay: None,
            _entity: PhantomData,
        })
    }

    /// Location of the collection document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pause between writing the temporary document and renaming it over
    /// the collection.
    #[cfg(test)]
    pub(crate) fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    fn load(&self) -> Result<Vec<E>, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    fn commit(&self, entities: &[E]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(entities)?;
        if let Some(delay) = self.commit_delay {
            let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            std::io::Write::write_all(&mut tmp, &data)?;
            std::thread::sleep(delay);
            tmp.persist(&self.path).map_err(|e| e.error)?;
            return Ok(());
        }
        write_atomic(&self.path, &data)
    }
}

impl<E: Entity> Repository<E> for FileRepository<E> {
    fn find_all(&self) -> Result<Vec<E>, StoreError> {
        self.load()
    }

    fn find_by_id(&self, id: u64) -> Result<Option<E>, StoreError> {
        Ok(self.load()?.into_iter().find(|e| e.id() == Some(id)))
    }

    fn save(&self, mut entity: E) -> Result<E, StoreError> {
        entity.validate()?;
        entity.validate_new()?;

        let guard = self.ids.lock(E::KIND);
        let mut entities = self.load()?;

        match entity.id() {
            Some(id) => {
                if entities.iter().any(|e| e.id() == Some(id)) {
                    return Err(StoreError::validation(format!(
                        "{} {id} already exists",
                        E::KIND
                    )));
                }
                check_unique(&entities, &entity)?;
                self.ids.observe_locked(E::KIND, id, &guard)?;
            }
            None => {
                check_unique(&entities, &entity)?;
                let id = self
                    .ids
                    .next_id_locked(E::KIND, max_id(&entities), &guard)?;
                entity.set_id(id);
            }
        }

        entities.push(entity.clone());
        self.commit(&entities)?;
        tracing::debug!(kind = %E::KIND, id = ?entity.id(), count = entities.len(), "saved");
        Ok(entity)
    }

    fn update(&self, entity: E) -> Result<E, StoreError> {
        let id = entity
            .id()
            .ok_or_else(|| StoreError::validation(format!("{} has no id", E::KIND)))?;
        entity.validate()?;

        let _guard = self.ids.lock(E::KIND);
        let mut entities = self.load()?;

        let index = entities
            .iter()
            .position(|e| e.id() == Some(id))
            .ok_or_else(|| StoreError::not_found(E::KIND, id))?;
        entity.check_update(&entities[index])?;
        check_unique(&entities, &entity)?;

        entities[index] = entity.clone();
        self.commit(&entities)?;
        tracing::debug!(kind = %E::KIND, id, "updated");
        Ok(entity)
    }

    fn reserve_id(&self) -> Result<u64, StoreError> {
        let guard = self.ids.lock(E::KIND);
        let entities = self.load()?;
        self.ids
            .next_id_locked(E::KIND, max_id(&entities), &guard)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::models::Request;

    #[test]
    fn readers_see_whole_collections_during_a_slow_commit() {
        let dir = tempfile::tempdir().unwrap();
        let ids = Arc::new(IdAllocator::open(dir.path()).unwrap());
        let repo = Arc::new(
            FileRepository::<Request>::open(dir.path(), ids)
                .unwrap()
                .with_commit_delay(Duration::from_millis(40)),
        );

        for i in 0..3 {
            repo.save(Request::new(format!("existing {i}"))).unwrap();
        }
        let before: HashSet<u64> = repo
            .find_all()
            .unwrap()
            .iter()
            .filter_map(|r| r.id)
            .collect();

        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let repo = Arc::clone(&repo);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut snapshots = Vec::new();
                    while !done.load(Ordering::SeqCst) {
                        let ids: HashSet<u64> = repo
                            .find_all()
                            .expect("reader saw a partial document")
                            .iter()
                            .filter_map(|r| r.id)
                            .collect();
                        snapshots.push(ids);
                    }
                    snapshots
                })
            })
            .collect();

        let saved = repo.save(Request::new("written during reads")).unwrap();
        done.store(true, Ordering::SeqCst);

        let mut after = before.clone();
        after.insert(saved.id.unwrap());

        for reader in readers {
            for snapshot in reader.join().unwrap() {
                assert!(
                    snapshot == before || snapshot == after,
                    "unexpected snapshot {snapshot:?}"
                );
            }
        }
    }

    #[test]
    fn lost_counter_does_not_reuse_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ids = Arc::new(IdAllocator::open(dir.path()).unwrap());
        let repo = FileRepository::<Request>::open(dir.path(), Arc::clone(&ids)).unwrap();

        repo.save(Request::new("one")).unwrap();
        repo.save(Request::new("two")).unwrap();
        std::fs::remove_file(dir.path().join("requests.seq")).unwrap();

        let third = repo.save(Request::new("three")).unwrap();
        assert_eq!(third.id, Some(3));
    }
}
