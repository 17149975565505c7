use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use super::error::StoreError;
use super::models::EntityKind;
use super::repository::{check_unique, Entity, Repository};

/// Entity documents: id -> JSON
const ENTITIES: TableDefinition<u64, &[u8]> = TableDefinition::new("entities");

/// Last issued id, keyed by collection name
const ID_COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("id_counters");

/// Repository backed by an embedded redb database.
///
/// Each entity type gets its own database file, so writes to different types
/// never contend. The id counter lives in the same file and is advanced in the
/// same write transaction as the entity it is assigned to.
pub struct RedbRepository<E> {
    db: Arc<Database>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for RedbRepository<E> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> RedbRepository<E> {
    /// Open or create `<collection>.redb` under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir
            .as_ref()
            .join(format!("{}.redb", E::KIND.collection()));
        let db = Database::create(db_path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTITIES)?;
            let _ = write_txn.open_table(ID_COUNTERS)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            _entity: PhantomData,
        })
    }

    fn counter_key() -> &'static str {
        E::KIND.collection()
    }

    fn decode(kind: EntityKind, data: &[u8]) -> Result<E, StoreError> {
        serde_json::from_slice(data).map_err(|e| {
            tracing::error!(kind = %kind, error = %e, "undecodable entity document");
            e.into()
        })
    }
}

impl<E: Entity> Repository<E> for RedbRepository<E> {
    fn find_all(&self) -> Result<Vec<E>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;

        let mut entities = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            entities.push(Self::decode(E::KIND, value.value())?);
        }
        Ok(entities)
    }

    fn find_by_id(&self, id: u64) -> Result<Option<E>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;

        match table.get(id)? {
            Some(data) => Ok(Some(Self::decode(E::KIND, data.value())?)),
            None => Ok(None),
        }
    }

    fn save(&self, mut entity: E) -> Result<E, StoreError> {
        entity.validate()?;
        entity.validate_new()?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITIES)?;

            let existing: Vec<E> = table
                .iter()?
                .map(|r| {
                    let (_, value) = r?;
                    Self::decode(E::KIND, value.value())
                })
                .collect::<Result<_, _>>()?;
            check_unique(&existing, &entity)?;

            let mut counters = write_txn.open_table(ID_COUNTERS)?;
            let counter = counters
                .get(Self::counter_key())?
                .map(|v| v.value())
                .unwrap_or(0);
            let highest = table.last()?.map(|(k, _)| k.value()).unwrap_or(0);

            let id = match entity.id() {
                Some(id) => {
                    if table.get(id)?.is_some() {
                        return Err(StoreError::validation(format!(
                            "{} {id} already exists",
                            E::KIND
                        )));
                    }
                    if id > counter {
                        counters.insert(Self::counter_key(), id)?;
                    }
                    id
                }
                None => {
                    let id = counter.max(highest) + 1;
                    counters.insert(Self::counter_key(), id)?;
                    entity.set_id(id);
                    id
                }
            };

            let data = serde_json::to_vec(&entity)?;
            table.insert(id, data.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(kind = %E::KIND, id = ?entity.id(), "saved");
        Ok(entity)
    }

    fn update(&self, entity: E) -> Result<E, StoreError> {
        let id = entity
            .id()
            .ok_or_else(|| StoreError::validation(format!("{} has no id", E::KIND)))?;
        entity.validate()?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITIES)?;

            let existing: Vec<E> = table
                .iter()?
                .map(|r| {
                    let (_, value) = r?;
                    Self::decode(E::KIND, value.value())
                })
                .collect::<Result<_, _>>()?;
            let previous = existing
                .iter()
                .find(|e| e.id() == Some(id))
                .ok_or_else(|| StoreError::not_found(E::KIND, id))?;
            entity.check_update(previous)?;
            check_unique(&existing, &entity)?;

            let data = serde_json::to_vec(&entity)?;
            table.insert(id, data.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(kind = %E::KIND, id, "updated");
        Ok(entity)
    }

    fn reserve_id(&self) -> Result<u64, StoreError> {
        let write_txn = self.db.begin_write()?;
        let id = {
            let table = write_txn.open_table(ENTITIES)?;
            let mut counters = write_txn.open_table(ID_COUNTERS)?;
            let counter = counters
                .get(Self::counter_key())?
                .map(|v| v.value())
                .unwrap_or(0);
            let highest = table.last()?.map(|(k, _)| k.value()).unwrap_or(0);
            let id = counter.max(highest) + 1;
            counters.insert(Self::counter_key(), id)?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }
}
