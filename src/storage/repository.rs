use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::StoreError;
use super::models::EntityKind;

/// A domain type stored in its own collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Top-level string fields whose values must be unique across the
    /// collection, compared case-insensitively.
    const UNIQUE_FIELDS: &'static [&'static str] = &[];

    fn id(&self) -> Option<u64>;

    fn set_id(&mut self, id: u64);

    /// Single-entity validation run by `save` and `update`.
    fn validate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Rules that only apply when the entity is first stored.
    fn validate_new(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Checks an update against the stored version it replaces.
    fn check_update(&self, _previous: &Self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// CRUD over one entity type's collection.
///
/// Every call may block on I/O and on the collection's write lock.
pub trait Repository<E: Entity>: Send + Sync {
    /// All stored entities, in a stable order for a given storage state.
    fn find_all(&self) -> Result<Vec<E>, StoreError>;

    fn find_by_id(&self, id: u64) -> Result<Option<E>, StoreError>;

    /// Insert a new entity, allocating an id when it has none.
    fn save(&self, entity: E) -> Result<E, StoreError>;

    /// Replace the stored entity with the same id.
    fn update(&self, entity: E) -> Result<E, StoreError>;

    /// Allocate an id without storing anything.
    fn reserve_id(&self) -> Result<u64, StoreError>;

    fn find_by_field(&self, field: &str, value: &str) -> Result<Vec<E>, StoreError> {
        let mut found = Vec::new();
        for entity in self.find_all()? {
            if field_matches(&entity, field, value)? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    fn exists_by_field(&self, field: &str, value: &str) -> Result<bool, StoreError> {
        for entity in self.find_all()? {
            if field_matches(&entity, field, value)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Compare a top-level field of the entity's serialized form with `value`.
pub(crate) fn field_matches<E: Entity>(
    entity: &E,
    field: &str,
    value: &str,
) -> Result<bool, StoreError> {
    let doc = serde_json::to_value(entity)?;
    Ok(match doc.get(field) {
        Some(serde_json::Value::String(s)) => s == value,
        Some(serde_json::Value::Null) | None => false,
        Some(other) => other.to_string() == value,
    })
}

/// Reject `candidate` if any other stored entity shares one of its unique fields.
pub(crate) fn check_unique<'a, E: Entity>(
    existing: impl IntoIterator<Item = &'a E>,
    candidate: &E,
) -> Result<(), StoreError> {
    if E::UNIQUE_FIELDS.is_empty() {
        return Ok(());
    }
    let doc = serde_json::to_value(candidate)?;
    for other in existing {
        if other.id().is_some() && other.id() == candidate.id() {
            continue;
        }
        let other_doc = serde_json::to_value(other)?;
        for field in E::UNIQUE_FIELDS {
            let (Some(serde_json::Value::String(value)), Some(serde_json::Value::String(taken))) =
                (doc.get(*field), other_doc.get(*field))
            else {
                continue;
            };
            if value.to_lowercase() == taken.to_lowercase() {
                return Err(StoreError::validation(format!(
                    "{} with {field} '{value}' already exists",
                    E::KIND
                )));
            }
        }
    }
    Ok(())
}

/// Highest id present in a collection, 0 when empty.
pub(crate) fn max_id<'a, E: Entity>(entities: impl IntoIterator<Item = &'a E>) -> u64 {
    entities
        .into_iter()
        .filter_map(|entity| entity.id())
        .max()
        .unwrap_or(0)
}
