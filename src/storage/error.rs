use thiserror::Error;

use super::models::EntityKind;

/// Errors surfaced by repositories, the lifecycle engine and the intake
/// services.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: u64 },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
    /// Intervention `intervention_id` was persisted but request
    /// `request_id` could not be updated to reference it.
    #[error(
        "Partial failure: intervention {intervention_id} created but request {request_id} was not updated: {source}"
    )]
    PartialFailure {
        request_id: u64,
        intervention_id: u64,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        StoreError::InvalidState(message.into())
    }

    pub fn not_found(kind: EntityKind, id: u64) -> Self {
        StoreError::NotFound { kind, id }
    }
}

/// Underlying durability failures behind [`StoreError::StorageUnavailable`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt {0}")]
    Corrupt(String),
    #[error("Random source unavailable")]
    Random,
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Storage error: {0}")]
    RedbStorage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::StorageUnavailable(StorageError::Io(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::StorageUnavailable(StorageError::Json(e))
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::StorageUnavailable(StorageError::Commit(Box::new(e)))
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::StorageUnavailable(StorageError::RedbDatabase(Box::new(e)))
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::StorageUnavailable(StorageError::RedbStorage(Box::new(e)))
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::StorageUnavailable(StorageError::Table(Box::new(e)))
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::StorageUnavailable(StorageError::Transaction(Box::new(e)))
    }
}
