pub mod error;
mod file_store;
mod ids;
pub mod models;
mod redb_store;
mod repository;

pub use error::{StorageError, StoreError};
pub use file_store::FileRepository;
pub use ids::IdAllocator;
pub use redb_store::RedbRepository;
pub use repository::{Entity, Repository};
