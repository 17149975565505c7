//! sgii-store - Entity persistence and request lifecycle for a municipal
//! service-request portal
//!
//! This crate provides the storage core behind the portal's API with:
//! - Flat-file entity repositories (one JSON document per entity type,
//!   atomic rename on every write, per-type write locks)
//! - Durable per-type id counters
//! - An optional redb backend behind the same repository trait
//! - A photo asset store with path-traversal-safe name resolution
//! - The request planning state machine and offline reconciliation

pub mod accounts;
pub mod assets;
pub mod config;
pub mod intake;
pub mod reconcile;
pub mod state_machine;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use accounts::Accounts;
use assets::{AssetStore, LocalAssetStore};
use config::{Config, StorageBackend};
use intake::RequestIntake;
use reconcile::Reconciler;
use state_machine::RequestLifecycle;
use storage::models::{Intervention, Photo, Request, User};
use storage::{Entity, FileRepository, IdAllocator, RedbRepository, Repository, StoreError};

/// Shared application state handed to the API layer
pub struct AppState {
    pub config: Config,
    /// Raw request collection. New requests should go through `intake`,
    /// which also checks that photo references exist.
    pub requests: Arc<dyn Repository<Request>>,
    pub interventions: Arc<dyn Repository<Intervention>>,
    pub users: Arc<dyn Repository<User>>,
    pub photos: Arc<dyn Repository<Photo>>,
    pub assets: Arc<dyn AssetStore>,
    pub lifecycle: RequestLifecycle,
    pub intake: RequestIntake,
    pub accounts: Accounts,
}

impl AppState {
    /// Open every repository and the asset store described by `config`.
    pub fn open(config: Config) -> Result<Self, StoreError> {
        let data_dir = Path::new(&config.node.data_dir);
        let ids = Arc::new(IdAllocator::open(data_dir)?);

        let requests = open_repository::<Request>(&config, &ids)?;
        let interventions = open_repository::<Intervention>(&config, &ids)?;
        let users = open_repository::<User>(&config, &ids)?;
        let photos = open_repository::<Photo>(&config, &ids)?;

        let assets: Arc<dyn AssetStore> =
            Arc::new(LocalAssetStore::new(&config.storage.uploads_path)?);

        let lifecycle = RequestLifecycle::new(Arc::clone(&requests), Arc::clone(&interventions));
        let intake = RequestIntake::new(
            Arc::clone(&requests),
            Arc::clone(&photos),
            Arc::clone(&assets),
            config.max_upload_size,
        );
        let accounts = Accounts::new(Arc::clone(&users));

        Ok(Self {
            config,
            requests,
            interventions,
            users,
            photos,
            assets,
            lifecycle,
            intake,
            accounts,
        })
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.requests),
            Arc::clone(&self.interventions),
            Arc::clone(&self.photos),
            Arc::clone(&self.assets),
            Duration::from_secs(self.config.reconcile.orphan_blob_grace_seconds),
        )
    }
}

fn open_repository<E: Entity>(
    config: &Config,
    ids: &Arc<IdAllocator>,
) -> Result<Arc<dyn Repository<E>>, StoreError> {
    let data_dir = &config.node.data_dir;
    let repository: Arc<dyn Repository<E>> = match config.storage.backend {
        StorageBackend::File => Arc::new(FileRepository::<E>::open(data_dir, Arc::clone(ids))?),
        StorageBackend::Redb => Arc::new(RedbRepository::<E>::open(data_dir)?),
    };
    Ok(repository)
}
