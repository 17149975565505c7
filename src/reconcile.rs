//! Offline consistency checks across collections and the asset store.
//!
//! Nothing here runs inline with writes. Orphans left by a partial planning
//! failure or by a request save that failed after its photos were stored are
//! reported, and unreferenced blobs can be removed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::assets::{AssetError, AssetStore};
use crate::storage::models::{Intervention, Photo, Request, RequestState};
use crate::storage::{Repository, StoreError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Interventions whose request is missing or does not point back at them.
    pub orphan_interventions: Vec<u64>,
    /// Planned requests whose referenced intervention does not exist.
    pub unlinked_requests: Vec<u64>,
    /// `(request_id, photo_id)` pairs where the photo does not exist.
    pub dangling_photo_refs: Vec<(u64, u64)>,
    /// Photos whose owning request does not exist.
    pub orphan_photos: Vec<u64>,
    /// Photos whose blob is missing from the asset store.
    pub missing_blobs: Vec<u64>,
    /// Photos whose stored filename the asset store refuses to resolve.
    pub invalid_blob_names: Vec<u64>,
    /// Blobs no photo refers to, older than the grace period.
    pub orphan_blobs: Vec<String>,
    /// Orphan blobs removed during this run.
    pub deleted_blobs: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_interventions.is_empty()
            && self.unlinked_requests.is_empty()
            && self.dangling_photo_refs.is_empty()
            && self.orphan_photos.is_empty()
            && self.missing_blobs.is_empty()
            && self.invalid_blob_names.is_empty()
            && self.orphan_blobs.is_empty()
    }
}

pub struct Reconciler {
    requests: Arc<dyn Repository<Request>>,
    interventions: Arc<dyn Repository<Intervention>>,
    photos: Arc<dyn Repository<Photo>>,
    assets: Arc<dyn AssetStore>,
    /// Blobs younger than this may belong to an upload still in flight.
    grace: Duration,
}

impl Reconciler {
    pub fn new(
        requests: Arc<dyn Repository<Request>>,
        interventions: Arc<dyn Repository<Intervention>>,
        photos: Arc<dyn Repository<Photo>>,
        assets: Arc<dyn AssetStore>,
        grace: Duration,
    ) -> Self {
        Self {
            requests,
            interventions,
            photos,
            assets,
            grace,
        }
    }

    pub async fn run(&self, delete_orphan_blobs: bool) -> Result<ReconcileReport, StoreError> {
        let requests: HashMap<u64, Request> = self
            .requests
            .find_all()?
            .into_iter()
            .filter_map(|r| r.id.map(|id| (id, r)))
            .collect();
        let interventions = self.interventions.find_all()?;
        let photos = self.photos.find_all()?;

        let mut report = ReconcileReport::default();

        let intervention_ids: HashSet<u64> = interventions.iter().filter_map(|i| i.id).collect();
        for intervention in &interventions {
            let Some(id) = intervention.id else { continue };
            let linked = requests
                .get(&intervention.request_id)
                .is_some_and(|r| r.intervention_id == Some(id));
            if !linked {
                report.orphan_interventions.push(id);
            }
        }

        let photo_ids: HashSet<u64> = photos.iter().filter_map(|p| p.id).collect();
        let mut request_ids: Vec<&u64> = requests.keys().collect();
        request_ids.sort();
        for id in request_ids {
            let request = &requests[id];
            if request.state == RequestState::Planned
                && !request
                    .intervention_id
                    .is_some_and(|i| intervention_ids.contains(&i))
            {
                report.unlinked_requests.push(*id);
            }
            for photo_id in &request.photo_refs {
                if !photo_ids.contains(photo_id) {
                    report.dangling_photo_refs.push((*id, *photo_id));
                }
            }
        }

        let mut referenced_blobs = HashSet::new();
        for photo in &photos {
            let Some(id) = photo.id else { continue };
            if !requests.contains_key(&photo.request_id) {
                report.orphan_photos.push(id);
            }
            match self.assets.exists(&photo.stored_filename).await {
                Ok(true) => {}
                Ok(false) => report.missing_blobs.push(id),
                Err(AssetError::InvalidName(_)) => {
                    report.invalid_blob_names.push(id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            referenced_blobs.insert(photo.stored_filename.as_str());
        }

        let now = SystemTime::now();
        for entry in self.assets.list().await? {
            if referenced_blobs.contains(entry.stored_filename.as_str()) {
                continue;
            }
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age < self.grace {
                continue;
            }
            if delete_orphan_blobs {
                self.assets.delete(&entry.stored_filename).await?;
                report.deleted_blobs.push(entry.stored_filename.clone());
            }
            report.orphan_blobs.push(entry.stored_filename);
        }

        if report.is_clean() {
            info!("reconciliation found no inconsistencies");
        } else {
            warn!(
                orphan_interventions = report.orphan_interventions.len(),
                unlinked_requests = report.unlinked_requests.len(),
                dangling_photo_refs = report.dangling_photo_refs.len(),
                orphan_photos = report.orphan_photos.len(),
                missing_blobs = report.missing_blobs.len(),
                invalid_blob_names = report.invalid_blob_names.len(),
                orphan_blobs = report.orphan_blobs.len(),
                deleted_blobs = report.deleted_blobs.len(),
                "reconciliation found inconsistencies"
            );
        }
        Ok(report)
    }
}
