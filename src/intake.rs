//! Request submission, including photo uploads.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::assets::{content_type_for, AssetStore};
use crate::storage::models::{EntityKind, Location, Photo, Request, RequestState};
use crate::storage::{Repository, StoreError};

/// A request as submitted by a citizen, before the store fills in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: Option<RequestState>,
    #[serde(default)]
    pub submitted_on: Option<NaiveDate>,
    #[serde(default)]
    pub photo_refs: Vec<u64>,
    #[serde(default)]
    pub citizen_id: Option<u64>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub address: Option<String>,
}

impl NewRequest {
    pub fn with_description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    fn checked_description(&self) -> Result<String, StoreError> {
        match self.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => Ok(d.to_string()),
            _ => Err(StoreError::validation("description is required")),
        }
    }

    fn into_request(self, description: String) -> Result<Request, StoreError> {
        let state = self.state.unwrap_or(RequestState::Submitted);
        if !state.is_plannable() {
            return Err(StoreError::validation(
                "a new request cannot start out planned",
            ));
        }
        Ok(Request {
            id: None,
            description,
            submitted_on: self.submitted_on.unwrap_or_else(|| Utc::now().date_naive()),
            state,
            photo_refs: self.photo_refs,
            intervention_id: None,
            citizen_id: self.citizen_id,
            location: self.location,
            address: self.address,
        })
    }
}

/// One uploaded file from a multipart submission.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

/// A photo's bytes ready to be served.
#[derive(Debug, Clone)]
pub struct PhotoContent {
    pub path: PathBuf,
    pub content_type: String,
    pub data: Bytes,
}

pub struct RequestIntake {
    requests: Arc<dyn Repository<Request>>,
    photos: Arc<dyn Repository<Photo>>,
    assets: Arc<dyn AssetStore>,
    max_upload_size: u64,
}

impl RequestIntake {
    pub fn new(
        requests: Arc<dyn Repository<Request>>,
        photos: Arc<dyn Repository<Photo>>,
        assets: Arc<dyn AssetStore>,
        max_upload_size: u64,
    ) -> Self {
        Self {
            requests,
            photos,
            assets,
            max_upload_size,
        }
    }

    /// JSON submission: photos, if any, must already exist.
    pub fn submit(&self, new: NewRequest) -> Result<Request, StoreError> {
        let description = new.checked_description()?;
        for photo_id in &new.photo_refs {
            if self.photos.find_by_id(*photo_id)?.is_none() {
                return Err(StoreError::validation(format!(
                    "photo {photo_id} does not exist"
                )));
            }
        }

        let request = self.requests.save(new.into_request(description)?)?;
        info!(request_id = ?request.id, "request submitted");
        Ok(request)
    }

    /// Multipart submission: stores each upload as a photo owned by the new
    /// request, then saves the request referencing them.
    ///
    /// Everything is validated before the first blob is written. If the final
    /// save fails, the stored photos stay behind for reconciliation.
    pub async fn submit_with_photos(
        &self,
        new: NewRequest,
        uploads: Vec<Upload>,
    ) -> Result<Request, StoreError> {
        let description = new.checked_description()?;
        for upload in &uploads {
            self.check_upload(upload)?;
        }
        if !new.photo_refs.is_empty() {
            return Err(StoreError::validation(
                "photo_refs cannot be combined with uploaded files",
            ));
        }
        let mut request = new.into_request(description)?;

        let request_id = self.requests.reserve_id()?;
        request.id = Some(request_id);

        for upload in uploads {
            let stored = self.assets.store(&upload.filename, upload.data).await?;
            let photo = self.photos.save(Photo {
                id: None,
                stored_filename: stored.stored_filename,
                original_filename: stored.original_filename,
                content_type: stored.content_type,
                byte_size: stored.byte_size,
                request_id,
                uploaded_at: Utc::now(),
            })?;
            if let Some(photo_id) = photo.id {
                request.photo_refs.push(photo_id);
            }
        }

        let photo_count = request.photo_refs.len();
        let request = self.requests.save(request).map_err(|e| {
            if photo_count > 0 {
                warn!(request_id, photo_count, error = %e, "request save failed after storing photos");
            }
            e
        })?;
        info!(request_id, photo_count, "request submitted with photos");
        Ok(request)
    }

    /// Photos owned by a request.
    pub fn photos_for(&self, request_id: u64) -> Result<Vec<Photo>, StoreError> {
        if self.requests.find_by_id(request_id)?.is_none() {
            return Err(StoreError::not_found(EntityKind::Request, request_id));
        }
        self.photos
            .find_by_field("request_id", &request_id.to_string())
    }

    /// Read a stored photo by its stored filename, `None` if the name is
    /// invalid or no file exists.
    pub async fn open_photo(&self, stored_filename: &str) -> Result<Option<PhotoContent>, StoreError> {
        let Some(path) = self.assets.resolve(stored_filename) else {
            return Ok(None);
        };
        if !self.assets.exists(stored_filename).await? {
            return Ok(None);
        }
        let data = self.assets.get(stored_filename).await?;
        Ok(Some(PhotoContent {
            content_type: content_type_for(stored_filename),
            path,
            data,
        }))
    }

    fn check_upload(&self, upload: &Upload) -> Result<(), StoreError> {
        if upload.data.is_empty() {
            return Err(StoreError::validation(format!(
                "{} is empty",
                upload.filename
            )));
        }
        if upload.data.len() as u64 > self.max_upload_size {
            return Err(StoreError::validation(format!(
                "{} exceeds the {} byte upload limit",
                upload.filename, self.max_upload_size
            )));
        }
        if !content_type_for(&upload.filename).starts_with("image/") {
            return Err(StoreError::validation(format!(
                "{} is not an image",
                upload.filename
            )));
        }
        Ok(())
    }
}
