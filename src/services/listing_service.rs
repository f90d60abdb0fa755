//! src/services/listing_service.rs
//!
//! ListingService keeps each listing's image reference consistent with the
//! remote media store:
//! - create: upload, then persist; a failed persist deletes the upload
//! - replace: upload new, persist new, then delete old
//! - delete: delete the remote object, then the record
//!
//! Mutations on one listing id are serialized, and every remote and database
//! call runs under an explicit timeout. A write that errors or times out is
//! read back before its upload is compensated, since it may have committed.

use crate::{
    models::{
        listing::{Listing, ListingChanges, ListingFilter, ListingForm, MediaReference},
        media::{StagedFile, UploadOptions},
    },
    services::{
        keyed_lock::KeyedLock,
        listing_repository::{ListingRepository, RepositoryError},
        media_store::{MediaStore, MediaStoreError},
        saga::{Compensation, Saga},
    },
};
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("{0}")]
    Validation(String),
    #[error("listing `{0}` not found")]
    NotFound(Uuid),
    #[error("media store error: {0}")]
    RemoteStore(#[from] MediaStoreError),
    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

pub type ListingResult<T> = Result<T, ListingError>;

/// What a re-read shows after a write returned an error.
#[derive(Debug)]
enum WriteOutcome {
    /// The stored listing references the new upload; the write landed.
    Landed(Listing),
    /// The stored listing does not reference the new upload.
    Absent,
    /// The listing could not be read back.
    Unknown(ListingError),
}

/// Behavior knobs for [`ListingService`].
#[derive(Debug, Clone)]
pub struct ListingSettings {
    /// Remote folder new images are uploaded into.
    pub folder: String,
    /// Whether creating a listing requires an image.
    pub require_image: bool,
    pub remote_timeout: Duration,
    pub db_timeout: Duration,
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            folder: "listings".into(),
            require_image: true,
            remote_timeout: Duration::from_secs(30),
            db_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct ListingService {
    repo: Arc<dyn ListingRepository>,
    media: Arc<dyn MediaStore>,
    locks: KeyedLock<Uuid>,
    settings: ListingSettings,
}

/// Await `fut`, turning an elapsed `after` into [`ListingError::Timeout`].
async fn timed<T, E, F>(operation: &'static str, after: Duration, fut: F) -> ListingResult<T>
where
    F: Future<Output = Result<T, E>>,
    ListingError: From<E>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(ListingError::from),
        Err(_) => Err(ListingError::Timeout { operation, after }),
    }
}

impl ListingService {
    pub fn new(
        repo: Arc<dyn ListingRepository>,
        media: Arc<dyn MediaStore>,
        settings: ListingSettings,
    ) -> Self {
        Self {
            repo,
            media,
            locks: KeyedLock::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ListingSettings {
        &self.settings
    }

    fn saga(&self, operation: &'static str) -> Saga {
        Saga::new(operation, self.media.clone(), self.settings.remote_timeout)
    }

    /// Upload a staged file. The staged temp file is released once the upload
    /// finishes, whatever the outcome.
    async fn upload(&self, file: StagedFile) -> ListingResult<MediaReference> {
        let options = UploadOptions {
            folder: self.settings.folder.clone(),
        };
        let result = timed(
            "media upload",
            self.settings.remote_timeout,
            self.media.upload(&file, &options),
        )
        .await;
        drop(file);
        result
    }

    /// Delete a remote object. An object that is already gone counts as
    /// deleted, so retries are indistinguishable from the first call.
    pub async fn delete_remote(&self, remote_id: &str) -> ListingResult<()> {
        let outcome = timed(
            "media delete",
            self.settings.remote_timeout,
            self.media.delete(remote_id),
        )
        .await?;
        debug!(remote_id = %remote_id, ?outcome, "remote media deleted");
        Ok(())
    }

    /// Re-read `id` after a failed write to learn whether the write committed
    /// anyway and the listing now references `remote_id`.
    async fn write_outcome(&self, id: Uuid, remote_id: &str) -> WriteOutcome {
        match timed("listing lookup", self.settings.db_timeout, self.repo.find_by_id(id)).await {
            Ok(Some(stored))
                if stored.image.as_ref().map(|i| i.remote_id.as_str()) == Some(remote_id) =>
            {
                WriteOutcome::Landed(stored)
            }
            Ok(_) => WriteOutcome::Absent,
            Err(err) => WriteOutcome::Unknown(err),
        }
    }

    /// Resolve a failed write that may carry a new upload. Only an upload the
    /// stored listing does not reference is compensated; an unreadable
    /// listing leaves the upload to the reconciliation sweep.
    async fn settle_failed_write(
        &self,
        id: Uuid,
        upload: Option<&MediaReference>,
        saga: Saga,
        err: ListingError,
    ) -> ListingResult<Listing> {
        let Some(upload) = upload else {
            saga.commit();
            return Err(err);
        };
        match self.write_outcome(id, &upload.remote_id).await {
            WriteOutcome::Landed(stored) => {
                saga.commit();
                info!(
                    listing_id = %id,
                    remote_id = %upload.remote_id,
                    error = %err,
                    "write committed despite error; keeping new media"
                );
                Ok(stored)
            }
            WriteOutcome::Absent => {
                warn!(listing_id = %id, error = %err, "listing write failed; compensating");
                saga.compensate().await;
                Err(err)
            }
            WriteOutcome::Unknown(read_err) => {
                saga.commit();
                warn!(
                    listing_id = %id,
                    remote_id = %upload.remote_id,
                    error = %err,
                    read_error = %read_err,
                    "listing write outcome unknown; leaving media for reconciliation"
                );
                Err(err)
            }
        }
    }

    async fn find(&self, id: Uuid) -> ListingResult<Listing> {
        timed("listing lookup", self.settings.db_timeout, self.repo.find_by_id(id))
            .await?
            .ok_or(ListingError::NotFound(id))
    }

    /// Create a listing, uploading its image first.
    pub async fn create(&self, form: ListingForm) -> ListingResult<Listing> {
        let ListingForm { fields, image } = form;
        let new_listing = fields.into_new_listing().map_err(ListingError::Validation)?;
        if image.is_none() && self.settings.require_image {
            return Err(ListingError::Validation("an image file is required".into()));
        }

        let mut saga = self.saga("create listing");
        let media = match image {
            Some(file) => {
                let reference = self.upload(file).await?;
                saga.register(Compensation::DeleteRemote {
                    remote_id: reference.remote_id.clone(),
                });
                Some(reference)
            }
            None => None,
        };

        let listing = new_listing.into_listing(Uuid::new_v4(), media, Utc::now());
        let saved = match timed(
            "listing insert",
            self.settings.db_timeout,
            self.repo.create(&listing),
        )
        .await
        {
            Ok(saved) => {
                saga.commit();
                saved
            }
            Err(err) => {
                self.settle_failed_write(listing.id, listing.image.as_ref(), saga, err)
                    .await?
            }
        };
        info!(
            listing_id = %saved.id,
            remote_id = saved.image.as_ref().map(|i| i.remote_id.as_str()),
            "listing created"
        );
        Ok(saved)
    }

    /// Apply supplied fields and, when a file is given, swap in a new image.
    ///
    /// The old image is deleted only after the new reference is stored, so a
    /// failure at any earlier step leaves the listing pointing at an image
    /// that still exists. A form with no fields and no file writes nothing.
    pub async fn replace(&self, id: Uuid, form: ListingForm) -> ListingResult<Listing> {
        let ListingForm { fields, image } = form;
        let patch = fields.into_patch().map_err(ListingError::Validation)?;

        let _guard = self.locks.lock(id).await;
        let current = self.find(id).await?;
        if patch.is_empty() && image.is_none() {
            debug!(listing_id = %id, "nothing to update");
            return Ok(current);
        }

        let mut saga = self.saga("replace listing");
        let new_image = match image {
            Some(file) => {
                let reference = self.upload(file).await?;
                saga.register(Compensation::DeleteRemote {
                    remote_id: reference.remote_id.clone(),
                });
                Some(reference)
            }
            None => None,
        };

        let changes = ListingChanges {
            patch,
            image: new_image.clone(),
        };
        let updated = match timed(
            "listing update",
            self.settings.db_timeout,
            self.repo.update(id, &changes),
        )
        .await
        {
            Ok(Some(updated)) => {
                saga.commit();
                updated
            }
            Ok(None) => {
                warn!(listing_id = %id, "listing vanished during update; compensating");
                saga.compensate().await;
                return Err(ListingError::NotFound(id));
            }
            Err(err) => {
                self.settle_failed_write(id, new_image.as_ref(), saga, err)
                    .await?
            }
        };

        if let (Some(new), Some(old)) = (&new_image, &current.image) {
            if new.remote_id != old.remote_id {
                if let Err(err) = self.delete_remote(&old.remote_id).await {
                    // The listing already points at the new image; the old
                    // object is left for the reconciliation sweep.
                    warn!(
                        listing_id = %id,
                        remote_id = %old.remote_id,
                        error = %err,
                        "failed to delete superseded media"
                    );
                }
            }
        }

        info!(
            listing_id = %id,
            image_replaced = new_image.is_some(),
            "listing updated"
        );
        Ok(updated)
    }

    /// Delete a listing and its remote image. The remote object goes first so
    /// a failure leaves the record in place for a retry.
    pub async fn delete(&self, id: Uuid) -> ListingResult<()> {
        let _guard = self.locks.lock(id).await;
        let current = self.find(id).await?;

        if let Some(image) = &current.image {
            self.delete_remote(&image.remote_id).await?;
        }

        let removed = timed(
            "listing delete",
            self.settings.db_timeout,
            self.repo.delete_by_id(id),
        )
        .await?;
        if !removed {
            return Err(ListingError::NotFound(id));
        }

        info!(listing_id = %id, "listing deleted");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> ListingResult<Listing> {
        self.find(id).await
    }

    pub async fn list(&self, filter: &ListingFilter) -> ListingResult<Vec<Listing>> {
        timed("listing query", self.settings.db_timeout, self.repo.list(filter)).await
    }

    pub async fn add_favorite(&self, id: Uuid, user: Uuid) -> ListingResult<Listing> {
        let _guard = self.locks.lock(id).await;
        let found = timed(
            "favorite insert",
            self.settings.db_timeout,
            self.repo.add_favorite(id, user),
        )
        .await?;
        if !found {
            return Err(ListingError::NotFound(id));
        }
        self.find(id).await
    }

    pub async fn remove_favorite(&self, id: Uuid, user: Uuid) -> ListingResult<Listing> {
        let _guard = self.locks.lock(id).await;
        let found = timed(
            "favorite delete",
            self.settings.db_timeout,
            self.repo.remove_favorite(id, user),
        )
        .await?;
        if !found {
            return Err(ListingError::NotFound(id));
        }
        self.find(id).await
    }
}
