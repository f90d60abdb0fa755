//! Remote media store abstraction.
//!
//! Every backend (local disk, Cloudinary) implements [`MediaStore`] so the
//! listing service never depends on where image bytes actually live.

use crate::models::{
    listing::MediaReference,
    media::{DeleteOutcome, RemoteObject, StagedFile, UploadOptions},
};
use async_trait::async_trait;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("delete of `{remote_id}` failed: {reason}")]
    DeleteFailed { remote_id: String, reason: String },
    #[error("listing folder `{folder}` failed: {reason}")]
    ListFailed { folder: String, reason: String },
    #[error("invalid remote id `{0}`")]
    InvalidRemoteId(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type MediaResult<T> = Result<T, MediaStoreError>;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store a staged file and return the reference addressing it.
    async fn upload(&self, file: &StagedFile, options: &UploadOptions) -> MediaResult<MediaReference>;

    /// Delete an object. An object that is already gone yields
    /// [`DeleteOutcome::NotFound`], never an error.
    async fn delete(&self, remote_id: &str) -> MediaResult<DeleteOutcome>;

    /// Enumerate every object stored under `folder`.
    async fn list(&self, folder: &str) -> MediaResult<Vec<RemoteObject>>;

    /// Short backend name for logs and readiness output.
    fn backend_name(&self) -> &'static str;
}
