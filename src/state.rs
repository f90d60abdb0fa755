//! Shared state handed to every handler.

use crate::services::{
    listing_service::ListingService, local_store::LocalMediaStore,
    reconcile_service::Reconciler,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

/// Where and how large incoming uploads may be staged.
#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub dir: PathBuf,
    pub max_bytes: u64,
}

#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite pool, used directly only by readiness checks.
    pub db: Arc<SqlitePool>,
    pub listings: ListingService,
    pub reconciler: Reconciler,
    pub uploads: UploadSettings,
    /// Present when images are stored on local disk and served by this process.
    pub local_media: Option<LocalMediaStore>,
}
