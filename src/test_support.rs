//! Shared fixtures for unit tests: an in-memory database, a recording media
//! store and a repository that can be told to fail.

use crate::{
    db,
    models::{
        listing::{Listing, ListingChanges, ListingFields, ListingFilter, MediaReference},
        media::{DeleteOutcome, ImageFormat, RemoteObject, StagedFile, UploadOptions},
    },
    services::{
        listing_repository::{ListingRepository, RepositoryError, RepositoryResult, SqliteListingRepository},
        media_store::{MediaResult, MediaStore, MediaStoreError},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    io::Write,
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

/// Single-connection in-memory pool with the schema applied.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

/// Write `bytes` to a temporary file under `dir` and wrap it as staged upload.
pub fn staged_file(dir: &Path, filename: &str, bytes: &[u8]) -> StagedFile {
    let mut file = tempfile::NamedTempFile::new_in(dir).expect("temp file");
    file.write_all(bytes).expect("write temp file");
    let format = ImageFormat::detect(filename, None).expect("allowed image extension");
    StagedFile::new(
        file.into_temp_path(),
        filename.to_string(),
        format,
        bytes.len() as u64,
    )
}

pub fn main_street() -> ListingFields {
    ListingFields {
        street_address: Some("1 Main St".into()),
        city: Some("Springfield".into()),
        price: Some(250000.0),
        size: Some(1200.0),
        owner: None,
    }
}

/// Media store that records every call and keeps objects in memory.
#[derive(Default)]
pub struct StubMediaStore {
    objects: Mutex<BTreeMap<String, DateTime<Utc>>>,
    scripted: Mutex<VecDeque<MediaReference>>,
    uploads: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    uploaded_paths: Mutex<Vec<std::path::PathBuf>>,
    counter: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl StubMediaStore {
    /// The next upload returns exactly this reference.
    pub fn script(&self, url: &str, remote_id: &str) {
        self.scripted.lock().unwrap().push_back(MediaReference {
            url: url.into(),
            remote_id: remote_id.into(),
        });
    }

    /// Pretend an object already exists remotely.
    pub fn seed(&self, remote_id: &str) {
        self.seed_at(remote_id, Utc::now());
    }

    pub fn seed_at(&self, remote_id: &str, created_at: DateTime<Utc>) {
        self.objects
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), created_at);
    }

    /// Drop an object behind the service's back.
    pub fn forget(&self, remote_id: &str) {
        self.objects.lock().unwrap().remove(remote_id);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Original filenames of every attempted upload.
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    /// Staged paths seen by uploads, to check temp file cleanup.
    pub fn uploaded_paths(&self) -> Vec<std::path::PathBuf> {
        self.uploaded_paths.lock().unwrap().clone()
    }

    /// Remote ids of every attempted delete, in call order.
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.objects.lock().unwrap().contains_key(remote_id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaStore for StubMediaStore {
    async fn upload(&self, file: &StagedFile, options: &UploadOptions) -> MediaResult<MediaReference> {
        self.uploads
            .lock()
            .unwrap()
            .push(file.original_filename.clone());
        self.uploaded_paths
            .lock()
            .unwrap()
            .push(file.path().to_path_buf());
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(MediaStoreError::UploadFailed("stub upload failure".into()));
        }

        let reference = self.scripted.lock().unwrap().pop_front().unwrap_or_else(|| {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let remote_id = format!("{}/stub-{}", options.folder, n);
            MediaReference {
                url: format!("https://cdn.example/{}.{}", remote_id, file.format.extension()),
                remote_id,
            }
        });
        self.seed(&reference.remote_id);
        Ok(reference)
    }

    async fn delete(&self, remote_id: &str) -> MediaResult<DeleteOutcome> {
        self.deletes.lock().unwrap().push(remote_id.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(MediaStoreError::DeleteFailed {
                remote_id: remote_id.to_string(),
                reason: "stub delete failure".into(),
            });
        }
        match self.objects.lock().unwrap().remove(remote_id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn list(&self, folder: &str) -> MediaResult<Vec<RemoteObject>> {
        let prefix = format!("{}/", folder.trim_matches('/'));
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id.starts_with(&prefix))
            .map(|(id, created_at)| RemoteObject {
                remote_id: id.clone(),
                created_at: *created_at,
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "stub"
    }
}

/// Repository wrapper whose writes can be switched to fail or slowed down,
/// and which counts every call it receives.
pub struct FlakyRepository {
    inner: SqliteListingRepository,
    fail_writes: AtomicBool,
    calls: AtomicUsize,
    /// Millis slept before a write reaches the database.
    write_stall_ms: AtomicU64,
    /// Millis slept after a write has committed.
    write_lag_ms: AtomicU64,
    /// Millis slept before a read.
    read_stall_ms: AtomicU64,
}

impl FlakyRepository {
    pub fn new(inner: SqliteListingRepository) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            write_stall_ms: AtomicU64::new(0),
            write_lag_ms: AtomicU64::new(0),
            read_stall_ms: AtomicU64::new(0),
        }
    }

    /// Writes hang for `delay` before touching the database.
    pub fn stall_writes(&self, delay: Duration) {
        self.write_stall_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Writes commit, then take `delay` longer to return.
    pub fn lag_after_commit(&self, delay: Duration) {
        self.write_lag_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn stall_reads(&self, delay: Duration) {
        self.read_stall_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn write_guard(&self) -> RepositoryResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Guard, stall, run the write, then lag.
    async fn write<T, F>(&self, op: F) -> RepositoryResult<T>
    where
        F: std::future::Future<Output = RepositoryResult<T>>,
    {
        self.touch();
        self.write_guard()?;
        pause(&self.write_stall_ms).await;
        let result = op.await;
        pause(&self.write_lag_ms).await;
        result
    }

    async fn read<T, F>(&self, op: F) -> RepositoryResult<T>
    where
        F: std::future::Future<Output = RepositoryResult<T>>,
    {
        self.touch();
        pause(&self.read_stall_ms).await;
        op.await
    }
}

async fn pause(millis: &AtomicU64) {
    let millis = millis.load(Ordering::SeqCst);
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[async_trait]
impl ListingRepository for FlakyRepository {
    async fn create(&self, listing: &Listing) -> RepositoryResult<Listing> {
        self.write(self.inner.create(listing)).await
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Listing>> {
        self.read(self.inner.find_by_id(id)).await
    }

    async fn update(&self, id: Uuid, changes: &ListingChanges) -> RepositoryResult<Option<Listing>> {
        self.write(self.inner.update(id, changes)).await
    }

    async fn delete_by_id(&self, id: Uuid) -> RepositoryResult<bool> {
        self.write(self.inner.delete_by_id(id)).await
    }

    async fn list(&self, filter: &ListingFilter) -> RepositoryResult<Vec<Listing>> {
        self.read(self.inner.list(filter)).await
    }

    async fn add_favorite(&self, id: Uuid, user: Uuid) -> RepositoryResult<bool> {
        self.write(self.inner.add_favorite(id, user)).await
    }

    async fn remove_favorite(&self, id: Uuid, user: Uuid) -> RepositoryResult<bool> {
        self.write(self.inner.remove_favorite(id, user)).await
    }

    async fn referenced_remote_ids(&self) -> RepositoryResult<HashSet<String>> {
        self.read(self.inner.referenced_remote_ids()).await
    }
}
