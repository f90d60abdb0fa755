//! src/services/local_store.rs
//!
//! LocalMediaStore: a disk-backed [`MediaStore`]. Objects are sharded beneath
//! `base_path/{folder}/{shard}/{shard}/{uuid}.{ext}` and served back by this
//! service under `base_url`.

use crate::{
    models::{
        listing::MediaReference,
        media::{DeleteOutcome, ImageFormat, RemoteObject, StagedFile, UploadOptions},
    },
    services::media_store::{MediaResult, MediaStore, MediaStoreError},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_REMOTE_ID_LEN: usize = 512;

/// An opened stored object, ready to be streamed out.
pub struct StoredMedia {
    pub file: File,
    pub format: ImageFormat,
    pub size_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct LocalMediaStore {
    /// Base directory on disk where media payloads are stored.
    base_path: PathBuf,

    /// Public URL prefix under which `base_path` is served.
    base_url: String,
}

impl LocalMediaStore {
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
        }
    }

    /// Reject ids that could escape `base_path`.
    fn ensure_remote_id_safe(remote_id: &str) -> MediaResult<()> {
        let invalid = remote_id.is_empty()
            || remote_id.len() > MAX_REMOTE_ID_LEN
            || remote_id.starts_with('/')
            || remote_id.ends_with('/')
            || remote_id.contains("//")
            || remote_id
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'.');
        if invalid {
            return Err(MediaStoreError::InvalidRemoteId(remote_id.to_string()));
        }
        Ok(())
    }

    /// Two-level shard directories taken from MD5(remote_id).
    fn object_shards(remote_id: &str) -> (String, String) {
        let digest = md5::compute(remote_id);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Split `folder/name` into its folder (possibly empty) and name parts.
    fn split_remote_id(remote_id: &str) -> (&str, &str) {
        match remote_id.rsplit_once('/') {
            Some((folder, name)) => (folder, name),
            None => ("", remote_id),
        }
    }

    fn folder_root(&self, folder: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        if !folder.is_empty() {
            path.push(folder);
        }
        path
    }

    fn object_path(&self, remote_id: &str, format: ImageFormat) -> PathBuf {
        let (folder, name) = Self::split_remote_id(remote_id);
        let (shard_a, shard_b) = Self::object_shards(remote_id);
        let mut path = self.folder_root(folder);
        path.push(shard_a);
        path.push(shard_b);
        path.push(format!("{}.{}", name, format.extension()));
        path
    }

    fn public_url(&self, remote_id: &str, format: ImageFormat) -> String {
        format!(
            "{}/{}.{}",
            self.base_url.trim_end_matches('/'),
            remote_id,
            format.extension()
        )
    }

    /// Open a stored object by its public key (`{remote_id}.{ext}`).
    pub async fn open(&self, key: &str) -> MediaResult<Option<StoredMedia>> {
        let Some((remote_id, ext)) = key.rsplit_once('.') else {
            return Ok(None);
        };
        let Some(format) = ImageFormat::from_extension(ext) else {
            return Ok(None);
        };
        if Self::ensure_remote_id_safe(remote_id).is_err() {
            return Ok(None);
        }

        let path = self.object_path(remote_id, format);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let size_bytes = file.metadata().await?.len();

        Ok(Some(StoredMedia {
            file,
            format,
            size_bytes,
        }))
    }

    /// Remove empty shard directories up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    /// Copies the staged file into a temporary sibling, fsyncs it and renames
    /// it into place, removing the temporary file on any error.
    async fn upload(&self, file: &StagedFile, options: &UploadOptions) -> MediaResult<MediaReference> {
        let folder = options.folder.trim_matches('/');
        let remote_id = if folder.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}/{}", folder, Uuid::new_v4())
        };
        Self::ensure_remote_id_safe(&remote_id)?;

        let file_path = self.object_path(&remote_id, file.format);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            MediaStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut source = File::open(file.path()).await?;
            let mut target = File::create(&tmp_path).await?;
            tokio::io::copy(&mut source, &mut target).await?;
            target.flush().await?;
            target.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaStoreError::UploadFailed(format!(
                "writing {}: {}",
                file_path.display(),
                err
            )));
        }

        debug!(
            remote_id = %remote_id,
            path = %file_path.display(),
            size_bytes = file.size_bytes,
            "stored media object on local disk"
        );

        Ok(MediaReference {
            url: self.public_url(&remote_id, file.format),
            remote_id,
        })
    }

    async fn delete(&self, remote_id: &str) -> MediaResult<DeleteOutcome> {
        Self::ensure_remote_id_safe(remote_id)?;
        let (folder, _) = Self::split_remote_id(remote_id);
        let folder_root = self.folder_root(folder);

        let mut outcome = DeleteOutcome::NotFound;
        for format in ImageFormat::ALL {
            let file_path = self.object_path(remote_id, format);
            match fs::remove_file(&file_path).await {
                Ok(_) => {
                    debug!("removed media file {}", file_path.display());
                    outcome = DeleteOutcome::Deleted;
                    if let Some(parent) = file_path.parent() {
                        self.prune_empty_dirs(parent, &folder_root).await;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(MediaStoreError::DeleteFailed {
                        remote_id: remote_id.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }

    async fn list(&self, folder: &str) -> MediaResult<Vec<RemoteObject>> {
        let folder = folder.trim_matches('/');
        let root = self.folder_root(folder);
        let mut objects = Vec::new();

        let mut shard_dirs = vec![root];
        // Two shard levels, then the object files themselves.
        for _ in 0..2 {
            let mut next = Vec::new();
            for dir in shard_dirs {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => {
                        return Err(MediaStoreError::ListFailed {
                            folder: folder.to_string(),
                            reason: err.to_string(),
                        });
                    }
                };
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name();
                    let is_shard = name.len() == 2
                        && name.to_str().is_some_and(|n| n.bytes().all(|b| b.is_ascii_hexdigit()));
                    if is_shard && entry.file_type().await?.is_dir() {
                        next.push(entry.path());
                    }
                }
            }
            shard_dirs = next;
        }

        for dir in shard_dirs {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if stem.starts_with(".tmp-") || !entry.file_type().await?.is_file() {
                    continue;
                }
                let modified = entry.metadata().await?.modified()?;
                let remote_id = if folder.is_empty() {
                    stem.to_string()
                } else {
                    format!("{}/{}", folder, stem)
                };
                objects.push(RemoteObject {
                    remote_id,
                    created_at: DateTime::<Utc>::from(modified),
                });
            }
        }

        objects.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(objects)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
