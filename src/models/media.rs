//! Files on their way to the remote media store, and what the store hands back.

use chrono::{DateTime, Utc};
use std::path::Path;
use tempfile::TempPath;

/// Image formats accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 2] = [ImageFormat::Jpeg, ImageFormat::Png];

    /// Map a filename extension from the allow-list (`jpg`, `jpeg`, `png`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    /// Detect the format of an uploaded file from its name and declared MIME
    /// type. Both must agree with the allow-list; a missing MIME type defers
    /// to the extension.
    pub fn detect(filename: &str, mime_type: Option<&str>) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?;
        let format = Self::from_extension(ext)?;
        match mime_type {
            None => Some(format),
            Some(mime) if mime.eq_ignore_ascii_case(format.mime_type()) => Some(format),
            Some(mime) if format == Self::Jpeg && mime.eq_ignore_ascii_case("image/jpg") => {
                Some(format)
            }
            Some(_) => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// A file already received and written to a temporary local location.
///
/// The temporary file is removed when the value is dropped, whether or not
/// the upload that consumed it succeeded.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    pub original_filename: String,
    pub format: ImageFormat,
    pub size_bytes: u64,
}

impl StagedFile {
    pub fn new(path: TempPath, original_filename: String, format: ImageFormat, size_bytes: u64) -> Self {
        Self {
            path,
            original_filename,
            format,
            size_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Options for a single upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Folder (namespace) the object is stored under.
    pub folder: String,
}

/// Result of deleting a remote object. Both outcomes leave the object gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// An object found while enumerating a folder of the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub remote_id: String,
    pub created_at: DateTime<Utc>,
}
