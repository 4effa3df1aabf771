//! Object storage for avatars, post images and therapist certificates.
//!
//! Objects live under `{bucket}/{user_id}/...` and are never overwritten;
//! every upload gets a fresh timestamped name. Public URLs point at the
//! `/storage` route that serves the same directory.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Avatars,
    Certificates,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Avatars => "avatars",
            Bucket::Certificates => "certificates",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            Bucket::Avatars => "jpg",
            Bucket::Certificates => "pdf",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Uploaded file is empty")]
    Empty,

    #[error("File exceeds the maximum size of {0} bytes")]
    TooLarge(usize),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Invalid object path")]
    InvalidPath,

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored object and where clients can fetch it
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredObject {
    pub bucket: &'static str,
    pub path: String,
    pub public_url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a new object; fails if `path` already exists in `bucket`
    async fn put(&self, bucket: Bucket, path: &str, data: &[u8]) -> Result<StoredObject, StorageError>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}

/// Extension taken from the client file name, falling back to the bucket default
pub fn file_extension(bucket: Bucket, file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext))
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| bucket.default_extension().to_string())
}

/// Avatars and post images must be images; certificates may also be PDFs
pub fn check_content_type(bucket: Bucket, extension: &str) -> Result<(), StorageError> {
    let mime = mime_guess::from_ext(extension).first_or_octet_stream();
    let allowed = match bucket {
        Bucket::Avatars => mime.type_() == mime_guess::mime::IMAGE,
        Bucket::Certificates => {
            mime.type_() == mime_guess::mime::IMAGE || mime.subtype() == mime_guess::mime::PDF
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(StorageError::UnsupportedType(mime.to_string()))
    }
}

/// `{user}/{user}-{millis}.{ext}`
pub fn avatar_path(user_id: &str, millis: i64, extension: &str) -> String {
    format!("{}/{}-{}.{}", user_id, user_id, millis, extension)
}

/// `{user}/certificate-{user}-{millis}.{ext}`
pub fn certificate_path(user_id: &str, millis: i64, extension: &str) -> String {
    format!("{}/certificate-{}-{}.{}", user_id, user_id, millis, extension)
}

/// Reject absolute paths and any `..` component
fn sanitize(path: &str) -> Result<PathBuf, StorageError> {
    let candidate = Path::new(path);
    if path.is_empty()
        || !candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidPath);
    }
    Ok(candidate.to_path_buf())
}

/// Blob store backed by a local directory
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bucket: Bucket, path: &str, data: &[u8]) -> Result<StoredObject, StorageError> {
        if data.is_empty() {
            return Err(StorageError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(StorageError::TooLarge(self.max_bytes));
        }

        let relative = sanitize(path)?;
        let full_path = self.root.join(bucket.as_str()).join(&relative);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(data).await?;
        file.flush().await?;

        info!(bucket = %bucket, path = path, bytes = data.len(), "Stored object");

        Ok(StoredObject {
            bucket: bucket.as_str(),
            path: path.to_string(),
            public_url: self.public_url(bucket, path),
        })
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/storage/{}/{}", self.public_base_url, bucket, path)
    }
}
