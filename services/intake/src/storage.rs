//! Object storage collaborator.
//!
//! The pipeline only knows the [`ObjectFetcher`] contract: give it a bucket
//! and key, get back a local file and its size. Whatever it hands back is
//! adopted into a [`LocalAsset`], which removes the file when dropped.

use crate::config::{StorageBackend, StorageConfig};
use crate::outcome::FailureKind;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client as S3Client;
use metrics::counter;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("Access denied to s3://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("Object exceeds {limit_bytes} byte download limit")]
    TooLarge { limit_bytes: u64 },

    #[error("Storage transport error: {0}")]
    Transport(String),

    #[error("Local I/O error during download: {0}")]
    Io(#[from] io::Error),
}

impl AcquisitionError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AcquisitionError::TooLarge { .. } => FailureKind::OversizedFile,
            AcquisitionError::NotFound { .. }
            | AcquisitionError::AccessDenied { .. }
            | AcquisitionError::Transport(_)
            | AcquisitionError::Io(_) => FailureKind::AcquisitionFailed,
        }
    }
}

/// A file the fetcher placed on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Storage collaborator contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// Download `bucket/key` to a local file owned by the caller.
    async fn fetch(&self, bucket: &str, key: &str) -> Result<FetchedObject, AcquisitionError>;
}

/// Exclusively owned local copy of a fetched object.
///
/// The file is removed when the asset is dropped, so every exit path of the
/// code holding it (including a cancelled future) releases the disk space.
#[derive(Debug)]
pub struct LocalAsset {
    path: PathBuf,
    size_bytes: u64,
    released: bool,
}

impl LocalAsset {
    pub fn adopt(fetched: FetchedObject) -> Self {
        Self {
            path: fetched.path,
            size_bytes: fetched.size_bytes,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Remove the file now and report the result instead of logging it.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_if_exists(&self.path)
    }

    /// Give up ownership without removing the file.
    fn persist(mut self) -> FetchedObject {
        self.released = true;
        FetchedObject {
            path: std::mem::take(&mut self.path),
            size_bytes: self.size_bytes,
        }
    }
}

impl Drop for LocalAsset {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove local asset");
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Unique scratch path for a download, keeping the key's file name readable.
fn scratch_path(download_dir: &Path, key: &str) -> PathBuf {
    let basename = key.rsplit('/').next().unwrap_or(key);
    download_dir.join(format!("{}_{}", Uuid::new_v4(), sanitize_file_name(basename)))
}

/// Restrict a file name to characters safe on any filesystem.
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    if sanitized.is_empty() {
        "object".to_string()
    } else {
        sanitized
    }
}

/// Fetcher selected by `storage.backend`.
pub async fn build_fetcher(
    config: &StorageConfig,
    download_dir: PathBuf,
    max_object_bytes: u64,
) -> anyhow::Result<Arc<dyn ObjectFetcher>> {
    tokio::fs::create_dir_all(&download_dir).await?;

    let fetcher: Arc<dyn ObjectFetcher> = match config.backend {
        StorageBackend::S3 => {
            Arc::new(S3Fetcher::new(config, download_dir, max_object_bytes).await?)
        }
        StorageBackend::Filesystem => {
            let root = config
                .local_root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.local_root is required"))?;
            Arc::new(FilesystemFetcher::new(root, download_dir, max_object_bytes))
        }
    };
    Ok(fetcher)
}

/// Streams objects out of S3 (or an S3-compatible endpoint).
pub struct S3Fetcher {
    client: S3Client,
    download_dir: PathBuf,
    max_object_bytes: u64,
}

impl S3Fetcher {
    pub async fn new(
        config: &StorageConfig,
        download_dir: PathBuf,
        max_object_bytes: u64,
    ) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // MinIO / LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = %config.region,
            download_dir = %download_dir.display(),
            max_object_bytes,
            "S3 fetcher initialized"
        );

        Ok(Self::with_client(client, download_dir, max_object_bytes))
    }

    pub fn with_client(client: S3Client, download_dir: PathBuf, max_object_bytes: u64) -> Self {
        Self {
            client,
            download_dir,
            max_object_bytes,
        }
    }
}

#[async_trait]
impl ObjectFetcher for S3Fetcher {
    #[instrument(skip_all, fields(bucket = %bucket, key = %key))]
    async fn fetch(&self, bucket: &str, key: &str) -> Result<FetchedObject, AcquisitionError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_get_object_error(bucket, key, e))?;

        if let Some(length) = output.content_length() {
            if length > 0 && length as u64 > self.max_object_bytes {
                return Err(AcquisitionError::TooLarge {
                    limit_bytes: self.max_object_bytes,
                });
            }
        }

        let path = scratch_path(&self.download_dir, key);
        let mut file = tokio::fs::File::create(&path).await?;
        let partial = LocalAsset::adopt(FetchedObject {
            path: path.clone(),
            size_bytes: 0,
        });

        let mut body = output.body;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| AcquisitionError::Transport(e.to_string()))?
        {
            written += chunk.len() as u64;
            if written > self.max_object_bytes {
                return Err(AcquisitionError::TooLarge {
                    limit_bytes: self.max_object_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        counter!("intake.bytes.downloaded").increment(written);
        debug!(path = %path.display(), size_bytes = written, "Object downloaded");

        let mut fetched = partial.persist();
        fetched.size_bytes = written;
        Ok(fetched)
    }
}

fn classify_get_object_error(
    bucket: &str,
    key: &str,
    err: SdkError<GetObjectError>,
) -> AcquisitionError {
    if let SdkError::ServiceError(ref context) = err {
        let service_err = context.err();
        if service_err.is_no_such_key() {
            return AcquisitionError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            };
        }
        match service_err.code() {
            Some("NoSuchKey") | Some("NoSuchBucket") | Some("NotFound") => {
                return AcquisitionError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                };
            }
            Some("AccessDenied") | Some("Forbidden") => {
                return AcquisitionError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                };
            }
            _ => {}
        }
    }
    AcquisitionError::Transport(DisplayErrorContext(&err).to_string())
}

/// Serves objects from `{root}/{bucket}/{key}` on local disk.
pub struct FilesystemFetcher {
    root: PathBuf,
    download_dir: PathBuf,
    max_object_bytes: u64,
}

impl FilesystemFetcher {
    pub fn new(root: PathBuf, download_dir: PathBuf, max_object_bytes: u64) -> Self {
        Self {
            root,
            download_dir,
            max_object_bytes,
        }
    }

    fn resolve(&self, bucket: &str, key: &str) -> Option<PathBuf> {
        let is_plain = |s: &str| {
            !s.is_empty()
                && Path::new(s)
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
        };
        (is_plain(bucket) && is_plain(key)).then(|| self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectFetcher for FilesystemFetcher {
    #[instrument(skip_all, fields(bucket = %bucket, key = %key))]
    async fn fetch(&self, bucket: &str, key: &str) -> Result<FetchedObject, AcquisitionError> {
        let not_found = || AcquisitionError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let source = self.resolve(bucket, key).ok_or_else(not_found)?;
        let metadata = match tokio::fs::metadata(&source).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(AcquisitionError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.len() > self.max_object_bytes {
            return Err(AcquisitionError::TooLarge {
                limit_bytes: self.max_object_bytes,
            });
        }

        let path = scratch_path(&self.download_dir, key);
        let partial = LocalAsset::adopt(FetchedObject {
            path: path.clone(),
            size_bytes: 0,
        });
        let size_bytes = tokio::fs::copy(&source, &path).await?;

        counter!("intake.bytes.downloaded").increment(size_bytes);
        debug!(path = %path.display(), size_bytes, "Object copied from local storage");

        let mut fetched = partial.persist();
        fetched.size_bytes = size_bytes;
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_object(root: &Path, bucket: &str, key: &str, contents: &[u8]) {
        let path = root.join(bucket).join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_local_asset_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"data").unwrap();

        let asset = LocalAsset::adopt(FetchedObject {
            path: path.clone(),
            size_bytes: 4,
        });
        assert_eq!(asset.size_bytes(), 4);
        drop(asset);

        assert!(!path.exists());
    }

    #[test]
    fn test_local_asset_release_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let asset = LocalAsset::adopt(FetchedObject {
            path: dir.path().join("gone.mp4"),
            size_bytes: 0,
        });
        assert!(asset.release().is_ok());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("squat.mp4"), "squat.mp4");
        assert_eq!(sanitize_file_name("my video.mp4"), "my_video.mp4");
        assert_eq!(sanitize_file_name("a:b?.mp4"), "a_b_.mp4");
        assert_eq!(sanitize_file_name(""), "object");
    }

    #[test]
    fn test_scratch_paths_are_unique() {
        let dir = Path::new("/tmp/intake");
        let a = scratch_path(dir, "uploads/squat.mp4");
        let b = scratch_path(dir, "uploads/squat.mp4");

        assert_ne!(a, b);
        assert!(a.starts_with(dir));
        assert!(a.to_string_lossy().ends_with("_squat.mp4"));
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            AcquisitionError::Transport("reset".into()).failure_kind(),
            FailureKind::AcquisitionFailed
        );
        assert_eq!(
            AcquisitionError::TooLarge { limit_bytes: 1 }.failure_kind(),
            FailureKind::OversizedFile
        );
    }

    #[tokio::test]
    async fn test_filesystem_fetch_copies_object() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        write_object(root.path(), "uploads", "user/squat.mp4", b"0123456789");

        let fetcher =
            FilesystemFetcher::new(root.path().to_path_buf(), downloads.path().to_path_buf(), 1024);
        let fetched = fetcher.fetch("uploads", "user/squat.mp4").await.unwrap();

        assert_eq!(fetched.size_bytes, 10);
        assert!(fetched.path.starts_with(downloads.path()));
        assert_eq!(std::fs::read(&fetched.path).unwrap(), b"0123456789");
        // source is left untouched
        assert!(root.path().join("uploads/user/squat.mp4").exists());
    }

    #[tokio::test]
    async fn test_filesystem_fetch_missing_object() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let fetcher =
            FilesystemFetcher::new(root.path().to_path_buf(), downloads.path().to_path_buf(), 1024);

        let err = fetcher.fetch("uploads", "nope.mp4").await.unwrap_err();
        assert!(matches!(err, AcquisitionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_filesystem_fetch_rejects_traversal() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        write_object(root.path(), "other", "secret.mp4", b"x");
        let fetcher =
            FilesystemFetcher::new(root.path().to_path_buf(), downloads.path().to_path_buf(), 1024);

        let err = fetcher
            .fetch("uploads", "../other/secret.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::NotFound { .. }));
        assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_filesystem_fetch_enforces_limit() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        write_object(root.path(), "uploads", "big.mp4", &[0u8; 64]);
        let fetcher =
            FilesystemFetcher::new(root.path().to_path_buf(), downloads.path().to_path_buf(), 32);

        let err = fetcher.fetch("uploads", "big.mp4").await.unwrap_err();
        assert!(matches!(err, AcquisitionError::TooLarge { limit_bytes: 32 }));
        assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);
    }
}
