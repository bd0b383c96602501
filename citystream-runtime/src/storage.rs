//! Resolving the storage root URL to an object store
use std::sync::Arc;

use citystream::storage::ObjectStorage;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use thiserror::Error;
use tracing::info;
use url::Url;

/// Errors resolving the storage root
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum StorageRootError {
    #[error("Invalid storage root URL '{0}'")]
    InvalidUrl(String, #[source] url::ParseError),
    #[error("Unsupported storage scheme '{0}', expected file, s3 or memory")]
    UnsupportedScheme(String),
    #[error("Storage root '{0}' is not a local path")]
    NotLocal(String),
    #[error("Invalid path in storage root: {0}")]
    InvalidPath(#[from] object_store::path::Error),
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Open the storage at `root`.
///
/// Supported are `file:///some/dir` (created if missing), `s3://bucket/prefix` (credentials and
/// region are read from the usual `AWS_*` environment variables) and `memory://` for trial
/// runs.
pub fn open_storage_root(root: &str) -> Result<ObjectStorage, StorageRootError> {
    let url = root
        .parse::<Url>()
        .map_err(|e| StorageRootError::InvalidUrl(root.to_owned(), e))?;
    let (store, prefix): (Arc<dyn ObjectStore>, Path) = match url.scheme() {
        "file" => {
            let dir = url
                .to_file_path()
                .map_err(|_| StorageRootError::NotLocal(root.to_owned()))?;
            std::fs::create_dir_all(&dir)?;
            (
                Arc::new(LocalFileSystem::new_with_prefix(dir)?),
                Path::default(),
            )
        }
        "s3" | "s3a" => {
            let store = AmazonS3Builder::from_env().with_url(url.as_str()).build()?;
            (Arc::new(store), Path::from_url_path(url.path())?)
        }
        "memory" => (Arc::new(InMemory::new()), Path::default()),
        other => return Err(StorageRootError::UnsupportedScheme(other.to_owned())),
    };
    info!("Storing data in {url}");
    Ok(ObjectStorage::new(store, prefix))
}
