//! Durable storage for sealed batches and checkpoints.
//!
//! Storage is addressed by keys relative to a storage root. Writes must be all-or-nothing
//! (readers never observe a partially written object) and overwrite-safe, which every
//! [ObjectStore] guarantees for single `put` calls.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{path::Path, ObjectStore, PutPayload};
use thiserror::Error;

use crate::types::OffsetRange;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error from the underlying object store
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
}

/// Object storage as used by the sink writer and the checkpoint store
#[async_trait]
pub trait DurableStorage: Send + Sync + 'static {
    /// Atomically create or replace the object at `key`
    async fn write_object(&self, key: &Path, bytes: Bytes) -> Result<(), StorageError>;
    /// Read the object at `key`, returning `None` if it does not exist
    async fn read_object(&self, key: &Path) -> Result<Option<Bytes>, StorageError>;
    /// List the keys of all objects below `prefix`
    async fn list(&self, prefix: &Path) -> Result<Vec<Path>, StorageError>;
}

/// [DurableStorage] on top of any [ObjectStore], e.g. S3 or a local directory
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    root: Path,
}

impl ObjectStorage {
    /// Store all objects below `root` in `store`
    pub fn new(store: Arc<dyn ObjectStore>, root: Path) -> Self {
        Self { store, root }
    }

    fn absolute(&self, key: &Path) -> Path {
        self.root.parts().chain(key.parts()).collect()
    }
}

#[async_trait]
impl DurableStorage for ObjectStorage {
    async fn write_object(&self, key: &Path, bytes: Bytes) -> Result<(), StorageError> {
        self.store
            .put(&self.absolute(key), PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    async fn read_object(&self, key: &Path) -> Result<Option<Bytes>, StorageError> {
        match self.store.get(&self.absolute(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<Path>, StorageError> {
        let objects: Vec<_> = self
            .store
            .list(Some(&self.absolute(prefix)))
            .try_collect()
            .await?;
        Ok(objects
            .into_iter()
            .filter_map(|meta| {
                meta.location
                    .prefix_match(&self.root)
                    .map(|parts| parts.collect())
            })
            .collect())
    }
}

/// Prefix below which all batches of a stream are stored
pub fn batch_prefix(stream: &str) -> Path {
    Path::from_iter(["data", stream])
}

/// Key of the batch covering `range`. The key depends only on the stream and the range, so
/// rewriting the same range overwrites the same object.
pub fn batch_key(stream: &str, range: OffsetRange) -> Path {
    let file_name = format!("part-{:020}-{:020}.parquet", range.start, range.end);
    Path::from_iter(["data", stream, file_name.as_str()])
}

/// Recover the offset range from a key created by [batch_key]
pub fn parse_batch_key(key: &Path) -> Option<OffsetRange> {
    let (start, end) = key
        .filename()?
        .strip_prefix("part-")?
        .strip_suffix(".parquet")?
        .split_once('-')?;
    Some(OffsetRange::new(start.parse().ok()?, end.parse().ok()?))
}

/// Key of the checkpoint of a stream
pub fn checkpoint_key(stream: &str) -> Path {
    Path::from_iter(["checkpoints", stream])
}
