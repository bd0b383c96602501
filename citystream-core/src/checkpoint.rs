//! Persisted per-stream progress.
//!
//! A checkpoint records the end offset of the last batch which was durably stored, together
//! with the largest event time observed up to that offset. Checkpoints only ever move forward.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::storage::{checkpoint_key, DurableStorage, StorageError};
use crate::types::{EventTime, Offset};

/// Progress of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// First offset not yet accounted for
    pub offset: Offset,
    /// Largest event time observed below `offset`
    pub max_event_time: Option<EventTime>,
}

/// Errors reading or writing checkpoints
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Error accessing checkpoint storage")]
    Storage(#[from] StorageError),
    #[error("Checkpoint of stream '{0}' is corrupt or incompatible")]
    Decoding(String, #[source] rmp_serde::decode::Error),
    #[error("Error encoding checkpoint")]
    Encoding(#[from] rmp_serde::encode::Error),
    #[error("Refusing to move checkpoint of stream '{stream}' back from {persisted} to {requested}")]
    Regression {
        stream: String,
        persisted: Offset,
        requested: Offset,
    },
}

/// Storage for per-stream checkpoints. Every update of a single stream's checkpoint must be
/// atomic.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Load the checkpoint of `stream`, `None` if the stream was never checkpointed
    async fn get_checkpoint(&self, stream: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replace the checkpoint of `stream`. Implementations must reject checkpoints with an
    /// offset lower than the one persisted.
    async fn set_checkpoint(&self, stream: &str, checkpoint: Checkpoint)
        -> Result<(), CheckpointError>;
}

/// Checkpoints stored as single MessagePack objects in [DurableStorage]
pub struct StorageCheckpoints {
    storage: Arc<dyn DurableStorage>,
    // last known offset per stream
    persisted: Mutex<HashMap<String, Offset>>,
}

impl StorageCheckpoints {
    /// Keep checkpoints in the given storage
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            storage,
            persisted: Mutex::default(),
        }
    }

    fn remember(&self, stream: &str, offset: Offset) {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream.to_owned(), offset);
    }

    fn known(&self, stream: &str) -> Option<Offset> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .copied()
    }
}

#[async_trait]
impl CheckpointStore for StorageCheckpoints {
    async fn get_checkpoint(&self, stream: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(raw) = self.storage.read_object(&checkpoint_key(stream)).await? else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = rmp_serde::from_slice(&raw)
            .map_err(|e| CheckpointError::Decoding(stream.to_owned(), e))?;
        self.remember(stream, checkpoint.offset);
        Ok(Some(checkpoint))
    }

    async fn set_checkpoint(
        &self,
        stream: &str,
        checkpoint: Checkpoint,
    ) -> Result<(), CheckpointError> {
        let persisted = match self.known(stream) {
            Some(offset) => Some(offset),
            None => self.get_checkpoint(stream).await?.map(|c| c.offset),
        };
        if let Some(persisted) = persisted.filter(|p| *p > checkpoint.offset) {
            return Err(CheckpointError::Regression {
                stream: stream.to_owned(),
                persisted,
                requested: checkpoint.offset,
            });
        }
        let encoded = rmp_serde::to_vec(&checkpoint)?;
        self.storage
            .write_object(&checkpoint_key(stream), Bytes::from(encoded))
            .await?;
        debug!("Checkpoint of '{stream}' now at offset {}", checkpoint.offset);
        self.remember(stream, checkpoint.offset);
        Ok(())
    }
}
