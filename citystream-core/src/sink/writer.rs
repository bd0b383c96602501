use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use backon::Retryable;
use object_store::path::Path;
use tracing::{info, warn};

use super::columnar::encode_parquet;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::RetryPolicy;
use crate::errorhandling::PipelineError;
use crate::schema::StreamDefinition;
use crate::storage::{batch_key, batch_prefix, parse_batch_key, DurableStorage};
use crate::types::{Batch, EventTime, Offset, OffsetRange};

/// Result of committing one batch
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointAdvance {
    /// Offsets now covered by the checkpoint
    pub range: OffsetRange,
    /// Key of the written object, `None` if the batch held no records
    pub key: Option<Path>,
    /// Number of records written
    pub records: usize,
}

/// Persists sealed batches of one stream and advances its checkpoint.
///
/// A batch is written under a key derived from its offset range. Only once the write
/// succeeded is the checkpoint moved to the end of the range, so a crash between the two
/// leaves an object which the next run overwrites with identical content.
pub struct SinkWriter {
    definition: StreamDefinition,
    storage: Arc<dyn DurableStorage>,
    checkpoints: Arc<dyn CheckpointStore>,
    retry: RetryPolicy,
    committed: Offset,
}

impl SinkWriter {
    /// Create a writer for a stream whose checkpoint currently stands at `committed`
    pub fn new(
        definition: StreamDefinition,
        storage: Arc<dyn DurableStorage>,
        checkpoints: Arc<dyn CheckpointStore>,
        retry: RetryPolicy,
        committed: Offset,
    ) -> Self {
        Self {
            definition,
            storage,
            checkpoints,
            retry,
            committed,
        }
    }

    /// Offset the checkpoint currently stands at
    pub fn committed(&self) -> Offset {
        self.committed
    }

    /// Find a batch which was written starting at the committed offset without the
    /// checkpoint being advanced afterwards.
    pub async fn pending_range(&self) -> Result<Option<OffsetRange>, PipelineError> {
        let keys = self
            .storage
            .list(&batch_prefix(&self.definition.name))
            .await
            .map_err(PipelineError::StorageList)?;
        Ok(keys
            .iter()
            .filter_map(parse_batch_key)
            .filter(|r| r.start == self.committed && !r.is_empty())
            .max_by_key(|r| r.end))
    }

    /// Durably store `batch` and advance the checkpoint to its end.
    ///
    /// `max_event_time` is the largest event time observed up to the end of the batch and is
    /// persisted with the checkpoint.
    pub async fn commit(
        &mut self,
        batch: &Batch,
        max_event_time: Option<EventTime>,
    ) -> Result<CheckpointAdvance, PipelineError> {
        let range = batch.range();
        debug_assert_eq!(range.start, self.committed, "batches must be contiguous");

        let key = if batch.is_empty() {
            None
        } else {
            let key = batch_key(&self.definition.name, range);
            self.write_with_retry(&key, batch).await?;
            Some(key)
        };

        self.checkpoints
            .set_checkpoint(
                &self.definition.name,
                Checkpoint {
                    offset: range.end,
                    max_event_time,
                },
            )
            .await?;
        self.committed = range.end;
        info!(
            "Committed {} records for offsets {range}, checkpoint at {}",
            batch.len(),
            range.end
        );
        Ok(CheckpointAdvance {
            range,
            key,
            records: batch.len(),
        })
    }

    async fn write_with_retry(&self, key: &Path, batch: &Batch) -> Result<(), PipelineError> {
        let encoded = encode_parquet(&self.definition, batch.records()).map_err(|source| {
            PipelineError::Encode {
                range: batch.range(),
                source,
            }
        })?;
        let storage = &self.storage;
        let encoded = &encoded;
        let attempts = AtomicUsize::new(0);
        let attempts_ref = &attempts;

        (|| async move {
            attempts_ref.fetch_add(1, Ordering::Relaxed);
            storage.write_object(key, encoded.clone()).await
        })
        .retry(self.retry.storage_backoff())
        .notify(|err, delay| warn!("Writing '{key}' failed, retrying in {delay:?}: {err}"))
        .await
        .map_err(|source| PipelineError::StorageWrite {
            key: key.clone(),
            attempts: attempts.load(Ordering::Relaxed),
            source,
        })
    }
}
