//! Errors which stop a stream pipeline.
//!
//! Transient failures (broker unavailable, a single failed storage write) are retried inside
//! the pipeline and never surface here. Everything in [PipelineError] is fatal for the stream
//! it occurred on, but leaves the other streams running.
use object_store::path::Path;
use thiserror::Error;
use tracing::error;

use crate::checkpoint::CheckpointError;
use crate::schema::UnknownStreamError;
use crate::sink::EncodeError;
use crate::storage::StorageError;
use crate::types::OffsetRange;

/// Fatal error of a single stream pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline was started for a stream without a schema
    #[error(transparent)]
    UnknownStream(#[from] UnknownStreamError),
    /// Writing a batch kept failing until the retry budget was used up
    #[error("Failed to write batch '{key}' after {attempts} attempts")]
    StorageWrite {
        /// Key of the batch object
        key: Path,
        /// Attempts made in total
        attempts: usize,
        /// Error of the last attempt
        #[source]
        source: StorageError,
    },
    /// Looking up previously written batches failed on startup
    #[error("Failed to list stored batches")]
    StorageList(#[source] StorageError),
    /// Loading or advancing the checkpoint failed
    #[error("Checkpoint store failed")]
    Checkpoint(#[from] CheckpointError),
    /// A sealed batch could not be converted to its columnar representation
    #[error("Failed to encode batch {range}")]
    Encode {
        /// Offsets covered by the batch
        range: OffsetRange,
        /// Underlying encoding error
        #[source]
        source: EncodeError,
    },
    /// The task running the pipeline panicked or was aborted
    #[error("Pipeline task did not complete")]
    Join(#[from] tokio::task::JoinError),
}

/// Turn a fatal pipeline error into a report with its full chain of causes and raise an
/// operator-visible alert for it.
pub(crate) fn alert_fatal(stream: &str, error: PipelineError) -> eyre::Report {
    let report = eyre::Report::new(error);
    error!("FATAL: stream '{stream}' stopped: {report:?}");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The report keeps the typed error and its cause chain
    #[test]
    fn report_keeps_error() {
        let error = PipelineError::StorageWrite {
            key: Path::from("data/gps_data/part-1"),
            attempts: 5,
            source: StorageError::ObjectStore(object_store::Error::NotImplemented),
        };
        let report = alert_fatal("gps_data", error);
        assert!(matches!(
            report.downcast_ref::<PipelineError>(),
            Some(PipelineError::StorageWrite { attempts: 5, .. })
        ));
        assert!(report.chain().count() >= 2);
    }
}
