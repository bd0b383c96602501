//! The per-stream processing chain: read, decode, watermark, batch, store, checkpoint.
//!
//! Each stream runs in its own [StreamPipeline]. A pipeline owns all of its mutable state, so
//! streams never block or fail one another.
mod events;

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use events::{PipelineEvent, StreamReport};

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::errorhandling::PipelineError;
use crate::reader::{Decoded, MessageSource, ParseError, ReadEvent, StreamReader};
use crate::schema::StreamDefinition;
use crate::sink::{BatchAssembler, SinkWriter};
use crate::storage::DurableStorage;
use crate::types::{Batch, Offset};
use crate::watermark::{Lateness, WatermarkTracker};

/// Processing chain of a single stream
pub struct StreamPipeline {
    definition: StreamDefinition,
    topic: String,
    config: PipelineConfig,
    source: Arc<dyn MessageSource>,
    storage: Arc<dyn DurableStorage>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: flume::Sender<PipelineEvent>,
    shutdown: watch::Receiver<bool>,
}

/// Mutable state of a running pipeline
struct ChainState {
    tracker: WatermarkTracker,
    assembler: BatchAssembler,
    writer: SinkWriter,
    report: StreamReport,
}

impl StreamPipeline {
    /// Create the chain for `definition`. The pipeline stops once `shutdown` turns `true` or
    /// its sender is dropped.
    pub fn new(
        definition: StreamDefinition,
        config: PipelineConfig,
        source: Arc<dyn MessageSource>,
        storage: Arc<dyn DurableStorage>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: flume::Sender<PipelineEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let topic = config.topic_for(&definition.name).to_owned();
        Self {
            definition,
            topic,
            config,
            source,
            storage,
            checkpoints,
            events,
            shutdown,
        }
    }

    /// Run until shutdown is requested or the source stream closes.
    ///
    /// Whatever is pending when stopping is sealed and committed before this returns. Errors
    /// returned from here are fatal for this stream.
    pub async fn run(mut self) -> Result<StreamReport, PipelineError> {
        let stream = self.definition.name.clone();
        let resumed = self.checkpoints.get_checkpoint(&stream).await?;
        let start = resumed.map(|c| c.offset).unwrap_or(0);
        info!("Starting at offset {start} from topic '{}'", self.topic);

        let writer = SinkWriter::new(
            self.definition.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.checkpoints),
            self.config.retry.clone(),
            start,
        );
        let mut assembler = BatchAssembler::new(
            stream.clone(),
            start,
            self.config.max_batch_size,
            self.config.max_batch_window,
        );
        if let Some(pending) = writer.pending_range().await? {
            info!("Replaying uncommitted batch {pending}");
            assembler.pin_end(pending.end);
        }
        let mut state = ChainState {
            tracker: WatermarkTracker::resume(
                self.definition.allowed_lateness,
                resumed.and_then(|c| c.max_event_time),
            ),
            assembler,
            writer,
            report: StreamReport {
                stream,
                checkpoint: start,
                ..Default::default()
            },
        };

        if let Some(mut reader) = self.open_reader(start, &mut state.report).await {
            self.consume(&mut reader, &mut state).await?;
            state.report.duplicates = reader.duplicates();
        }

        while let Some(batch) = state.assembler.seal() {
            self.commit(batch, &mut state).await?;
        }
        state.report.checkpoint = state.writer.committed();
        info!("Stopped at checkpoint {}", state.report.checkpoint);
        Ok(state.report)
    }

    /// Subscribe, retrying until it succeeds or shutdown is requested
    async fn open_reader(&mut self, start: Offset, report: &mut StreamReport) -> Option<StreamReader> {
        let mut backoff = self.config.retry.broker_backoff().build();
        loop {
            let opened = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return None,
                opened = StreamReader::open(
                    self.source.as_ref(),
                    self.definition.clone(),
                    &self.topic,
                    start,
                ) => opened,
            };
            match opened {
                Ok(reader) => return Some(reader),
                Err(e) => {
                    report.broker_retries += 1;
                    let delay = next_delay(&mut backoff, &self.config);
                    warn!("Subscribing failed, retrying in {delay:?}: {e}");
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut self.shutdown) => return None,
                        _ = tokio::time::sleep(delay) => (),
                    }
                }
            }
        }
    }

    async fn consume(
        &mut self,
        reader: &mut StreamReader,
        state: &mut ChainState,
    ) -> Result<(), PipelineError> {
        let mut backoff: Option<ExponentialBackoff> = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    debug!("Shutdown requested");
                    return Ok(());
                }
                event = reader.next(self.config.poll_timeout) => event,
            };
            match event {
                Ok(ReadEvent::Message(decoded)) => {
                    backoff = None;
                    self.process(decoded, state);
                }
                Ok(ReadEvent::Idle) => backoff = None,
                Ok(ReadEvent::Closed) => {
                    info!("Source stream closed");
                    return Ok(());
                }
                Err(e) => {
                    state.report.broker_retries += 1;
                    let backoff = backoff
                        .get_or_insert_with(|| self.config.retry.broker_backoff().build());
                    let delay = next_delay(backoff, &self.config);
                    warn!("Reading failed, retrying in {delay:?}: {e}");
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut self.shutdown) => return Ok(()),
                        _ = tokio::time::sleep(delay) => (),
                    }
                }
            }
            while let Some(batch) = state.assembler.maybe_seal(Instant::now()) {
                self.commit(batch, state).await?;
            }
        }
    }

    fn process(&self, decoded: Decoded, state: &mut ChainState) {
        let Decoded { offset, result } = decoded;
        state.report.messages += 1;
        let timed = result.and_then(|record| {
            let event_time = self
                .definition
                .event_time(&record)
                .ok_or(ParseError::NoEventTime(self.definition.event_time_field))?;
            Ok((record, event_time))
        });
        let (record, event_time) = match timed {
            Ok(timed) => timed,
            Err(e) => {
                warn!("Dropping message at offset {offset}: {e}");
                state.report.parse_errors += 1;
                state.assembler.skip(offset, Instant::now());
                self.emit(PipelineEvent::ParseError {
                    stream: self.definition.name.clone(),
                    offset,
                    reason: e.to_string(),
                });
                return;
            }
        };

        // the watermark before this record decides
        let watermark = state.tracker.current_watermark();
        match state.tracker.classify(event_time) {
            Lateness::OnTime => {
                state.report.accepted += 1;
                state.assembler.accept(offset, record, Instant::now());
            }
            Lateness::Late => {
                state.report.late_records += 1;
                state.assembler.skip(offset, Instant::now());
                debug!(
                    "Dropping late record '{}' at offset {offset}, event time {event_time}",
                    record.id(),
                );
                if let Some(watermark) = watermark {
                    self.emit(PipelineEvent::LateRecord {
                        stream: self.definition.name.clone(),
                        offset,
                        event_time,
                        watermark,
                    });
                }
            }
        }
    }

    async fn commit(&self, batch: Batch, state: &mut ChainState) -> Result<(), PipelineError> {
        let advance = state
            .writer
            .commit(&batch, state.tracker.max_event_time())
            .await?;
        state.report.batches += 1;
        state.report.checkpoint = advance.range.end;
        self.emit(PipelineEvent::BatchCommitted {
            stream: self.definition.name.clone(),
            range: advance.range,
            records: advance.records,
            key: advance.key,
        });
        Ok(())
    }

    fn emit(&self, event: PipelineEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

fn next_delay(backoff: &mut ExponentialBackoff, config: &PipelineConfig) -> Duration {
    backoff.next().unwrap_or(config.retry.broker_max_delay)
}

/// Resolves once shutdown was requested or the requesting side went away
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
