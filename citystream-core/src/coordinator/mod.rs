//! Starts one pipeline per stream and stops them together.
//!
//! Pipelines run as independent tokio tasks. A fatal error in one of them is reported and ends
//! that pipeline only, the others keep running until shutdown is requested.
use std::sync::Arc;

use bon::bon;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, info_span, Instrument};

use crate::checkpoint::{CheckpointStore, StorageCheckpoints};
use crate::config::PipelineConfig;
use crate::errorhandling::{alert_fatal, PipelineError};
use crate::pipeline::{PipelineEvent, StreamPipeline, StreamReport};
use crate::reader::MessageSource;
use crate::schema::StreamDefinition;
use crate::storage::DurableStorage;

/// Shared resources from which stream pipelines are started
pub struct Coordinator {
    source: Arc<dyn MessageSource>,
    storage: Arc<dyn DurableStorage>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: PipelineConfig,
}

#[bon]
impl Coordinator {
    /// Create a coordinator. Checkpoints are kept in `storage` unless a separate
    /// checkpoint store is given.
    #[builder]
    pub fn new(
        source: Arc<dyn MessageSource>,
        storage: Arc<dyn DurableStorage>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
        #[builder(default)] config: PipelineConfig,
    ) -> Self {
        let checkpoints = checkpoints
            .unwrap_or_else(|| Arc::new(StorageCheckpoints::new(Arc::clone(&storage))));
        Self {
            source,
            storage,
            checkpoints,
            config,
        }
    }
}

impl Coordinator {
    /// Spawn one pipeline per definition on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    pub fn start(&self, definitions: impl IntoIterator<Item = StreamDefinition>) -> RunningPipelines {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = flume::unbounded();
        let (alive_tx, alive_rx) = flume::bounded::<()>(1);

        let tasks = definitions
            .into_iter()
            .map(|definition| {
                let name = definition.name.clone();
                let stream = name.clone();
                let pipeline = StreamPipeline::new(
                    definition,
                    self.config.clone(),
                    Arc::clone(&self.source),
                    Arc::clone(&self.storage),
                    Arc::clone(&self.checkpoints),
                    events_tx.clone(),
                    shutdown_rx.clone(),
                );
                let events = events_tx.clone();
                let alive = alive_tx.clone();
                let span = info_span!("stream", name = %stream);
                let task = tokio::spawn(
                    async move {
                        let result = pipeline.run().await.map_err(|e| {
                            let report = alert_fatal(&stream, e);
                            let _ = events.send(PipelineEvent::Fatal {
                                stream: stream.clone(),
                                message: format!("{report:#}"),
                            });
                            report
                        });
                        drop(alive);
                        result
                    }
                    .instrument(span),
                );
                (name, task)
            })
            .collect();
        info!("Started stream pipelines");

        RunningPipelines {
            tasks,
            shutdown: shutdown_tx,
            events: events_rx,
            alive: alive_rx,
        }
    }
}

/// Final state of one pipeline
#[derive(Debug)]
pub struct StreamOutcome {
    /// Name of the stream
    pub stream: String,
    /// Counters of a pipeline which stopped cleanly, or the report of its fatal error
    pub result: Result<StreamReport, eyre::Report>,
}

/// Handle to the pipelines started by [Coordinator::start]
pub struct RunningPipelines {
    tasks: Vec<(String, JoinHandle<Result<StreamReport, eyre::Report>>)>,
    shutdown: watch::Sender<bool>,
    events: flume::Receiver<PipelineEvent>,
    alive: flume::Receiver<()>,
}

impl RunningPipelines {
    /// Events raised by all pipelines
    pub fn events(&self) -> flume::Receiver<PipelineEvent> {
        self.events.clone()
    }

    /// Names of the running streams
    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|(name, _)| name.as_str())
    }

    /// Resolves once every pipeline has stopped on its own
    pub async fn stopped(&self) {
        // only pipelines hold senders, so this errors once all of them are gone
        let _ = self.alive.recv_async().await;
    }

    /// Request all pipelines to stop and wait for them. Every pipeline commits its pending
    /// records before stopping.
    pub async fn shutdown(self) -> Vec<StreamOutcome> {
        info!("Shutting down stream pipelines");
        self.shutdown.send_replace(true);
        self.join().await
    }

    /// Wait for all pipelines to stop without requesting them to
    pub async fn join(self) -> Vec<StreamOutcome> {
        let mut pending: FuturesUnordered<_> = self
            .tasks
            .into_iter()
            .map(|(stream, task)| async move {
                let result = match task.await {
                    Ok(result) => result,
                    Err(e) => Err(alert_fatal(&stream, PipelineError::Join(e))),
                };
                StreamOutcome { stream, result }
            })
            .collect();
        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(outcome) = pending.next().await {
            outcomes.push(outcome);
        }
        // keep the sender alive until here, dropping it would count as a shutdown request
        drop(self.shutdown);
        outcomes
    }
}
