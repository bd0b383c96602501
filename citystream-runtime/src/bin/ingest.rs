//! Ingests all five telemetry streams from Kafka into the configured storage root
use std::sync::Arc;

use citystream::coordinator::Coordinator;
use citystream::schema::UnknownStreamError;
use citystream_kafka::KafkaSource;
use citystream_runtime::config::IngestConfig;
use citystream_runtime::storage::{StorageRootError, open_storage_root};
use envconfig::Envconfig;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    match main_inner().await {
        Ok(_) => (),
        Err(e) => {
            panic!("{:?}", eyre::Report::new(e))
        }
    }
}

async fn main_inner() -> Result<(), Error> {
    let config = IngestConfig::init_from_env()?;
    debug!("Got the following config: {config:?}");
    let registry = config.schema_registry()?;
    let storage = Arc::new(open_storage_root(&config.storage_root)?);
    let source = KafkaSource::builder()
        .broker(&config.kafka.bootstrap_servers)
        .group_id(&config.group_id)
        .partition(config.kafka.partition)
        .build();

    let coordinator = Coordinator::builder()
        .source(Arc::new(source))
        .storage(storage)
        .config(config.pipeline_config())
        .build();
    let running = coordinator.start(registry.definitions().cloned());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, stopping");
        }
        _ = running.stopped() => warn!("All stream pipelines stopped on their own"),
    }

    let mut failed = 0;
    for outcome in running.shutdown().await {
        match outcome.result {
            Ok(report) => info!("Stream '{}' stopped: {report:?}", outcome.stream),
            Err(report) => {
                error!("Stream '{}' failed: {report:?}", outcome.stream);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(Error::StreamsFailed(failed));
    }
    info!("All streams stopped cleanly");
    Ok(())
}

#[derive(Error, Debug)]
enum Error {
    #[error("Invalid configuration")]
    Config(#[from] envconfig::Error),
    #[error(transparent)]
    UnknownStream(#[from] UnknownStreamError),
    #[error("Unable to open storage root")]
    StorageRoot(#[from] StorageRootError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0} stream pipeline(s) stopped with a fatal error")]
    StreamsFailed(usize),
}
