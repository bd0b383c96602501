//! Publishes the telemetry of a simulated vehicle journey to Kafka
use std::time::Duration;

use chrono::Utc;
use citystream_kafka::{KafkaProducerError, KafkaSink};
use citystream_runtime::config::GeneratorConfig;
use citystream_runtime::generator::Journey;
use envconfig::Envconfig;
use thiserror::Error;
use tracing::{debug, info};

#[tokio::main(flavor = "current_thread")]
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
    let config = GeneratorConfig::init_from_env()?;
    debug!("Got the following config: {config:?}");
    let sink = KafkaSink::builder()
        .broker(&config.kafka.bootstrap_servers)
        .client_id("citystream-generator")
        .build()?;
    let mut journey = Journey::new(&config.device_id, Utc::now(), config.seed);
    let mut interval = tokio::time::interval(config.interval());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Simulation ended by the user");
                break;
            }
            _ = interval.tick() => (),
        }
        if config
            .max_ticks
            .is_some_and(|max| u64::from(journey.step()) >= max)
        {
            info!("Reached the configured number of ticks");
            break;
        }
        let Some(records) = journey.tick() else {
            info!("Vehicle has reached Birmingham, simulation ending");
            break;
        };
        for record in &records {
            sink.publish(config.topics.topic_for(record.kind()), record)?;
        }
        debug!("Published tick {} of '{}'", journey.step(), config.device_id);
    }
    sink.flush(Duration::from_secs(10))?;
    Ok(())
}

#[derive(Error, Debug)]
enum Error {
    #[error("Invalid configuration")]
    Config(#[from] envconfig::Error),
    #[error(transparent)]
    Kafka(#[from] KafkaProducerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
