//! Reading raw messages from the message broker and decoding them into records.
//!
//! The broker itself sits behind [MessageSource] and [MessageStream], so the pipeline can run
//! against Kafka in production and against an in-memory log in tests.
mod decode;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub use decode::{decode, ParseError};

use crate::schema::StreamDefinition;
use crate::types::{Offset, Record};

/// A single message as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Offset of this message within its stream
    pub offset: Offset,
    /// Raw payload bytes, possibly empty
    pub payload: Vec<u8>,
}

/// Errors raised by the message broker
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker can not be reached right now. Retrying later may succeed.
    #[error("Message broker is unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// An ordered sequence of messages from one topic
#[async_trait]
pub trait MessageStream: Send {
    /// Wait for the next message. Returns `Ok(None)` if the stream has been closed and will not
    /// yield any more messages.
    async fn next_message(&mut self) -> Result<Option<RawMessage>, BrokerError>;
}

/// Broker connection handle from which topic subscriptions are created.
/// This handle is shared read-only between all stream pipelines.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    /// Subscribe to `topic`, delivering messages starting at `start_offset`
    async fn subscribe(
        &self,
        topic: &str,
        start_offset: Offset,
    ) -> Result<Box<dyn MessageStream>, BrokerError>;
}

/// A message after decoding. Decoding failures do not stop the stream, they are returned
/// here together with the offset they occurred at.
#[derive(Debug)]
pub struct Decoded {
    /// Offset of the source message
    pub offset: Offset,
    /// The decoded record or the reason decoding failed
    pub result: Result<Record, ParseError>,
}

/// Outcome of waiting on a [StreamReader]
#[derive(Debug)]
pub enum ReadEvent {
    /// A message was read
    Message(Decoded),
    /// No message arrived within the poll timeout
    Idle,
    /// The underlying stream was closed
    Closed,
}

/// Reads and decodes the messages of a single stream in offset order.
pub struct StreamReader {
    definition: StreamDefinition,
    stream: Box<dyn MessageStream>,
    next_offset: Offset,
    duplicates: u64,
}

impl StreamReader {
    /// Subscribe to `topic` and decode its messages according to `definition`, starting at
    /// `start_offset`.
    pub async fn open(
        source: &dyn MessageSource,
        definition: StreamDefinition,
        topic: &str,
        start_offset: Offset,
    ) -> Result<Self, BrokerError> {
        let stream = source.subscribe(topic, start_offset).await?;
        debug!("Subscribed to '{topic}' at offset {start_offset}");
        Ok(Self {
            definition,
            stream,
            next_offset: start_offset,
            duplicates: 0,
        })
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// Messages below the next expected offset are redeliveries and are skipped silently.
    /// Messages failing to decode are returned with their error, the offset
    /// advances past them either way.
    pub async fn next(&mut self, timeout: Duration) -> Result<ReadEvent, BrokerError> {
        loop {
            let Ok(received) = tokio::time::timeout(timeout, self.stream.next_message()).await
            else {
                return Ok(ReadEvent::Idle);
            };
            let Some(message) = received? else {
                return Ok(ReadEvent::Closed);
            };
            if message.offset < self.next_offset {
                self.duplicates += 1;
                debug!("Skipping redelivered message at offset {}", message.offset);
                continue;
            }
            self.next_offset = message.offset + 1;

            return Ok(ReadEvent::Message(Decoded {
                offset: message.offset,
                result: decode(&message.payload, &self.definition),
            }));
        }
    }

    /// Number of redelivered messages which were skipped
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}
