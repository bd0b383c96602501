//! Batching of accepted records and their durable, checkpointed storage
mod assembler;
mod columnar;
mod writer;

pub use assembler::BatchAssembler;
pub use columnar::{arrow_schema, encode_parquet, EncodeError};
pub use writer::{CheckpointAdvance, SinkWriter};
