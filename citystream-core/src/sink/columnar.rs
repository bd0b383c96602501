//! Parquet encoding of sealed batches
use std::sync::Arc;

use arrow_array::builder::{
    Float64Builder, Int32Builder, StringBuilder, TimestampMicrosecondBuilder,
};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef, TimeUnit};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use thiserror::Error;

use crate::schema::{FieldDef, FieldType, StreamDefinition};
use crate::types::{FieldValue, Record};

const TIMEZONE: &str = "UTC";

/// Errors converting records into their columnar representation
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Record '{record}' has no value for column '{column}'")]
    MissingValue {
        record: String,
        column: &'static str,
    },
    #[error("Record '{record}' has a value of the wrong type for column '{column}'")]
    TypeMismatch {
        record: String,
        column: &'static str,
    },
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Parquet(#[from] ParquetError),
}

/// Arrow schema of a stream, one non-nullable column per field in schema order
pub fn arrow_schema(definition: &StreamDefinition) -> SchemaRef {
    let fields: Vec<_> = definition
        .fields
        .iter()
        .map(|f| Field::new(f.name, data_type(f.field_type), false))
        .collect();
    Arc::new(Schema::new(fields))
}

fn data_type(field_type: FieldType) -> DataType {
    match field_type {
        FieldType::Utf8 | FieldType::Location => DataType::Utf8,
        FieldType::Float64 => DataType::Float64,
        FieldType::Int32 => DataType::Int32,
        FieldType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some(TIMEZONE.into())),
    }
}

/// Encode records as a single Snappy compressed Parquet file
pub fn encode_parquet(
    definition: &StreamDefinition,
    records: &[Record],
) -> Result<Bytes, EncodeError> {
    let schema = arrow_schema(definition);
    let columns = definition
        .fields
        .iter()
        .map(|f| build_column(f, records))
        .collect::<Result<Vec<_>, _>>()?;
    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(Bytes::from(buffer))
}

fn build_column(field: &FieldDef, records: &[Record]) -> Result<ArrayRef, EncodeError> {
    let values = records.iter().map(|r| {
        r.field(field.name).ok_or_else(|| EncodeError::MissingValue {
            record: r.id().to_owned(),
            column: field.name,
        })
    });
    let mismatch = |r: &Record| EncodeError::TypeMismatch {
        record: r.id().to_owned(),
        column: field.name,
    };

    let array: ArrayRef = match field.field_type {
        FieldType::Utf8 | FieldType::Location => {
            let mut builder = StringBuilder::new();
            for (record, value) in records.iter().zip(values) {
                match value? {
                    FieldValue::Utf8(s) => builder.append_value(s),
                    _ => return Err(mismatch(record)),
                }
            }
            Arc::new(builder.finish())
        }
        FieldType::Float64 => {
            let mut builder = Float64Builder::with_capacity(records.len());
            for (record, value) in records.iter().zip(values) {
                match value? {
                    FieldValue::Float64(x) => builder.append_value(x),
                    _ => return Err(mismatch(record)),
                }
            }
            Arc::new(builder.finish())
        }
        FieldType::Int32 => {
            let mut builder = Int32Builder::with_capacity(records.len());
            for (record, value) in records.iter().zip(values) {
                match value? {
                    FieldValue::Int32(x) => builder.append_value(x),
                    _ => return Err(mismatch(record)),
                }
            }
            Arc::new(builder.finish())
        }
        FieldType::Timestamp => {
            let mut builder =
                TimestampMicrosecondBuilder::with_capacity(records.len()).with_timezone(TIMEZONE);
            for (record, value) in records.iter().zip(values) {
                match value? {
                    FieldValue::Timestamp(t) => builder.append_value(t.timestamp_micros()),
                    _ => return Err(mismatch(record)),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use arrow_array::cast::AsArray;
    use arrow_array::types::{Int32Type, TimestampMicrosecondType};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    use super::*;
    use crate::schema::{SchemaRegistry, StreamKind};
    use crate::testing::sample_record;
    use crate::types::Payload;

    fn read_back(bytes: Bytes) -> Vec<RecordBatch> {
        ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .build()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    /// Columns come out in schema order with their declared types
    #[test]
    fn weather_batch_readable() {
        let registry = SchemaRegistry::new();
        let def = registry.definition_for("weather_data").unwrap();
        let records: Vec<_> = (0..3)
            .map(|i| sample_record(StreamKind::Weather, i))
            .collect();

        let batches = read_back(encode_parquet(def, &records).unwrap());
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 3);

        let batch = &batches[0];
        let schema = batch.schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names[..3], ["id", "deviceId", "timestamp"]);
        assert_eq!(
            schema.field_with_name("timestamp").unwrap().data_type(),
            arrow_schema(def).field_with_name("timestamp").unwrap().data_type()
        );

        let humidity = batch
            .column_by_name("humidity")
            .unwrap()
            .as_primitive::<Int32Type>();
        let Payload::Weather(w) = records[1].payload() else {
            panic!()
        };
        assert_eq!(humidity.value(1), w.humidity);

        let timestamps = batch
            .column_by_name("timestamp")
            .unwrap()
            .as_primitive::<TimestampMicrosecondType>();
        assert_eq!(timestamps.value(2), records[2].event_time().timestamp_micros());

        let ids = batch.column_by_name("id").unwrap().as_string::<i32>();
        assert_eq!(ids.value(0), records[0].id());
    }

    /// A record of a different kind can not be encoded under a stream's schema
    #[test]
    fn wrong_kind_rejected() {
        let registry = SchemaRegistry::new();
        let def = registry.definition_for("weather_data").unwrap();
        let records = vec![sample_record(StreamKind::Gps, 0)];
        assert!(matches!(
            encode_parquet(def, &records),
            Err(EncodeError::MissingValue { .. })
        ));
    }
}
