//! Arrow and Parquet encoding of partition groups.
//!
//! Partition columns (year, month, day) live in the object path, hive style,
//! and are not repeated inside the files. Each row carries its broker
//! coordinates so duplicates from redelivery can be traced and removed
//! downstream.

use crate::config::ParquetCompression;
use crate::error::SinkError;
use crate::record::ValidatedRecord;
use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::io::Cursor;
use std::sync::Arc;

/// Arrow schema of the order files.
pub fn order_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("order_id", DataType::Utf8, false),
        Field::new("customer_id", DataType::Utf8, false),
        Field::new("order_status", DataType::Utf8, false),
        Field::new("price", DataType::Float64, false),
        Field::new("order_purchase_timestamp", DataType::Utf8, false),
        Field::new("order_approved_at", DataType::Utf8, true),
        Field::new("order_delivered_carrier_date", DataType::Utf8, true),
        Field::new("order_delivered_customer_date", DataType::Utf8, true),
        Field::new("order_estimated_delivery_date", DataType::Utf8, true),
        Field::new("kafka_topic", DataType::Utf8, false),
        Field::new("kafka_partition", DataType::Int32, false),
        Field::new("kafka_offset", DataType::Int64, false),
    ]))
}

/// Build an Arrow batch from validated records.
pub fn to_record_batch(records: &[&ValidatedRecord]) -> Result<RecordBatch, SinkError> {
    fn strings<'a>(
        records: &'a [&ValidatedRecord],
        f: impl Fn(&'a ValidatedRecord) -> Option<&'a str>,
    ) -> ArrayRef {
        Arc::new(records.iter().map(|r| f(*r)).collect::<StringArray>())
    }

    let columns: Vec<ArrayRef> = vec![
        strings(records, |r| Some(r.order().order_id.as_str())),
        strings(records, |r| Some(r.order().customer_id.as_str())),
        strings(records, |r| Some(r.order().order_status.as_str())),
        Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.order().price),
        )),
        strings(records, |r| r.order().order_purchase_timestamp.as_deref()),
        strings(records, |r| r.order().order_approved_at.as_deref()),
        strings(records, |r| r.order().order_delivered_carrier_date.as_deref()),
        strings(records, |r| r.order().order_delivered_customer_date.as_deref()),
        strings(records, |r| r.order().order_estimated_delivery_date.as_deref()),
        strings(records, |r| Some(r.source().topic.as_str())),
        Arc::new(Int32Array::from_iter_values(
            records.iter().map(|r| r.source().partition),
        )),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.source().offset),
        )),
    ];

    RecordBatch::try_new(order_schema(), columns).map_err(|e| {
        SinkError::Encoding(format!("Failed to build record batch: {}", e))
    })
}

/// Map the configured codec to Parquet compression.
pub fn parquet_compression(compression: &ParquetCompression) -> Compression {
    match compression {
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(Default::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
        ParquetCompression::Zstd => Compression::ZSTD(Default::default()),
        ParquetCompression::None => Compression::UNCOMPRESSED,
    }
}

/// Encode records as a single Parquet file.
pub fn encode_parquet(
    records: &[&ValidatedRecord],
    compression: &ParquetCompression,
) -> Result<Bytes, SinkError> {
    let batch = to_record_batch(records)?;
    let mut buffer = Cursor::new(Vec::new());

    let props = WriterProperties::builder()
        .set_compression(parquet_compression(compression))
        .set_max_row_group_size(128 * 1024)
        .set_write_batch_size(1024)
        .build();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .map_err(|e| SinkError::Encoding(format!("Failed to create Parquet writer: {}", e)))?;

    writer
        .write(&batch)
        .map_err(|e| SinkError::Encoding(format!("Failed to write batch to Parquet: {}", e)))?;

    writer
        .close()
        .map_err(|e| SinkError::Encoding(format!("Failed to close Parquet writer: {}", e)))?;

    Ok(Bytes::from(buffer.into_inner()))
}
