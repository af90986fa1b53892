//! Sink delivery: consumers and file writers

use std::fs::{self, File};
use std::path::PathBuf;

use arrow::datatypes::SchemaRef;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use subarrow_plan::{FileFormat, SinkConsumer, WriteNodeOptions};
use tracing::debug;

use crate::error::Result;

/// Feed `batches` to `consumer`. `finish` is called once, even after a failure.
pub(crate) fn deliver(
    consumer: &dyn SinkConsumer,
    schema: &SchemaRef,
    batches: Result<Vec<RecordBatch>>,
) -> Result<()> {
    let delivered = batches.and_then(|batches| {
        consumer.init(schema)?;
        for batch in batches {
            consumer.consume(batch)?;
        }
        Ok(())
    });
    let finished = consumer.finish();
    delivered?;
    Ok(finished?)
}

/// Write all batches into one file under `options.base_dir`
pub(crate) fn write(
    options: &WriteNodeOptions,
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> Result<PathBuf> {
    fs::create_dir_all(&options.base_dir)?;
    let path = options
        .base_dir
        .join(options.basename_template.replace("{i}", "0"));
    let file = File::create(&path)?;
    match options.format {
        FileFormat::Parquet => {
            let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
            for batch in batches {
                writer.write(batch)?;
            }
            writer.close()?;
        }
        FileFormat::Ipc => {
            let mut writer = FileWriter::try_new(file, schema)?;
            for batch in batches {
                writer.write(batch)?;
            }
            writer.finish()?;
        }
    }
    debug!(path = %path.display(), batches = batches.len(), "wrote dataset file");
    Ok(path)
}
