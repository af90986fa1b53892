//! Dataset scans over local Parquet and Arrow IPC files

use std::fs::File;
use std::path::Path;

use arrow::array::Array;
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use subarrow_plan::{Expression, FileFormat, FileSystemDataset, ScalarValue, ScanNodeOptions};
use tracing::{debug, trace};

use crate::error::{invalid, not_implemented, Result};
use crate::eval::evaluate_predicate;

/// Format implied by a file extension
pub fn format_of(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => Ok(FileFormat::Parquet),
        Some("arrow" | "ipc" | "feather") => Ok(FileFormat::Ipc),
        _ => Err(not_implemented(format!(
            "cannot tell the file format of {}",
            path.display()
        ))),
    }
}

/// A single-file dataset with the schema stored in the file
pub fn dataset_from_file(path: &Path) -> Result<FileSystemDataset> {
    let format = format_of(path)?;
    let file = File::open(path)?;
    let schema = match format {
        FileFormat::Parquet => ParquetRecordBatchReaderBuilder::try_new(file)?
            .schema()
            .clone(),
        FileFormat::Ipc => FileReader::try_new(file, None)?.schema(),
    };
    Ok(FileSystemDataset {
        schema,
        format,
        files: vec![path.to_path_buf()],
    })
}

pub(crate) fn read_file(path: &Path, format: FileFormat) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let batches = match format {
        FileFormat::Parquet => ParquetRecordBatchReaderBuilder::try_new(file)?
            .build()?
            .collect::<Result<Vec<_>, _>>()?,
        FileFormat::Ipc => FileReader::try_new(file, None)?.collect::<Result<Vec<_>, _>>()?,
    };
    trace!(path = %path.display(), batches = batches.len(), "read file");
    Ok(batches)
}

/// Present a file batch under the dataset schema. Columns are matched by
/// position when the widths agree and by name otherwise.
fn conform(batch: RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let width = schema.fields().len();
    let columns = if batch.num_columns() == width {
        batch.columns().to_vec()
    } else {
        schema
            .fields()
            .iter()
            .map(|field| {
                batch
                    .column_by_name(field.name())
                    .cloned()
                    .ok_or_else(|| invalid(format!("file has no column named '{}'", field.name())))
            })
            .collect::<Result<Vec<_>>>()?
    };
    let columns = columns
        .into_iter()
        .zip(schema.fields())
        .map(|(column, field)| {
            if column.data_type() == field.data_type() {
                Ok(column)
            } else {
                Ok(cast(&column, field.data_type())?)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| invalid(format!("file does not match the dataset schema: {e}")))
}

pub(crate) fn scan(options: &ScanNodeOptions) -> Result<Vec<RecordBatch>> {
    let dataset = &options.dataset;
    debug!(files = dataset.files.len(), format = ?dataset.format, "scanning dataset");
    let prefilter = !matches!(
        options.filter,
        Expression::Literal(ScalarValue::Boolean(Some(true)))
    );

    let mut out = Vec::new();
    for path in &dataset.files {
        for batch in read_file(path, dataset.format)? {
            let batch = conform(batch, &dataset.schema)?;
            let batch = if prefilter {
                let mask = evaluate_predicate(&options.filter, &batch)?;
                filter_record_batch(&batch, &mask)?
            } else {
                batch
            };
            out.push(batch);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{AsArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};
    use arrow::ipc::writer::FileWriter;
    use subarrow_plan::{call, col, lit};

    fn write_ipc(path: &Path) -> SchemaRef {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3, 4]))],
        )
        .unwrap();
        let mut writer = FileWriter::try_new(File::create(path).unwrap(), &schema).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
        schema
    }

    #[test]
    fn test_dataset_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.arrow");
        let schema = write_ipc(&path);

        let dataset = dataset_from_file(&path).unwrap();
        assert_eq!(dataset.schema, schema);
        assert_eq!(dataset.format, FileFormat::Ipc);

        assert!(dataset_from_file(&dir.path().join("numbers.csv")).is_err());
    }

    #[test]
    fn test_scan_applies_filter_and_dataset_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.arrow");
        write_ipc(&path);

        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, true)]));
        let options = ScanNodeOptions {
            dataset: FileSystemDataset {
                schema,
                format: FileFormat::Ipc,
                files: vec![path.clone(), path],
            },
            filter: call("greater", vec![col("n"), lit(2i64)]),
        };
        let batches = scan(&options).unwrap();
        let values: Vec<i64> = batches
            .iter()
            .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
            .collect();
        assert_eq!(values, vec![3, 4, 3, 4]);
    }
}
