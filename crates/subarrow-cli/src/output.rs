//! Printing result batches

use std::io::Write;

use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;

use crate::config::OutputFormat;

pub fn write_batches<W: Write>(
    out: &mut W,
    format: OutputFormat,
    batches: &[RecordBatch],
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            writeln!(out, "{}", pretty_format_batches(batches)?)?;
        }
        OutputFormat::Json => {
            let mut writer = arrow::json::ArrayWriter::new(Vec::new());
            writer.write_batches(&batches.iter().collect::<Vec<_>>())?;
            writer.finish()?;
            out.write_all(&writer.into_inner())?;
            writeln!(out)?;
        }
        OutputFormat::Csv => {
            let mut writer = arrow::csv::Writer::new(out);
            for batch in batches {
                writer.write(batch)?;
            }
        }
    }
    Ok(())
}
