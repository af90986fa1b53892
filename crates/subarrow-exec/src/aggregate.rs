//! Scalar and grouped aggregation
//!
//! Groups are keyed by the `arrow::row` encoding of the key columns and
//! numbered in order of first appearance. Each measure is reduced per group
//! by gathering that group's rows and running the whole-array kernel.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, Float64Array, Int64Array, UInt32Array, UInt64Array,
};
use arrow::compute::kernels::aggregate::sum;
use arrow::compute::{cast, concat, sort_to_indices, take, SortOptions};
use arrow::datatypes::{DataType, Float64Type, Int64Type, SchemaRef, UInt64Type};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use subarrow_plan::functions::HASH_PREFIX;
use subarrow_plan::{AggregateNodeOptions, FieldRef};
use tracing::debug;

use crate::error::{invalid, not_implemented, Result};
use crate::eval::column_at_path;

fn resolve_column(batch: &RecordBatch, field_ref: &FieldRef) -> Result<ArrayRef> {
    let path = field_ref.resolve(batch.schema_ref())?;
    column_at_path(batch, &path)
}

/// Aggregate `input`; output columns are the measures followed by the keys
pub(crate) fn aggregate(
    options: &AggregateNodeOptions,
    input: &RecordBatch,
    output_schema: &SchemaRef,
) -> Result<RecordBatch> {
    let keys = options
        .keys
        .iter()
        .map(|key| resolve_column(input, key))
        .collect::<Result<Vec<_>>>()?;
    let targets = options
        .aggregates
        .iter()
        .map(|aggregate| match aggregate.target.as_slice() {
            [target] => resolve_column(input, target),
            other => Err(not_implemented(format!(
                "'{}' over {} targets",
                aggregate.function,
                other.len()
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    let groups = if keys.is_empty() {
        vec![(0..input.num_rows() as u32).collect::<Vec<_>>()]
    } else {
        group_rows(&keys)?
    };
    debug!(
        rows = input.num_rows(),
        groups = groups.len(),
        measures = targets.len(),
        "aggregating"
    );

    let mut columns = Vec::with_capacity(targets.len() + keys.len());
    for (i, (aggregate, values)) in options.aggregates.iter().zip(&targets).enumerate() {
        let kernel = aggregate
            .function
            .strip_prefix(HASH_PREFIX)
            .unwrap_or(&aggregate.function);
        let output_type = output_schema.field(i).data_type();
        let per_group = groups
            .iter()
            .map(|rows| {
                let gathered = take(values.as_ref(), &UInt32Array::from(rows.clone()), None)?;
                reduce(kernel, &gathered, output_type)
            })
            .collect::<Result<Vec<_>>>()?;
        columns.push(concat_or_empty(&per_group, output_type)?);
    }
    if !keys.is_empty() {
        let firsts = UInt32Array::from(groups.iter().map(|rows| rows[0]).collect::<Vec<_>>());
        for key in &keys {
            columns.push(take(key.as_ref(), &firsts, None)?);
        }
    }
    Ok(RecordBatch::try_new(output_schema.clone(), columns)?)
}

/// Row indices of each distinct key, groups in order of first appearance
fn group_rows(keys: &[ArrayRef]) -> Result<Vec<Vec<u32>>> {
    let converter = RowConverter::new(
        keys.iter()
            .map(|k| SortField::new(k.data_type().clone()))
            .collect(),
    )?;
    let rows = converter.convert_columns(keys)?;
    let mut ids = HashMap::new();
    let mut groups: Vec<Vec<u32>> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let id = *ids.entry(row).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[id].push(i as u32);
    }
    Ok(groups)
}

fn concat_or_empty(arrays: &[ArrayRef], data_type: &DataType) -> Result<ArrayRef> {
    if arrays.is_empty() {
        return Ok(new_null_array(data_type, 0));
    }
    let refs: Vec<&dyn Array> = arrays.iter().map(|a| a.as_ref()).collect();
    Ok(concat(&refs)?)
}

/// Reduce `values` to a single-row array of `output_type`
fn reduce(kernel: &str, values: &ArrayRef, output_type: &DataType) -> Result<ArrayRef> {
    let out: ArrayRef = match kernel {
        "count" => Arc::new(Int64Array::from(vec![
            (values.len() - values.logical_null_count()) as i64,
        ])),
        "sum" => {
            let widened = cast(values, output_type)?;
            match output_type {
                DataType::Int64 => Arc::new(Int64Array::from(vec![sum(
                    widened.as_primitive::<Int64Type>(),
                )])),
                DataType::UInt64 => Arc::new(UInt64Array::from(vec![sum(
                    widened.as_primitive::<UInt64Type>(),
                )])),
                DataType::Float64 => Arc::new(Float64Array::from(vec![sum(
                    widened.as_primitive::<Float64Type>(),
                )])),
                other => return Err(not_implemented(format!("sum producing {other}"))),
            }
        }
        "mean" => {
            let floats = cast(values, &DataType::Float64)?;
            let floats = floats.as_primitive::<Float64Type>();
            let count = floats.len() - floats.null_count();
            let mean = sum(floats).filter(|_| count > 0).map(|total| total / count as f64);
            Arc::new(Float64Array::from(vec![mean]))
        }
        "min" | "max" => extreme(values, kernel == "max")?,
        other => return Err(invalid(format!("'{other}' is not an aggregate kernel"))),
    };
    if out.data_type() == output_type {
        Ok(out)
    } else {
        Ok(cast(&out, output_type)?)
    }
}

fn extreme(values: &ArrayRef, largest: bool) -> Result<ArrayRef> {
    if values.is_empty() {
        return Ok(new_null_array(values.data_type(), 1));
    }
    let options = SortOptions {
        descending: largest,
        nulls_first: false,
    };
    let first = sort_to_indices(values, Some(options), Some(1))?;
    Ok(take(values.as_ref(), &first, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use subarrow_plan::Aggregate;

    fn input() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Utf8, true),
            Field::new("v", DataType::Int32, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("b"), Some("a"), Some("b"), None])),
                Arc::new(Int32Array::from(vec![Some(1), Some(5), None, Some(7)])),
            ],
        )
        .unwrap()
    }

    fn measure(function: &str) -> Aggregate {
        Aggregate {
            function: function.to_string(),
            target: vec![FieldRef::path(vec![1])],
            name: function.to_string(),
        }
    }

    #[test]
    fn test_grouped_in_first_seen_order() {
        let options = AggregateNodeOptions {
            aggregates: vec![measure("hash_sum"), measure("hash_count"), measure("hash_max")],
            keys: vec![FieldRef::path(vec![0])],
        };
        let schema = Arc::new(Schema::new(vec![
            Field::new("sum", DataType::Int64, true),
            Field::new("count", DataType::Int64, true),
            Field::new("max", DataType::Int32, true),
            Field::new("k", DataType::Utf8, true),
        ]));
        let out = aggregate(&options, &input(), &schema).unwrap();
        assert_eq!(out.num_rows(), 3);

        let sums: Vec<_> = out.column(0).as_primitive::<Int64Type>().iter().collect();
        assert_eq!(sums, vec![Some(1), Some(5), Some(7)]);
        let counts: Vec<_> = out.column(1).as_primitive::<Int64Type>().iter().collect();
        assert_eq!(counts, vec![Some(1), Some(1), Some(1)]);
        let keys: Vec<_> = out.column(3).as_string::<i32>().iter().collect();
        assert_eq!(keys, vec![Some("b"), Some("a"), None]);
    }

    #[test]
    fn test_scalar_aggregates() {
        let options = AggregateNodeOptions {
            aggregates: vec![measure("mean"), measure("min")],
            keys: vec![],
        };
        let schema = Arc::new(Schema::new(vec![
            Field::new("mean", DataType::Float64, true),
            Field::new("min", DataType::Int32, true),
        ]));
        let out = aggregate(&options, &input(), &schema).unwrap();
        assert_eq!(out.num_rows(), 1);
        let mean = out.column(0).as_primitive::<Float64Type>().value(0);
        assert!((mean - 13.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            out.column(1).as_primitive::<arrow::datatypes::Int32Type>().value(0),
            1
        );
    }

    #[test]
    fn test_sum_of_nothing_is_null() {
        let empty = input().slice(0, 0);
        let options = AggregateNodeOptions {
            aggregates: vec![measure("sum")],
            keys: vec![],
        };
        let schema = Arc::new(Schema::new(vec![Field::new("sum", DataType::Int64, true)]));
        let out = aggregate(&options, &empty, &schema).unwrap();
        assert_eq!(out.num_rows(), 1);
        assert!(out.column(0).is_null(0));
    }
}
