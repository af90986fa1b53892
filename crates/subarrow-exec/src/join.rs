//! Hash equi-join
//!
//! The right input is the build side: its key rows are encoded with
//! `arrow::row` into a hash table, then every left row probes it. Output rows
//! are gathered from both inputs with `take`; unmatched outer rows gather a
//! null index.

use std::collections::HashMap;

use arrow::array::{Array, ArrayRef, RecordBatchOptions, UInt32Array};
use arrow::compute::{cast, take};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use subarrow_plan::functions::common_numeric_type;
use subarrow_plan::{FieldRef, HashJoinNodeOptions, JoinKeyCmp, JoinType};
use tracing::debug;

use crate::error::{invalid, Result};
use crate::eval::column_at_path;

fn key_columns(batch: &RecordBatch, keys: &[FieldRef]) -> Result<Vec<ArrayRef>> {
    keys.iter()
        .map(|key| {
            let path = key.resolve(batch.schema_ref())?;
            column_at_path(batch, &path)
        })
        .collect()
}

/// Bring each key pair to one type so their row encodings agree
fn align_keys(left: Vec<ArrayRef>, right: Vec<ArrayRef>) -> Result<(Vec<ArrayRef>, Vec<ArrayRef>)> {
    let mut aligned_left = Vec::with_capacity(left.len());
    let mut aligned_right = Vec::with_capacity(right.len());
    for (l, r) in left.into_iter().zip(right) {
        if l.data_type() == r.data_type() {
            aligned_left.push(l);
            aligned_right.push(r);
            continue;
        }
        let common = common_numeric_type(l.data_type(), r.data_type()).ok_or_else(|| {
            invalid(format!(
                "join keys of types {} and {} cannot be compared",
                l.data_type(),
                r.data_type()
            ))
        })?;
        aligned_left.push(cast(&l, &common)?);
        aligned_right.push(cast(&r, &common)?);
    }
    Ok((aligned_left, aligned_right))
}

/// Rows whose keys can never match: a null in any key compared with `Eq`
fn excluded_rows(keys: &[ArrayRef], cmp: &[JoinKeyCmp], num_rows: usize) -> Vec<bool> {
    let mut excluded = vec![false; num_rows];
    for (key, cmp) in keys.iter().zip(cmp) {
        if *cmp == JoinKeyCmp::Eq && key.null_count() > 0 {
            for (row, flag) in excluded.iter_mut().enumerate() {
                *flag |= key.is_null(row);
            }
        }
    }
    excluded
}

pub(crate) fn hash_join(
    options: &HashJoinNodeOptions,
    left: &RecordBatch,
    right: &RecordBatch,
    output_schema: &SchemaRef,
) -> Result<RecordBatch> {
    if options.left_keys.len() != options.right_keys.len()
        || options.left_keys.len() != options.key_cmp.len()
    {
        return Err(invalid(format!(
            "join has {} left keys, {} right keys and {} comparisons",
            options.left_keys.len(),
            options.right_keys.len(),
            options.key_cmp.len()
        )));
    }
    let (left_keys, right_keys) = align_keys(
        key_columns(left, &options.left_keys)?,
        key_columns(right, &options.right_keys)?,
    )?;
    let converter = RowConverter::new(
        left_keys
            .iter()
            .map(|k| SortField::new(k.data_type().clone()))
            .collect(),
    )?;
    let build_rows = converter.convert_columns(&right_keys)?;
    let probe_rows = converter.convert_columns(&left_keys)?;
    let right_excluded = excluded_rows(&right_keys, &options.key_cmp, right.num_rows());
    let left_excluded = excluded_rows(&left_keys, &options.key_cmp, left.num_rows());

    let mut table: HashMap<_, Vec<u32>> = HashMap::new();
    for (i, row) in build_rows.iter().enumerate() {
        if !right_excluded[i] {
            table.entry(row).or_default().push(i as u32);
        }
    }

    let mut left_indices: Vec<Option<u32>> = Vec::new();
    let mut right_indices: Vec<Option<u32>> = Vec::new();
    let mut right_matched = vec![false; right.num_rows()];
    let join_type = options.join_type;

    for (l, row) in probe_rows.iter().enumerate() {
        let matches = if left_excluded[l] {
            None
        } else {
            table.get(&row)
        };
        let l = l as u32;
        match (join_type, matches) {
            (JoinType::LeftSemi, Some(_)) | (JoinType::LeftAnti, None) => {
                left_indices.push(Some(l))
            }
            (JoinType::LeftSemi | JoinType::LeftAnti, _) => {}
            (_, Some(rows)) => {
                for &r in rows {
                    right_matched[r as usize] = true;
                    if !matches!(join_type, JoinType::RightSemi | JoinType::RightAnti) {
                        left_indices.push(Some(l));
                        right_indices.push(Some(r));
                    }
                }
            }
            (JoinType::LeftOuter | JoinType::FullOuter, None) => {
                left_indices.push(Some(l));
                right_indices.push(None);
            }
            (_, None) => {}
        }
    }

    let unmatched_right = right_matched.iter().enumerate().filter(|(_, m)| !**m);
    let matched_right = right_matched.iter().enumerate().filter(|(_, m)| **m);
    match join_type {
        JoinType::RightOuter | JoinType::FullOuter => {
            for (r, _) in unmatched_right {
                left_indices.push(None);
                right_indices.push(Some(r as u32));
            }
        }
        JoinType::RightSemi => right_indices.extend(matched_right.map(|(r, _)| Some(r as u32))),
        JoinType::RightAnti => right_indices.extend(unmatched_right.map(|(r, _)| Some(r as u32))),
        _ => {}
    }

    let mut columns = Vec::with_capacity(output_schema.fields().len());
    let num_rows = match join_type {
        JoinType::LeftSemi | JoinType::LeftAnti => {
            gather(left, &left_indices, &mut columns)?;
            left_indices.len()
        }
        JoinType::RightSemi | JoinType::RightAnti => {
            gather(right, &right_indices, &mut columns)?;
            right_indices.len()
        }
        _ => {
            gather(left, &left_indices, &mut columns)?;
            gather(right, &right_indices, &mut columns)?;
            left_indices.len()
        }
    };
    debug!(
        ?join_type,
        left = left.num_rows(),
        right = right.num_rows(),
        output = num_rows,
        "hash join"
    );
    let batch_options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        output_schema.clone(),
        columns,
        &batch_options,
    )?)
}

fn gather(batch: &RecordBatch, indices: &[Option<u32>], out: &mut Vec<ArrayRef>) -> Result<()> {
    let indices = UInt32Array::from(indices.to_vec());
    for column in batch.columns() {
        out.push(take(column.as_ref(), &indices, None)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{AsArray, Int32Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Int32Type, Schema};

    fn left() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Int32, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), Some(2), None, Some(4)])),
                Arc::new(Int32Array::from(vec![10, 20, 30, 40])),
            ],
        )
        .unwrap()
    }

    fn right() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int64, true),
            Field::new("y", DataType::Int32, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(2), None, Some(2), Some(9)])),
                Arc::new(Int32Array::from(vec![200, 300, 201, 900])),
            ],
        )
        .unwrap()
    }

    fn options(join_type: JoinType, cmp: JoinKeyCmp) -> HashJoinNodeOptions {
        HashJoinNodeOptions {
            join_type,
            left_keys: vec![FieldRef::path(vec![0])],
            right_keys: vec![FieldRef::path(vec![0])],
            key_cmp: vec![cmp],
        }
    }

    fn joined_schema(nullable: bool) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Int32, nullable),
            Field::new("x", DataType::Int64, true),
            Field::new("y", DataType::Int32, nullable),
        ]))
    }

    fn column(batch: &RecordBatch, i: usize) -> Vec<Option<i32>> {
        batch.column(i).as_primitive::<Int32Type>().iter().collect()
    }

    #[test]
    fn test_inner_join_with_widened_keys() {
        let out = hash_join(
            &options(JoinType::Inner, JoinKeyCmp::Eq),
            &left(),
            &right(),
            &joined_schema(false),
        )
        .unwrap();
        assert_eq!(column(&out, 1), vec![Some(20), Some(20)]);
        assert_eq!(column(&out, 3), vec![Some(200), Some(201)]);
    }

    #[test]
    fn test_is_comparison_matches_nulls() {
        let out = hash_join(
            &options(JoinType::Inner, JoinKeyCmp::Is),
            &left(),
            &right(),
            &joined_schema(false),
        )
        .unwrap();
        assert_eq!(column(&out, 1), vec![Some(20), Some(20), Some(30)]);
        assert_eq!(column(&out, 3), vec![Some(200), Some(201), Some(300)]);
    }

    #[test]
    fn test_full_outer_join() {
        let out = hash_join(
            &options(JoinType::FullOuter, JoinKeyCmp::Eq),
            &left(),
            &right(),
            &joined_schema(true),
        )
        .unwrap();
        // 2 matches, 3 unmatched left, 2 unmatched right
        assert_eq!(out.num_rows(), 7);
        assert_eq!(
            column(&out, 3),
            vec![None, Some(200), Some(201), None, None, Some(300), Some(900)]
        );
    }

    #[test]
    fn test_semi_and_anti() {
        let schema = left().schema();
        let semi = hash_join(
            &options(JoinType::LeftSemi, JoinKeyCmp::Eq),
            &left(),
            &right(),
            &schema,
        )
        .unwrap();
        assert_eq!(column(&semi, 1), vec![Some(20)]);

        let anti = hash_join(
            &options(JoinType::LeftAnti, JoinKeyCmp::Eq),
            &left(),
            &right(),
            &schema,
        )
        .unwrap();
        assert_eq!(column(&anti, 1), vec![Some(10), Some(30), Some(40)]);
    }
}
