//! Expression evaluation over record batches
//!
//! Every native function maps onto an Arrow compute kernel. Arithmetic and
//! comparison arguments of differing numeric types are first cast to their
//! common numeric type, the same promotion the binder uses to type the call.

use std::sync::Arc;

use arrow::array::{
    make_array, new_null_array, Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array,
    Int8Array, Scalar, StructArray,
};
use arrow::buffer::NullBuffer;
use arrow::compute::kernels::arity;
use arrow::compute::kernels::boolean::{and_kleene, is_not_null, is_null, not, or_kleene};
use arrow::compute::kernels::zip::zip;
use arrow::compute::kernels::{cmp, numeric};
use arrow::compute::{cast, nullif, take};
use arrow::datatypes::{DataType, Field, Fields, Float64Type};
use arrow::record_batch::RecordBatch;
use subarrow_plan::expression::{CASE_WHEN, CAST, IF_ELSE, LIST_ELEMENT, MAKE_STRUCT, STRUCT_FIELD};
use subarrow_plan::functions::common_numeric_type;
use subarrow_plan::{Call, Expression, FieldPath, FunctionOptions};

use crate::error::{invalid, not_implemented, Result};

/// Evaluate `expr` against every row of `batch`
pub fn evaluate(expr: &Expression, batch: &RecordBatch) -> Result<ArrayRef> {
    match expr {
        Expression::Literal(value) => Ok(value.to_array_of_size(batch.num_rows())?),
        Expression::Field(field_ref) => {
            let path = field_ref.resolve(batch.schema_ref())?;
            column_at_path(batch, &path)
        }
        Expression::Call(call) => evaluate_call(call, batch),
    }
}

/// Evaluate a predicate; nulls stay null
pub fn evaluate_predicate(expr: &Expression, batch: &RecordBatch) -> Result<BooleanArray> {
    to_boolean(&evaluate(expr, batch)?)
}

/// The column a field path points at; parent nulls carry into children
pub fn column_at_path(batch: &RecordBatch, path: &FieldPath) -> Result<ArrayRef> {
    let (first, rest) = path
        .indices()
        .split_first()
        .ok_or_else(|| invalid("empty field path"))?;
    let column = batch.columns().get(*first).ok_or_else(|| {
        invalid(format!(
            "column {first} out of range for {} columns",
            batch.num_columns()
        ))
    })?;
    struct_child(column.clone(), rest)
}

fn struct_child(mut array: ArrayRef, indices: &[usize]) -> Result<ArrayRef> {
    for &index in indices {
        let parent = array
            .as_struct_opt()
            .ok_or_else(|| invalid(format!("cannot step into {}", array.data_type())))?;
        let child = parent
            .columns()
            .get(index)
            .ok_or_else(|| {
                invalid(format!(
                    "struct child {index} out of range for {} children",
                    parent.num_columns()
                ))
            })?
            .clone();
        array = match NullBuffer::union(parent.nulls(), child.nulls()) {
            Some(nulls) if parent.nulls().is_some() => {
                make_array(child.to_data().into_builder().nulls(Some(nulls)).build()?)
            }
            _ => child,
        };
    }
    Ok(array)
}

fn to_boolean(array: &ArrayRef) -> Result<BooleanArray> {
    match array.data_type() {
        DataType::Boolean => Ok(array.as_boolean().clone()),
        DataType::Null => Ok(cast(array, &DataType::Boolean)?.as_boolean().clone()),
        other => Err(invalid(format!("expected a boolean value, got {other}"))),
    }
}

fn arguments(call: &Call, batch: &RecordBatch) -> Result<Vec<ArrayRef>> {
    call.arguments
        .iter()
        .map(|arg| evaluate(arg, batch))
        .collect()
}

fn evaluate_call(call: &Call, batch: &RecordBatch) -> Result<ArrayRef> {
    let args = arguments(call, batch)?;
    match call.function.as_str() {
        IF_ELSE => {
            let [condition, truthy, falsy] = args.as_slice() else {
                return Err(invalid(format!("if_else takes 3 arguments, got {}", args.len())));
            };
            if_else(condition, truthy, falsy)
        }
        CASE_WHEN => {
            let (conditions, values) = args
                .split_first()
                .ok_or_else(|| invalid("case_when takes a struct of conditions"))?;
            case_when(conditions, values, batch.num_rows())
        }
        MAKE_STRUCT => {
            let names = match &call.options {
                Some(FunctionOptions::MakeStruct { field_names }) => field_names.clone(),
                _ => vec![String::new(); args.len()],
            };
            make_struct(names, args, batch.num_rows())
        }
        STRUCT_FIELD => {
            let Some(FunctionOptions::StructField { indices }) = &call.options else {
                return Err(invalid("struct_field requires field indices"));
            };
            let [input] = args.as_slice() else {
                return Err(invalid("struct_field takes 1 argument"));
            };
            struct_child(input.clone(), indices)
        }
        LIST_ELEMENT => {
            let [list, index] = args.as_slice() else {
                return Err(invalid("list_element takes 2 arguments"));
            };
            list_element(list, index)
        }
        CAST => {
            let Some(FunctionOptions::Cast { to }) = &call.options else {
                return Err(invalid("cast requires a target type"));
            };
            let [input] = args.as_slice() else {
                return Err(invalid("cast takes 1 argument"));
            };
            Ok(cast(input, to)?)
        }
        name => apply(name, &args),
    }
}

/// Cast both sides to their common numeric type when they differ
fn coerce_pair(lhs: &ArrayRef, rhs: &ArrayRef) -> Result<(ArrayRef, ArrayRef)> {
    if lhs.data_type() == rhs.data_type() {
        return Ok((lhs.clone(), rhs.clone()));
    }
    let common = common_numeric_type(lhs.data_type(), rhs.data_type()).ok_or_else(|| {
        invalid(format!(
            "no common type for {} and {}",
            lhs.data_type(),
            rhs.data_type()
        ))
    })?;
    Ok((cast(lhs, &common)?, cast(rhs, &common)?))
}

fn binary<'a>(name: &str, args: &'a [ArrayRef]) -> Result<(&'a ArrayRef, &'a ArrayRef)> {
    match args {
        [lhs, rhs] => Ok((lhs, rhs)),
        _ => Err(invalid(format!("'{name}' takes 2 arguments, got {}", args.len()))),
    }
}

fn unary<'a>(name: &str, args: &'a [ArrayRef]) -> Result<&'a ArrayRef> {
    match args {
        [input] => Ok(input),
        _ => Err(invalid(format!("'{name}' takes 1 argument, got {}", args.len()))),
    }
}

fn to_float(array: &ArrayRef) -> Result<ArrayRef> {
    Ok(cast(array, &DataType::Float64)?)
}

fn apply(name: &str, args: &[ArrayRef]) -> Result<ArrayRef> {
    let out: ArrayRef = match name {
        "add" | "subtract" | "multiply" | "divide" => {
            let (lhs, rhs) = binary(name, args)?;
            let (lhs, rhs) = coerce_pair(lhs, rhs)?;
            match name {
                "add" => numeric::add_wrapping(&lhs, &rhs)?,
                "subtract" => numeric::sub_wrapping(&lhs, &rhs)?,
                "multiply" => numeric::mul_wrapping(&lhs, &rhs)?,
                _ => numeric::div(&lhs, &rhs)?,
            }
        }
        "negate" => numeric::neg_wrapping(unary(name, args)?.as_ref())?,
        "abs" => {
            let input = unary(name, args)?;
            let zero = Scalar::new(cast(&Int8Array::from(vec![0]), input.data_type())?);
            let negative = cmp::lt(input, &zero)?;
            let negated = numeric::neg_wrapping(input.as_ref())?;
            zip(&negative, &negated, input)?
        }
        "power" => {
            let (base, exponent) = binary(name, args)?;
            let (base, exponent) = (to_float(base)?, to_float(exponent)?);
            let out: Float64Array = arity::binary(
                base.as_primitive::<Float64Type>(),
                exponent.as_primitive::<Float64Type>(),
                f64::powf,
            )?;
            Arc::new(out)
        }
        "sqrt" => {
            let input = to_float(unary(name, args)?)?;
            let out: Float64Array = arity::unary(input.as_primitive::<Float64Type>(), f64::sqrt);
            Arc::new(out)
        }
        "equal" | "not_equal" | "less" | "less_equal" | "greater" | "greater_equal"
        | "is_not_distinct_from" => {
            let (lhs, rhs) = binary(name, args)?;
            let (lhs, rhs) = coerce_pair(lhs, rhs)?;
            let result = match name {
                "equal" => cmp::eq(&lhs, &rhs)?,
                "not_equal" => cmp::neq(&lhs, &rhs)?,
                "less" => cmp::lt(&lhs, &rhs)?,
                "less_equal" => cmp::lt_eq(&lhs, &rhs)?,
                "greater" => cmp::gt(&lhs, &rhs)?,
                "greater_equal" => cmp::gt_eq(&lhs, &rhs)?,
                _ => cmp::not_distinct(&lhs, &rhs)?,
            };
            Arc::new(result)
        }
        "is_null" => Arc::new(is_null(unary(name, args)?.as_ref())?),
        "is_valid" => Arc::new(is_not_null(unary(name, args)?.as_ref())?),
        "invert" => Arc::new(not(&to_boolean(unary(name, args)?)?)?),
        "and_kleene" | "or_kleene" | "xor" => {
            let (lhs, rhs) = binary(name, args)?;
            let (lhs, rhs) = (to_boolean(lhs)?, to_boolean(rhs)?);
            Arc::new(match name {
                "and_kleene" => and_kleene(&lhs, &rhs)?,
                "or_kleene" => or_kleene(&lhs, &rhs)?,
                _ => cmp::neq(&lhs, &rhs)?,
            })
        }
        "sum" | "mean" | "min" | "max" | "count" => {
            return Err(invalid(format!(
                "aggregate function '{name}' used as a scalar expression"
            )))
        }
        other => return Err(not_implemented(format!("no kernel for function '{other}'"))),
    };
    Ok(out)
}

/// Bring a null-typed branch to the other branch's type
fn unify(arrays: &[&ArrayRef]) -> Result<(DataType, Vec<ArrayRef>)> {
    let data_type = arrays
        .iter()
        .map(|a| a.data_type())
        .find(|t| **t != DataType::Null)
        .cloned()
        .unwrap_or(DataType::Null);
    let arrays = arrays
        .iter()
        .map(|a| {
            if a.data_type() == &data_type {
                Ok((*a).clone())
            } else {
                Ok(cast(a, &data_type)?)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((data_type, arrays))
}

fn if_else(condition: &ArrayRef, truthy: &ArrayRef, falsy: &ArrayRef) -> Result<ArrayRef> {
    let mask = to_boolean(condition)?;
    let (_, branches) = unify(&[truthy, falsy])?;
    let chosen = zip(&mask, &branches[0], &branches[1])?;
    if mask.null_count() == 0 {
        return Ok(chosen);
    }
    Ok(nullif(&chosen, &is_null(&mask)?)?)
}

fn case_when(conditions: &ArrayRef, values: &[ArrayRef], num_rows: usize) -> Result<ArrayRef> {
    let conditions = conditions
        .as_struct_opt()
        .ok_or_else(|| invalid("case_when conditions must be a struct"))?;
    let n = conditions.num_columns();
    if values.len() != n && values.len() != n + 1 {
        return Err(invalid(format!(
            "case_when has {n} conditions but {} values",
            values.len()
        )));
    }
    let refs: Vec<&ArrayRef> = values.iter().collect();
    let (data_type, values) = unify(&refs)?;
    let mut result = match values.get(n) {
        Some(otherwise) => otherwise.clone(),
        None => new_null_array(&data_type, num_rows),
    };
    // first matching condition wins, so fold from the last
    for i in (0..n).rev() {
        let mask = to_boolean(conditions.column(i))?;
        result = zip(&mask, &values[i], &result)?;
    }
    Ok(result)
}

fn make_struct(names: Vec<String>, columns: Vec<ArrayRef>, num_rows: usize) -> Result<ArrayRef> {
    if names.len() != columns.len() {
        return Err(invalid(format!(
            "make_struct has {} names for {} arguments",
            names.len(),
            columns.len()
        )));
    }
    if columns.is_empty() {
        return Ok(Arc::new(StructArray::new_empty_fields(num_rows, None)));
    }
    let fields: Fields = names
        .into_iter()
        .zip(&columns)
        .map(|(name, column)| Field::new(name, column.data_type().clone(), true))
        .collect();
    Ok(Arc::new(StructArray::try_new(fields, columns, None)?))
}

fn list_element(list: &ArrayRef, index: &ArrayRef) -> Result<ArrayRef> {
    let lists = list
        .as_list_opt::<i32>()
        .ok_or_else(|| not_implemented(format!("list_element over {}", list.data_type())))?;
    let index = cast(index, &DataType::Int64)?;
    let index = index.as_primitive::<arrow::datatypes::Int64Type>();
    let offsets = lists.value_offsets();

    let mut take_indices = Vec::with_capacity(lists.len());
    for row in 0..lists.len() {
        if lists.is_null(row) || index.is_null(row) {
            take_indices.push(None);
            continue;
        }
        let start = i64::from(offsets[row]);
        let len = i64::from(offsets[row + 1]) - start;
        let position = index.value(row);
        if position < 0 || position >= len {
            return Err(invalid(format!(
                "list index {position} out of bounds for a list of length {len}"
            )));
        }
        take_indices.push(Some(start + position));
    }
    let indices = Int64Array::from(take_indices);
    Ok(take(lists.values().as_ref(), &indices, None)?)
}
