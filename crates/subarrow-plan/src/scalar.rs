//! Typed scalar values used as expression literals

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    new_empty_array, new_null_array, Array, ArrayRef, BinaryArray, BooleanArray, Date32Array,
    Decimal128Array, FixedSizeBinaryArray, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, IntervalDayTimeArray, IntervalYearMonthArray, ListArray, NullArray,
    StringArray, StructArray, Time64MicrosecondArray, TimestampMicrosecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow::buffer::OffsetBuffer;
use arrow::compute::{concat, take};
use arrow::datatypes::{DataType, Field, Fields, IntervalDayTime, IntervalUnit, TimeUnit};

use crate::error::{PlanError, Result};

/// A single value of a known Arrow type. `None` payloads are typed nulls.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(Option<bool>),
    Int8(Option<i8>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    UInt8(Option<u8>),
    UInt16(Option<u16>),
    UInt32(Option<u32>),
    UInt64(Option<u64>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Utf8(Option<String>),
    /// Fixed-length string, padded by the producer
    FixedChar(Option<String>, i32),
    /// Length-bounded string
    VarChar(Option<String>, u32),
    Binary(Option<Vec<u8>>),
    FixedSizeBinary(i32, Option<Vec<u8>>),
    Uuid(Option<[u8; 16]>),
    Decimal128(Option<i128>, u8, i8),
    /// Microseconds since the epoch with an optional time zone
    TimestampMicrosecond(Option<i64>, Option<Arc<str>>),
    Date32(Option<i32>),
    Time64Microsecond(Option<i64>),
    IntervalYearMonth(Option<i32>),
    IntervalDayTime(Option<IntervalDayTime>),
    /// List of values sharing the element field's type
    List(Arc<Field>, Option<Vec<ScalarValue>>),
    Struct(Fields, Option<Vec<ScalarValue>>),
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) | ScalarValue::FixedChar(..) | ScalarValue::VarChar(..) => {
                DataType::Utf8
            }
            ScalarValue::Binary(_) => DataType::Binary,
            ScalarValue::FixedSizeBinary(size, _) => DataType::FixedSizeBinary(*size),
            ScalarValue::Uuid(_) => DataType::FixedSizeBinary(16),
            ScalarValue::Decimal128(_, precision, scale) => DataType::Decimal128(*precision, *scale),
            ScalarValue::TimestampMicrosecond(_, tz) => {
                DataType::Timestamp(TimeUnit::Microsecond, tz.clone())
            }
            ScalarValue::Date32(_) => DataType::Date32,
            ScalarValue::Time64Microsecond(_) => DataType::Time64(TimeUnit::Microsecond),
            ScalarValue::IntervalYearMonth(_) => DataType::Interval(IntervalUnit::YearMonth),
            ScalarValue::IntervalDayTime(_) => DataType::Interval(IntervalUnit::DayTime),
            ScalarValue::List(field, _) => DataType::List(field.clone()),
            ScalarValue::Struct(fields, _) => DataType::Struct(fields.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            ScalarValue::Null => true,
            ScalarValue::Boolean(v) => v.is_none(),
            ScalarValue::Int8(v) => v.is_none(),
            ScalarValue::Int16(v) => v.is_none(),
            ScalarValue::Int32(v) => v.is_none(),
            ScalarValue::Int64(v) => v.is_none(),
            ScalarValue::UInt8(v) => v.is_none(),
            ScalarValue::UInt16(v) => v.is_none(),
            ScalarValue::UInt32(v) => v.is_none(),
            ScalarValue::UInt64(v) => v.is_none(),
            ScalarValue::Float32(v) => v.is_none(),
            ScalarValue::Float64(v) => v.is_none(),
            ScalarValue::Utf8(v) | ScalarValue::FixedChar(v, _) | ScalarValue::VarChar(v, _) => {
                v.is_none()
            }
            ScalarValue::Binary(v) | ScalarValue::FixedSizeBinary(_, v) => v.is_none(),
            ScalarValue::Uuid(v) => v.is_none(),
            ScalarValue::Decimal128(v, ..) => v.is_none(),
            ScalarValue::TimestampMicrosecond(v, _) => v.is_none(),
            ScalarValue::Date32(v) => v.is_none(),
            ScalarValue::Time64Microsecond(v) => v.is_none(),
            ScalarValue::IntervalYearMonth(v) => v.is_none(),
            ScalarValue::IntervalDayTime(v) => v.is_none(),
            ScalarValue::List(_, v) | ScalarValue::Struct(_, v) => v.is_none(),
        }
    }

    /// Build a typed null for `data_type`
    pub fn try_new_null(data_type: &DataType) -> Result<Self> {
        Ok(match data_type {
            DataType::Null => ScalarValue::Null,
            DataType::Boolean => ScalarValue::Boolean(None),
            DataType::Int8 => ScalarValue::Int8(None),
            DataType::Int16 => ScalarValue::Int16(None),
            DataType::Int32 => ScalarValue::Int32(None),
            DataType::Int64 => ScalarValue::Int64(None),
            DataType::UInt8 => ScalarValue::UInt8(None),
            DataType::UInt16 => ScalarValue::UInt16(None),
            DataType::UInt32 => ScalarValue::UInt32(None),
            DataType::UInt64 => ScalarValue::UInt64(None),
            DataType::Float32 => ScalarValue::Float32(None),
            DataType::Float64 => ScalarValue::Float64(None),
            DataType::Utf8 => ScalarValue::Utf8(None),
            DataType::Binary => ScalarValue::Binary(None),
            DataType::FixedSizeBinary(size) => ScalarValue::FixedSizeBinary(*size, None),
            DataType::Decimal128(precision, scale) => {
                ScalarValue::Decimal128(None, *precision, *scale)
            }
            DataType::Timestamp(TimeUnit::Microsecond, tz) => {
                ScalarValue::TimestampMicrosecond(None, tz.clone())
            }
            DataType::Date32 => ScalarValue::Date32(None),
            DataType::Time64(TimeUnit::Microsecond) => ScalarValue::Time64Microsecond(None),
            DataType::Interval(IntervalUnit::YearMonth) => ScalarValue::IntervalYearMonth(None),
            DataType::Interval(IntervalUnit::DayTime) => ScalarValue::IntervalDayTime(None),
            DataType::List(field) => ScalarValue::List(field.clone(), None),
            DataType::Struct(fields) => ScalarValue::Struct(fields.clone(), None),
            other => {
                return Err(PlanError::NotImplemented(format!(
                    "null scalar of type {other}"
                )))
            }
        })
    }

    /// Integer payload, used for list indices and similar small constants
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int8(v) => v.map(i64::from),
            ScalarValue::Int16(v) => v.map(i64::from),
            ScalarValue::Int32(v) => v.map(i64::from),
            ScalarValue::Int64(v) => *v,
            ScalarValue::UInt8(v) => v.map(i64::from),
            ScalarValue::UInt16(v) => v.map(i64::from),
            ScalarValue::UInt32(v) => v.map(i64::from),
            ScalarValue::UInt64(v) => v.and_then(|v| i64::try_from(v).ok()),
            _ => None,
        }
    }

    /// Materialize as a one-element array
    pub fn to_array(&self) -> Result<ArrayRef> {
        let array: ArrayRef = match self {
            ScalarValue::Null => Arc::new(NullArray::new(1)),
            ScalarValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v])),
            ScalarValue::Int8(v) => Arc::new(Int8Array::from(vec![*v])),
            ScalarValue::Int16(v) => Arc::new(Int16Array::from(vec![*v])),
            ScalarValue::Int32(v) => Arc::new(Int32Array::from(vec![*v])),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from(vec![*v])),
            ScalarValue::UInt8(v) => Arc::new(UInt8Array::from(vec![*v])),
            ScalarValue::UInt16(v) => Arc::new(UInt16Array::from(vec![*v])),
            ScalarValue::UInt32(v) => Arc::new(UInt32Array::from(vec![*v])),
            ScalarValue::UInt64(v) => Arc::new(UInt64Array::from(vec![*v])),
            ScalarValue::Float32(v) => Arc::new(Float32Array::from(vec![*v])),
            ScalarValue::Float64(v) => Arc::new(Float64Array::from(vec![*v])),
            ScalarValue::Utf8(v) | ScalarValue::FixedChar(v, _) | ScalarValue::VarChar(v, _) => {
                Arc::new(StringArray::from(vec![v.as_deref()]))
            }
            ScalarValue::Binary(v) => Arc::new(BinaryArray::from_opt_vec(vec![v.as_deref()])),
            ScalarValue::FixedSizeBinary(size, v) => Arc::new(
                FixedSizeBinaryArray::try_from_sparse_iter_with_size(
                    vec![v.as_deref()].into_iter(),
                    *size,
                )?,
            ),
            ScalarValue::Uuid(v) => Arc::new(FixedSizeBinaryArray::try_from_sparse_iter_with_size(
                vec![v.as_ref().map(|bytes| bytes.as_slice())].into_iter(),
                16,
            )?),
            ScalarValue::Decimal128(v, precision, scale) => Arc::new(
                Decimal128Array::from(vec![*v]).with_precision_and_scale(*precision, *scale)?,
            ),
            ScalarValue::TimestampMicrosecond(v, tz) => {
                Arc::new(TimestampMicrosecondArray::from(vec![*v]).with_timezone_opt(tz.clone()))
            }
            ScalarValue::Date32(v) => Arc::new(Date32Array::from(vec![*v])),
            ScalarValue::Time64Microsecond(v) => Arc::new(Time64MicrosecondArray::from(vec![*v])),
            ScalarValue::IntervalYearMonth(v) => Arc::new(IntervalYearMonthArray::from(vec![*v])),
            ScalarValue::IntervalDayTime(v) => Arc::new(IntervalDayTimeArray::from(vec![*v])),
            ScalarValue::List(field, None) => new_null_array(&DataType::List(field.clone()), 1),
            ScalarValue::List(field, Some(values)) => {
                let values = if values.is_empty() {
                    new_empty_array(field.data_type())
                } else {
                    let arrays = values
                        .iter()
                        .map(|value| value.to_array())
                        .collect::<Result<Vec<_>>>()?;
                    let refs: Vec<&dyn Array> = arrays.iter().map(|a| a.as_ref()).collect();
                    concat(&refs)?
                };
                let offsets = OffsetBuffer::new(vec![0i32, values.len() as i32].into());
                Arc::new(ListArray::try_new(field.clone(), offsets, values, None)?)
            }
            ScalarValue::Struct(fields, None) => {
                new_null_array(&DataType::Struct(fields.clone()), 1)
            }
            ScalarValue::Struct(fields, Some(values)) => {
                if fields.len() != values.len() {
                    return Err(PlanError::Invalid(format!(
                        "struct scalar has {} values for {} fields",
                        values.len(),
                        fields.len()
                    )));
                }
                let columns = values
                    .iter()
                    .map(|value| value.to_array())
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(StructArray::try_new(fields.clone(), columns, None)?)
            }
        };
        Ok(array)
    }

    /// Materialize by repeating the value `num_rows` times
    pub fn to_array_of_size(&self, num_rows: usize) -> Result<ArrayRef> {
        if let ScalarValue::Null = self {
            return Ok(Arc::new(NullArray::new(num_rows)));
        }
        let single = self.to_array()?;
        if num_rows == 1 {
            return Ok(single);
        }
        let indices = UInt32Array::from(vec![0u32; num_rows]);
        Ok(take(single.as_ref(), &indices, None)?)
    }
}

fn write_opt<T: fmt::Display>(f: &mut fmt::Formatter<'_>, value: &Option<T>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{v}"),
        None => write!(f, "null"),
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "null"),
            ScalarValue::Boolean(v) => write_opt(f, v),
            ScalarValue::Int8(v) => write_opt(f, v),
            ScalarValue::Int16(v) => write_opt(f, v),
            ScalarValue::Int32(v) => write_opt(f, v),
            ScalarValue::Int64(v) => write_opt(f, v),
            ScalarValue::UInt8(v) => write_opt(f, v),
            ScalarValue::UInt16(v) => write_opt(f, v),
            ScalarValue::UInt32(v) => write_opt(f, v),
            ScalarValue::UInt64(v) => write_opt(f, v),
            ScalarValue::Float32(v) => write_opt(f, v),
            ScalarValue::Float64(v) => write_opt(f, v),
            ScalarValue::Utf8(Some(v))
            | ScalarValue::FixedChar(Some(v), _)
            | ScalarValue::VarChar(Some(v), _) => write!(f, "\"{v}\""),
            ScalarValue::Binary(Some(v)) | ScalarValue::FixedSizeBinary(_, Some(v)) => {
                write!(f, "{v:?}")
            }
            ScalarValue::Uuid(Some(v)) => write!(f, "{v:?}"),
            ScalarValue::Decimal128(v, _, scale) => match v {
                Some(v) => write!(f, "{v}e-{scale}"),
                None => write!(f, "null"),
            },
            ScalarValue::TimestampMicrosecond(v, _) => write_opt(f, v),
            ScalarValue::Date32(v) => write_opt(f, v),
            ScalarValue::Time64Microsecond(v) => write_opt(f, v),
            ScalarValue::IntervalYearMonth(v) => write_opt(f, v),
            ScalarValue::IntervalDayTime(Some(v)) => {
                write!(f, "{}d{}ms", v.days, v.milliseconds)
            }
            ScalarValue::List(_, Some(values)) | ScalarValue::Struct(_, Some(values)) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            _ => write!(f, "null"),
        }
    }
}

macro_rules! impl_from_native {
    ($($native:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$native> for ScalarValue {
                fn from(value: $native) -> Self {
                    ScalarValue::$variant(Some(value))
                }
            }
        )*
    };
}

impl_from_native!(
    bool => Boolean,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Utf8,
);

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(Some(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::AsArray;
    use arrow::datatypes::Int32Type;

    #[test]
    fn test_repeat_primitive() {
        let array = ScalarValue::Int32(Some(7)).to_array_of_size(3).unwrap();
        assert_eq!(array.len(), 3);
        let values = array.as_primitive::<Int32Type>();
        assert!(values.iter().all(|v| v == Some(7)));
    }

    #[test]
    fn test_typed_null() {
        let null = ScalarValue::try_new_null(&DataType::Utf8).unwrap();
        assert!(null.is_null());
        assert_eq!(null.data_type(), DataType::Utf8);

        let array = null.to_array_of_size(2).unwrap();
        assert_eq!(array.null_count(), 2);
    }

    #[test]
    fn test_list_scalar() {
        let field = Arc::new(Field::new("item", DataType::Int32, true));
        let list = ScalarValue::List(
            field.clone(),
            Some(vec![ScalarValue::Int32(Some(1)), ScalarValue::Int32(Some(2))]),
        );
        assert_eq!(list.data_type(), DataType::List(field));

        let array = list.to_array_of_size(2).unwrap();
        let lists = array.as_list::<i32>();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists.value(1).len(), 2);
    }

    #[test]
    fn test_empty_list_scalar() {
        let field = Arc::new(Field::new("item", DataType::Utf8, true));
        let array = ScalarValue::List(field, Some(vec![])).to_array().unwrap();
        assert_eq!(array.as_list::<i32>().value(0).len(), 0);
    }

    #[test]
    fn test_struct_arity_mismatch() {
        let fields = Fields::from(vec![Field::new("a", DataType::Int32, true)]);
        let value = ScalarValue::Struct(fields, Some(vec![]));
        assert!(matches!(value.to_array(), Err(PlanError::Invalid(_))));
    }
}
