//! Literal translation

#![allow(deprecated)]

use std::sync::Arc;

use arrow::datatypes::{Field, Fields, IntervalDayTime};
use substrait::proto::expression::literal::interval_day_to_second::PrecisionMode;
use substrait::proto::expression::literal::{self as pliteral, LiteralType};
use substrait::proto::expression::Literal;
use substrait::proto::r#type::{self as ptype, Nullability};
use subarrow_plan::{ExtensionType, ScalarValue};

use crate::error::{invalid, not_implemented, Result};
use crate::extension_set::ExtensionSet;
use crate::types::{from_proto_type, to_proto_field};

const MICROS: i32 = 6;
/// Day-time intervals are held at millisecond resolution
const MILLIS: i32 = 3;

fn value(literal_type: LiteralType) -> Literal {
    Literal {
        nullable: false,
        literal_type: Some(literal_type),
        ..Default::default()
    }
}

/// The field a scalar's type serializes as, keeping extension annotations
fn scalar_field(scalar: &ScalarValue) -> Field {
    match scalar {
        ScalarValue::Uuid(_) => ExtensionType::Uuid.field("", true),
        ScalarValue::FixedChar(_, length) => ExtensionType::FixedChar(*length).field("", true),
        ScalarValue::VarChar(_, length) => {
            ExtensionType::VarChar(i32::try_from(*length).unwrap_or(i32::MAX)).field("", true)
        }
        other => Field::new("", other.data_type(), true),
    }
}

pub fn to_proto_literal(scalar: &ScalarValue, ext_set: &mut ExtensionSet) -> Result<Literal> {
    if scalar.is_null() {
        let ty = to_proto_field(&scalar_field(scalar), ext_set)?;
        return Ok(Literal {
            nullable: true,
            literal_type: Some(LiteralType::Null(ty)),
            ..Default::default()
        });
    }

    let literal_type = match scalar {
        ScalarValue::Boolean(Some(v)) => LiteralType::Boolean(*v),
        ScalarValue::Int8(Some(v)) => LiteralType::I8(i32::from(*v)),
        ScalarValue::Int16(Some(v)) => LiteralType::I16(i32::from(*v)),
        ScalarValue::Int32(Some(v)) => LiteralType::I32(*v),
        ScalarValue::Int64(Some(v)) => LiteralType::I64(*v),
        ScalarValue::Float32(Some(v)) => LiteralType::Fp32(*v),
        ScalarValue::Float64(Some(v)) => LiteralType::Fp64(*v),
        ScalarValue::Utf8(Some(v)) => LiteralType::String(v.clone()),
        ScalarValue::FixedChar(Some(v), _) => LiteralType::FixedChar(v.clone()),
        ScalarValue::VarChar(Some(v), length) => LiteralType::VarChar(pliteral::VarChar {
            value: v.clone(),
            length: *length,
            ..Default::default()
        }),
        ScalarValue::Binary(Some(v)) => LiteralType::Binary(v.clone()),
        ScalarValue::FixedSizeBinary(_, Some(v)) => LiteralType::FixedBinary(v.clone()),
        ScalarValue::Uuid(Some(v)) => LiteralType::Uuid(v.to_vec()),
        ScalarValue::Decimal128(Some(v), precision, scale) => {
            LiteralType::Decimal(pliteral::Decimal {
                value: v.to_le_bytes().to_vec(),
                precision: i32::from(*precision),
                scale: i32::from(*scale),
                ..Default::default()
            })
        }
        ScalarValue::TimestampMicrosecond(Some(v), None) => {
            LiteralType::PrecisionTimestamp(pliteral::PrecisionTimestamp {
                precision: MICROS,
                value: *v,
                ..Default::default()
            })
        }
        ScalarValue::TimestampMicrosecond(Some(v), Some(tz)) if tz.as_ref() == "UTC" => {
            LiteralType::PrecisionTimestampTz(pliteral::PrecisionTimestamp {
                precision: MICROS,
                value: *v,
                ..Default::default()
            })
        }
        ScalarValue::Date32(Some(v)) => LiteralType::Date(*v),
        ScalarValue::Time64Microsecond(Some(v)) => LiteralType::Time(*v),
        ScalarValue::IntervalYearMonth(Some(months)) => {
            LiteralType::IntervalYearToMonth(pliteral::IntervalYearToMonth {
                years: months / 12,
                months: months % 12,
                ..Default::default()
            })
        }
        ScalarValue::IntervalDayTime(Some(v)) => {
            LiteralType::IntervalDayToSecond(pliteral::IntervalDayToSecond {
                days: v.days,
                seconds: v.milliseconds / 1000,
                subseconds: i64::from(v.milliseconds % 1000),
                precision_mode: Some(PrecisionMode::Precision(MILLIS)),
                ..Default::default()
            })
        }
        ScalarValue::List(field, Some(values)) if values.is_empty() => {
            LiteralType::EmptyList(ptype::List {
                r#type: Some(Box::new(to_proto_field(field, ext_set)?)),
                nullability: Nullability::Required as i32,
                ..Default::default()
            })
        }
        ScalarValue::List(_, Some(values)) => LiteralType::List(pliteral::List {
            values: values
                .iter()
                .map(|v| to_proto_literal(v, ext_set))
                .collect::<Result<Vec<_>>>()?,
            ..Default::default()
        }),
        ScalarValue::Struct(_, Some(values)) => LiteralType::Struct(pliteral::Struct {
            fields: values
                .iter()
                .map(|v| to_proto_literal(v, ext_set))
                .collect::<Result<Vec<_>>>()?,
            ..Default::default()
        }),
        other => {
            return Err(not_implemented(format!(
                "literal of type {} has no Substrait equivalent",
                other.data_type()
            )))
        }
    };
    Ok(value(literal_type))
}

fn narrow<T: TryFrom<i32>>(v: i32, what: &str) -> Result<T> {
    T::try_from(v).map_err(|_| invalid(format!("{what} literal {v} out of range")))
}

/// Milliseconds held by an interval's subsecond part
fn subsecond_millis(subseconds: i64, mode: Option<&PrecisionMode>) -> Result<i64> {
    let precision = match mode {
        Some(PrecisionMode::Precision(p)) => *p,
        Some(PrecisionMode::Microseconds(us)) => return Ok(i64::from(*us) / 1000),
        None => MICROS,
    };
    if !(0..=9).contains(&precision) {
        return Err(invalid(format!(
            "interval subsecond precision {precision} out of range"
        )));
    }
    Ok(if precision >= MILLIS {
        subseconds / 10i64.pow((precision - MILLIS) as u32)
    } else {
        subseconds * 10i64.pow((MILLIS - precision) as u32)
    })
}

pub fn from_proto_literal(literal: &Literal, ext_set: &ExtensionSet) -> Result<ScalarValue> {
    let literal_type = literal
        .literal_type
        .as_ref()
        .ok_or_else(|| invalid("literal with no value"))?;

    let scalar = match literal_type {
        LiteralType::Boolean(v) => ScalarValue::Boolean(Some(*v)),
        LiteralType::I8(v) => ScalarValue::Int8(Some(narrow(*v, "i8")?)),
        LiteralType::I16(v) => ScalarValue::Int16(Some(narrow(*v, "i16")?)),
        LiteralType::I32(v) => ScalarValue::Int32(Some(*v)),
        LiteralType::I64(v) => ScalarValue::Int64(Some(*v)),
        LiteralType::Fp32(v) => ScalarValue::Float32(Some(*v)),
        LiteralType::Fp64(v) => ScalarValue::Float64(Some(*v)),
        LiteralType::String(v) => ScalarValue::Utf8(Some(v.clone())),
        LiteralType::FixedChar(v) => {
            let length = i32::try_from(v.chars().count())
                .map_err(|_| invalid("fixed_char literal too long"))?;
            ScalarValue::FixedChar(Some(v.clone()), length)
        }
        LiteralType::VarChar(v) => ScalarValue::VarChar(Some(v.value.clone()), v.length),
        LiteralType::Binary(v) => ScalarValue::Binary(Some(v.clone())),
        LiteralType::FixedBinary(v) => {
            let size = i32::try_from(v.len())
                .map_err(|_| invalid("fixed_binary literal too long"))?;
            ScalarValue::FixedSizeBinary(size, Some(v.clone()))
        }
        LiteralType::Uuid(v) => {
            let bytes: [u8; 16] = v.as_slice().try_into().map_err(|_| {
                invalid(format!("uuid literal must be 16 bytes, got {}", v.len()))
            })?;
            ScalarValue::Uuid(Some(bytes))
        }
        LiteralType::Decimal(d) => {
            let bytes: [u8; 16] = d.value.as_slice().try_into().map_err(|_| {
                invalid(format!(
                    "decimal literal must be 16 bytes, got {}",
                    d.value.len()
                ))
            })?;
            let precision = u8::try_from(d.precision)
                .ok()
                .filter(|p| (1..=38).contains(p))
                .ok_or_else(|| not_implemented(format!("decimal precision {}", d.precision)))?;
            let scale = narrow(d.scale, "decimal scale")?;
            ScalarValue::Decimal128(Some(i128::from_le_bytes(bytes)), precision, scale)
        }
        LiteralType::Timestamp(v) => ScalarValue::TimestampMicrosecond(Some(*v), None),
        LiteralType::TimestampTz(v) => {
            ScalarValue::TimestampMicrosecond(Some(*v), Some(Arc::from("UTC")))
        }
        LiteralType::PrecisionTimestamp(ts) if ts.precision == MICROS => {
            ScalarValue::TimestampMicrosecond(Some(ts.value), None)
        }
        LiteralType::PrecisionTimestampTz(ts) if ts.precision == MICROS => {
            ScalarValue::TimestampMicrosecond(Some(ts.value), Some(Arc::from("UTC")))
        }
        LiteralType::PrecisionTimestamp(ts) | LiteralType::PrecisionTimestampTz(ts) => {
            return Err(not_implemented(format!(
                "timestamp literal with precision {}",
                ts.precision
            )))
        }
        LiteralType::Date(v) => ScalarValue::Date32(Some(*v)),
        LiteralType::Time(v) => ScalarValue::Time64Microsecond(Some(*v)),
        LiteralType::IntervalYearToMonth(v) => {
            let months = v
                .years
                .checked_mul(12)
                .and_then(|months| months.checked_add(v.months))
                .ok_or_else(|| invalid("interval_year literal out of range"))?;
            ScalarValue::IntervalYearMonth(Some(months))
        }
        LiteralType::IntervalDayToSecond(v) => {
            let millis = i64::from(v.seconds) * 1000
                + subsecond_millis(v.subseconds, v.precision_mode.as_ref())?;
            let millis = i32::try_from(millis)
                .map_err(|_| invalid("interval_day literal seconds out of range"))?;
            ScalarValue::IntervalDayTime(Some(IntervalDayTime::new(v.days, millis)))
        }
        LiteralType::Struct(s) => {
            let values = s
                .fields
                .iter()
                .map(|field| from_proto_literal(field, ext_set))
                .collect::<Result<Vec<_>>>()?;
            let fields: Vec<Field> = values
                .iter()
                .map(|v| Field::new("", v.data_type(), true))
                .collect();
            ScalarValue::Struct(Fields::from(fields), Some(values))
        }
        LiteralType::List(list) => {
            let values = list
                .values
                .iter()
                .map(|v| from_proto_literal(v, ext_set))
                .collect::<Result<Vec<_>>>()?;
            let Some(first) = values.first() else {
                return Err(invalid(
                    "list literal has no values; empty lists must use empty_list",
                ));
            };
            let data_type = first.data_type();
            if let Some(other) = values.iter().find(|v| v.data_type() != data_type) {
                return Err(invalid(format!(
                    "list literal mixes {data_type} and {}",
                    other.data_type()
                )));
            }
            let item = Field::new("item", data_type, true);
            ScalarValue::List(Arc::new(item), Some(values))
        }
        LiteralType::EmptyList(list) => {
            let item = list
                .r#type
                .as_ref()
                .ok_or_else(|| invalid("empty_list literal with no element type"))?;
            let item = from_proto_type(item, ext_set)?.with_name("item");
            ScalarValue::List(Arc::new(item), Some(vec![]))
        }
        LiteralType::Null(ty) => {
            let field = from_proto_type(ty, ext_set)?;
            if !field.is_nullable() {
                return Err(invalid(format!(
                    "null literal of non-nullable type {}",
                    field.data_type()
                )));
            }
            match ExtensionType::from_field(&field) {
                Some(ExtensionType::Uuid) => ScalarValue::Uuid(None),
                Some(ExtensionType::FixedChar(length)) => ScalarValue::FixedChar(None, length),
                Some(ExtensionType::VarChar(length)) => {
                    let length = u32::try_from(length)
                        .map_err(|_| invalid(format!("varchar length {length} is negative")))?;
                    ScalarValue::VarChar(None, length)
                }
                None => ScalarValue::try_new_null(field.data_type())?,
            }
        }
        other => {
            return Err(not_implemented(format!("literal {other:?}")))
        }
    };
    Ok(scalar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubstraitError;
    use arrow::datatypes::DataType;

    fn round_trip(scalar: ScalarValue) -> ScalarValue {
        let mut ext_set = ExtensionSet::default();
        let literal = to_proto_literal(&scalar, &mut ext_set).unwrap();
        from_proto_literal(&literal, &ext_set).unwrap()
    }

    #[test]
    fn test_primitive_literals_round_trip() {
        for scalar in [
            ScalarValue::Boolean(Some(true)),
            ScalarValue::Int8(Some(-3)),
            ScalarValue::Int16(Some(300)),
            ScalarValue::Int32(Some(1 << 20)),
            ScalarValue::Int64(Some(-(1 << 40))),
            ScalarValue::Float32(Some(1.5)),
            ScalarValue::Float64(Some(-2.25)),
            ScalarValue::Utf8(Some("hello".to_string())),
            ScalarValue::Binary(Some(vec![0, 1, 2])),
            ScalarValue::FixedSizeBinary(3, Some(vec![7, 8, 9])),
            ScalarValue::Uuid(Some([0x42; 16])),
            ScalarValue::Decimal128(Some(-123456789), 27, 5),
            ScalarValue::TimestampMicrosecond(Some(1_600_000_000_000_000), None),
            ScalarValue::TimestampMicrosecond(Some(42), Some(Arc::from("UTC"))),
            ScalarValue::Date32(Some(19_000)),
            ScalarValue::Time64Microsecond(Some(3_600_000_000)),
            ScalarValue::IntervalYearMonth(Some(27)),
            ScalarValue::IntervalDayTime(Some(IntervalDayTime::new(3, 4_567))),
            ScalarValue::FixedChar(Some("abc".to_string()), 3),
            ScalarValue::VarChar(Some("abc".to_string()), 10),
        ] {
            assert_eq!(round_trip(scalar.clone()), scalar);
        }
    }

    #[test]
    fn test_nested_literals_round_trip() {
        let item = Arc::new(Field::new("item", DataType::Int64, true));
        let list = ScalarValue::List(
            item.clone(),
            Some(vec![ScalarValue::Int64(Some(1)), ScalarValue::Int64(None)]),
        );
        assert_eq!(round_trip(list.clone()), list);

        let empty = ScalarValue::List(item, Some(vec![]));
        assert_eq!(round_trip(empty.clone()), empty);

        let fields = Fields::from(vec![
            Field::new("", DataType::Int32, true),
            Field::new("", DataType::Utf8, true),
        ]);
        let st = ScalarValue::Struct(
            fields,
            Some(vec![ScalarValue::Int32(Some(1)), ScalarValue::from("x")]),
        );
        assert_eq!(round_trip(st.clone()), st);
    }

    #[test]
    fn test_null_literals_round_trip() {
        for scalar in [
            ScalarValue::Null,
            ScalarValue::Int32(None),
            ScalarValue::UInt16(None),
            ScalarValue::Utf8(None),
            ScalarValue::Uuid(None),
            ScalarValue::FixedChar(None, 4),
            ScalarValue::Decimal128(None, 10, 2),
        ] {
            assert_eq!(round_trip(scalar.clone()), scalar);
        }
    }

    #[test]
    fn test_unsigned_values_not_implemented() {
        let mut ext_set = ExtensionSet::default();
        assert!(matches!(
            to_proto_literal(&ScalarValue::UInt32(Some(1)), &mut ext_set),
            Err(SubstraitError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_malformed_literals() {
        let ext_set = ExtensionSet::default();

        let empty_list = value(LiteralType::List(pliteral::List {
            values: vec![],
            ..Default::default()
        }));
        assert!(matches!(
            from_proto_literal(&empty_list, &ext_set),
            Err(SubstraitError::Invalid(_))
        ));

        let short_decimal = value(LiteralType::Decimal(pliteral::Decimal {
            value: vec![1, 2, 3],
            precision: 10,
            scale: 2,
            ..Default::default()
        }));
        assert!(matches!(
            from_proto_literal(&short_decimal, &ext_set),
            Err(SubstraitError::Invalid(_))
        ));

        let wide_i8 = value(LiteralType::I8(1000));
        assert!(matches!(
            from_proto_literal(&wide_i8, &ext_set),
            Err(SubstraitError::Invalid(_))
        ));
    }

    #[test]
    fn test_out_of_range_interval_and_length() {
        let ext_set = ExtensionSet::default();

        let years = value(LiteralType::IntervalYearToMonth(
            pliteral::IntervalYearToMonth {
                years: i32::MAX / 12 + 1,
                months: 0,
                ..Default::default()
            },
        ));
        assert!(matches!(
            from_proto_literal(&years, &ext_set),
            Err(SubstraitError::Invalid(_))
        ));
        let months = value(LiteralType::IntervalYearToMonth(
            pliteral::IntervalYearToMonth {
                years: i32::MAX / 12,
                months: 12,
                ..Default::default()
            },
        ));
        assert!(matches!(
            from_proto_literal(&months, &ext_set),
            Err(SubstraitError::Invalid(_))
        ));

        let negative_varchar = Literal {
            nullable: true,
            literal_type: Some(LiteralType::Null(substrait::proto::Type {
                kind: Some(ptype::Kind::Varchar(ptype::VarChar {
                    length: -1,
                    nullability: Nullability::Nullable as i32,
                    ..Default::default()
                })),
            })),
            ..Default::default()
        };
        assert!(matches!(
            from_proto_literal(&negative_varchar, &ext_set),
            Err(SubstraitError::Invalid(_))
        ));
    }

    #[test]
    fn test_null_of_required_type() {
        let mut ext_set = ExtensionSet::default();
        let ty = crate::types::to_proto_type(&DataType::Int32, false, &mut ext_set).unwrap();
        let literal = Literal {
            nullable: true,
            literal_type: Some(LiteralType::Null(ty)),
            ..Default::default()
        };
        assert!(matches!(
            from_proto_literal(&literal, &ext_set),
            Err(SubstraitError::Invalid(_))
        ));
    }

    #[test]
    fn test_interval_precision_scaling() {
        let ext_set = ExtensionSet::default();
        let literal = value(LiteralType::IntervalDayToSecond(
            pliteral::IntervalDayToSecond {
                days: 1,
                seconds: 2,
                subseconds: 250_000,
                precision_mode: Some(PrecisionMode::Precision(6)),
                ..Default::default()
            },
        ));
        assert_eq!(
            from_proto_literal(&literal, &ext_set).unwrap(),
            ScalarValue::IntervalDayTime(Some(IntervalDayTime::new(1, 2_250)))
        );
    }
}
