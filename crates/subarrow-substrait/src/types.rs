//! Type and schema translation
//!
//! Substrait types carry their own nullability and have no field names;
//! names live in the enclosing `NamedStruct` as a depth-first list covering
//! every struct field, nested ones included.

#![allow(deprecated)]

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Fields, IntervalUnit, Schema, TimeUnit};
use prost::Message;
use substrait::proto::r#type::{self as ptype, Kind, Nullability};
use substrait::proto::{NamedStruct, Type};
use subarrow_plan::types::is_extension_key;
use subarrow_plan::ExtensionType;

use crate::error::{invalid, not_implemented, Result};
use crate::extension_set::ExtensionSet;

/// Microsecond precision, the only timestamp precision with a native match
const MICROS: i32 = 6;

fn nullability(nullable: bool) -> i32 {
    if nullable {
        Nullability::Nullable as i32
    } else {
        Nullability::Required as i32
    }
}

fn is_nullable(nullability: i32) -> bool {
    nullability != Nullability::Required as i32
}

fn kind(kind: Kind) -> Type {
    Type { kind: Some(kind) }
}

/// Translate a native type. Unsigned integers and the null type are encoded
/// as user-defined types, which may add an anchor to `ext_set`.
pub fn to_proto_type(
    data_type: &DataType,
    nullable: bool,
    ext_set: &mut ExtensionSet,
) -> Result<Type> {
    let n = nullability(nullable);
    let ty = match data_type {
        DataType::Boolean => kind(Kind::Bool(ptype::Boolean {
            nullability: n,
            ..Default::default()
        })),
        DataType::Int8 => kind(Kind::I8(ptype::I8 {
            nullability: n,
            ..Default::default()
        })),
        DataType::Int16 => kind(Kind::I16(ptype::I16 {
            nullability: n,
            ..Default::default()
        })),
        DataType::Int32 => kind(Kind::I32(ptype::I32 {
            nullability: n,
            ..Default::default()
        })),
        DataType::Int64 => kind(Kind::I64(ptype::I64 {
            nullability: n,
            ..Default::default()
        })),
        DataType::Float32 => kind(Kind::Fp32(ptype::Fp32 {
            nullability: n,
            ..Default::default()
        })),
        DataType::Float64 => kind(Kind::Fp64(ptype::Fp64 {
            nullability: n,
            ..Default::default()
        })),
        DataType::Utf8 => kind(Kind::String(ptype::String {
            nullability: n,
            ..Default::default()
        })),
        DataType::Binary => kind(Kind::Binary(ptype::Binary {
            nullability: n,
            ..Default::default()
        })),
        DataType::FixedSizeBinary(length) => kind(Kind::FixedBinary(ptype::FixedBinary {
            length: *length,
            nullability: n,
            ..Default::default()
        })),
        DataType::Decimal128(precision, scale) => kind(Kind::Decimal(ptype::Decimal {
            precision: i32::from(*precision),
            scale: i32::from(*scale),
            nullability: n,
            ..Default::default()
        })),
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            kind(Kind::PrecisionTimestamp(ptype::PrecisionTimestamp {
                precision: MICROS,
                nullability: n,
                ..Default::default()
            }))
        }
        DataType::Timestamp(TimeUnit::Microsecond, Some(tz)) if tz.as_ref() == "UTC" => {
            kind(Kind::PrecisionTimestampTz(ptype::PrecisionTimestampTz {
                precision: MICROS,
                nullability: n,
                ..Default::default()
            }))
        }
        DataType::Date32 => kind(Kind::Date(ptype::Date {
            nullability: n,
            ..Default::default()
        })),
        DataType::Time64(TimeUnit::Microsecond) => kind(Kind::Time(ptype::Time {
            nullability: n,
            ..Default::default()
        })),
        DataType::Interval(IntervalUnit::YearMonth) => kind(Kind::IntervalYear(ptype::IntervalYear {
            nullability: n,
            ..Default::default()
        })),
        DataType::Interval(IntervalUnit::DayTime) => kind(Kind::IntervalDay(ptype::IntervalDay {
            nullability: n,
            ..Default::default()
        })),
        DataType::Struct(fields) => kind(Kind::Struct(ptype::Struct {
            types: fields
                .iter()
                .map(|field| to_proto_field(field, ext_set))
                .collect::<Result<Vec<_>>>()?,
            nullability: n,
            ..Default::default()
        })),
        DataType::List(item) => kind(Kind::List(Box::new(ptype::List {
            r#type: Some(Box::new(to_proto_field(item, ext_set)?)),
            nullability: n,
            ..Default::default()
        }))),
        DataType::Map(entries, _) => {
            let DataType::Struct(children) = entries.data_type() else {
                return Err(invalid(format!(
                    "map entries must be a struct, got {}",
                    entries.data_type()
                )));
            };
            let [key, value] = children.iter().collect::<Vec<_>>()[..] else {
                return Err(invalid(format!(
                    "map entries must have 2 fields, got {}",
                    children.len()
                )));
            };
            // Substrait map keys are never null
            let key = to_proto_field(&key.as_ref().clone().with_nullable(false), ext_set)?;
            let value = to_proto_field(value, ext_set)?;
            kind(Kind::Map(Box::new(ptype::Map {
                key: Some(Box::new(key)),
                value: Some(Box::new(value)),
                nullability: n,
                ..Default::default()
            })))
        }
        DataType::Null
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let anchor = ext_set.encode_type(data_type)?;
            kind(Kind::UserDefined(ptype::UserDefined {
                type_reference: anchor,
                nullability: n,
                ..Default::default()
            }))
        }
        other => {
            return Err(not_implemented(format!(
                "type {other} has no Substrait equivalent"
            )))
        }
    };
    Ok(ty)
}

/// Translate a field's type, honouring extension-type annotations.
/// Metadata that Substrait cannot carry is rejected.
pub fn to_proto_field(field: &Field, ext_set: &mut ExtensionSet) -> Result<Type> {
    let n = nullability(field.is_nullable());
    if let Some(ext) = ExtensionType::from_field(field) {
        return Ok(match ext {
            ExtensionType::Uuid => kind(Kind::Uuid(ptype::Uuid {
                nullability: n,
                ..Default::default()
            })),
            ExtensionType::FixedChar(length) => kind(Kind::FixedChar(ptype::FixedChar {
                length,
                nullability: n,
                ..Default::default()
            })),
            ExtensionType::VarChar(length) => kind(Kind::Varchar(ptype::VarChar {
                length,
                nullability: n,
                ..Default::default()
            })),
        });
    }
    if !field.metadata().is_empty() {
        let keys: Vec<&String> = field
            .metadata()
            .keys()
            .filter(|k| !is_extension_key(k))
            .collect();
        return Err(invalid(format!(
            "field '{}' carries metadata {:?} which Substrait cannot represent",
            field.name(),
            if keys.is_empty() {
                field.metadata().keys().collect()
            } else {
                keys
            }
        )));
    }
    to_proto_type(field.data_type(), field.is_nullable(), ext_set)
}

/// Translate a Substrait type into an unnamed field
pub fn from_proto_type(ty: &Type, ext_set: &ExtensionSet) -> Result<Field> {
    let kind = ty
        .kind
        .as_ref()
        .ok_or_else(|| invalid("type with no kind"))?;

    let plain = |data_type: DataType, nullability: i32| {
        Ok(Field::new("", data_type, is_nullable(nullability)))
    };

    match kind {
        Kind::Bool(t) => plain(DataType::Boolean, t.nullability),
        Kind::I8(t) => plain(DataType::Int8, t.nullability),
        Kind::I16(t) => plain(DataType::Int16, t.nullability),
        Kind::I32(t) => plain(DataType::Int32, t.nullability),
        Kind::I64(t) => plain(DataType::Int64, t.nullability),
        Kind::Fp32(t) => plain(DataType::Float32, t.nullability),
        Kind::Fp64(t) => plain(DataType::Float64, t.nullability),
        Kind::String(t) => plain(DataType::Utf8, t.nullability),
        Kind::Binary(t) => plain(DataType::Binary, t.nullability),
        Kind::FixedBinary(t) => plain(DataType::FixedSizeBinary(t.length), t.nullability),
        Kind::Decimal(t) => {
            let precision = u8::try_from(t.precision)
                .ok()
                .filter(|p| (1..=38).contains(p))
                .ok_or_else(|| not_implemented(format!("decimal precision {}", t.precision)))?;
            let scale = i8::try_from(t.scale)
                .map_err(|_| invalid(format!("decimal scale {} out of range", t.scale)))?;
            plain(DataType::Decimal128(precision, scale), t.nullability)
        }
        Kind::Timestamp(t) => plain(
            DataType::Timestamp(TimeUnit::Microsecond, None),
            t.nullability,
        ),
        Kind::TimestampTz(t) => plain(
            DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from("UTC"))),
            t.nullability,
        ),
        Kind::PrecisionTimestamp(t) if t.precision == MICROS => plain(
            DataType::Timestamp(TimeUnit::Microsecond, None),
            t.nullability,
        ),
        Kind::PrecisionTimestampTz(t) if t.precision == MICROS => plain(
            DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from("UTC"))),
            t.nullability,
        ),
        Kind::PrecisionTimestamp(t) => Err(not_implemented(format!(
            "precision_timestamp with precision {}",
            t.precision
        ))),
        Kind::PrecisionTimestampTz(t) => Err(not_implemented(format!(
            "precision_timestamp_tz with precision {}",
            t.precision
        ))),
        Kind::Date(t) => plain(DataType::Date32, t.nullability),
        Kind::Time(t) => plain(DataType::Time64(TimeUnit::Microsecond), t.nullability),
        Kind::IntervalYear(t) => plain(DataType::Interval(IntervalUnit::YearMonth), t.nullability),
        Kind::IntervalDay(t) => plain(DataType::Interval(IntervalUnit::DayTime), t.nullability),
        Kind::Uuid(t) => Ok(ExtensionType::Uuid.field("", is_nullable(t.nullability))),
        Kind::FixedChar(t) => {
            Ok(ExtensionType::FixedChar(t.length).field("", is_nullable(t.nullability)))
        }
        Kind::Varchar(t) => {
            Ok(ExtensionType::VarChar(t.length).field("", is_nullable(t.nullability)))
        }
        Kind::Struct(t) => {
            let children = t
                .types
                .iter()
                .map(|child| from_proto_type(child, ext_set))
                .collect::<Result<Vec<_>>>()?;
            plain(DataType::Struct(Fields::from(children)), t.nullability)
        }
        Kind::List(t) => {
            let item = t
                .r#type
                .as_ref()
                .ok_or_else(|| invalid("list type with no element type"))?;
            let item = from_proto_type(item, ext_set)?.with_name("item");
            plain(DataType::List(Arc::new(item)), t.nullability)
        }
        Kind::Map(t) => {
            let key = t
                .key
                .as_ref()
                .ok_or_else(|| invalid("map type with no key type"))?;
            let value = t
                .value
                .as_ref()
                .ok_or_else(|| invalid("map type with no value type"))?;
            let key = from_proto_type(key, ext_set)?
                .with_name("key")
                .with_nullable(false);
            let value = from_proto_type(value, ext_set)?.with_name("value");
            let entries = Field::new(
                "entries",
                DataType::Struct(Fields::from(vec![key, value])),
                false,
            );
            plain(DataType::Map(Arc::new(entries), false), t.nullability)
        }
        Kind::UserDefined(t) => plain(ext_set.decode_type(t.type_reference)?, t.nullability),
        Kind::UserDefinedTypeReference(anchor) => plain(ext_set.decode_type(*anchor)?, 0),
        other => Err(not_implemented(format!("Substrait type {other:?}"))),
    }
}

pub fn serialize_type(
    data_type: &DataType,
    nullable: bool,
    ext_set: &mut ExtensionSet,
) -> Result<Vec<u8>> {
    Ok(to_proto_type(data_type, nullable, ext_set)?.encode_to_vec())
}

/// Decode a type, returning it with its nullability
pub fn deserialize_type(bytes: &[u8], ext_set: &ExtensionSet) -> Result<(DataType, bool)> {
    let ty = Type::decode(bytes)?;
    let field = from_proto_type(&ty, ext_set)?;
    Ok((field.data_type().clone(), field.is_nullable()))
}

fn collect_names(fields: &Fields, names: &mut Vec<String>) {
    for field in fields.iter() {
        names.push(field.name().clone());
        if let DataType::Struct(children) = field.data_type() {
            collect_names(children, names);
        }
    }
}

/// Depth-first names of every struct field in `schema`
pub fn flattened_names(schema: &Schema) -> Vec<String> {
    let mut names = Vec::new();
    collect_names(schema.fields(), &mut names);
    names
}

/// Count of names a schema's `NamedStruct` must carry
pub fn flattened_field_count(fields: &Fields) -> usize {
    fields
        .iter()
        .map(|field| match field.data_type() {
            DataType::Struct(children) => 1 + flattened_field_count(children),
            _ => 1,
        })
        .sum()
}

fn attach_names(
    field: &Field,
    names: &[String],
    next: &mut usize,
) -> Result<Field> {
    let name = names.get(*next).ok_or_else(|| {
        invalid(format!(
            "too few names ({}) were provided for the struct fields",
            names.len()
        ))
    })?;
    *next += 1;
    let renamed = field.clone().with_name(name.clone());
    match field.data_type() {
        DataType::Struct(children) => {
            let children = children
                .iter()
                .map(|child| attach_names(child, names, next))
                .collect::<Result<Vec<_>>>()?;
            Ok(renamed.with_data_type(DataType::Struct(Fields::from(children))))
        }
        _ => Ok(renamed),
    }
}

/// Rename `fields` from a depth-first name list, which must match exactly
pub fn rename_fields(fields: &Fields, names: &[String]) -> Result<Vec<Field>> {
    let mut next = 0;
    let renamed = fields
        .iter()
        .map(|field| attach_names(field, names, &mut next))
        .collect::<Result<Vec<_>>>()?;
    if next != names.len() {
        return Err(invalid(format!(
            "too many names ({}) were provided for {} struct fields",
            names.len(),
            next
        )));
    }
    Ok(renamed)
}

pub fn to_proto_schema(schema: &Schema, ext_set: &mut ExtensionSet) -> Result<NamedStruct> {
    if !schema.metadata().is_empty() {
        return Err(invalid(format!(
            "schema metadata {:?} cannot be represented in Substrait",
            schema.metadata().keys().collect::<Vec<_>>()
        )));
    }
    let types = schema
        .fields()
        .iter()
        .map(|field| to_proto_field(field, ext_set))
        .collect::<Result<Vec<_>>>()?;
    Ok(NamedStruct {
        names: flattened_names(schema),
        r#struct: Some(ptype::Struct {
            types,
            nullability: Nullability::Required as i32,
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn from_proto_schema(named: &NamedStruct, ext_set: &ExtensionSet) -> Result<Schema> {
    let st = named
        .r#struct
        .as_ref()
        .ok_or_else(|| invalid("named struct with no struct type"))?;
    let fields = st
        .types
        .iter()
        .map(|ty| from_proto_type(ty, ext_set))
        .collect::<Result<Vec<_>>>()?;
    let fields = rename_fields(&Fields::from(fields), &named.names)?;
    Ok(Schema::new(fields))
}

pub fn serialize_schema(schema: &Schema, ext_set: &mut ExtensionSet) -> Result<Vec<u8>> {
    Ok(to_proto_schema(schema, ext_set)?.encode_to_vec())
}

pub fn deserialize_schema(bytes: &[u8], ext_set: &ExtensionSet) -> Result<Schema> {
    let named = NamedStruct::decode(bytes)?;
    from_proto_schema(&named, ext_set)
}
