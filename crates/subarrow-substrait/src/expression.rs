//! Expression translation
//!
//! Field selections fold into native field paths where possible. A chain of
//! struct-field segments below an arbitrary expression becomes a
//! `struct_field` call and a list-element segment becomes `list_element`.
//! Both directions use the same folding so exported selections stay compact.

#![allow(deprecated)]

use prost::Message;
use substrait::proto::expression::field_reference::{
    ReferenceType as FieldReferenceType, RootReference, RootType,
};
use substrait::proto::expression::if_then::IfClause;
use substrait::proto::expression::reference_segment::{
    ListElement, ReferenceType as SegmentType, StructField,
};
use substrait::proto::expression::{
    Cast as ProtoCast, FieldReference, IfThen, ReferenceSegment, RexType, ScalarFunction,
};
use substrait::proto::function_argument::ArgType;
use substrait::proto::{Expression as ProtoExpression, FunctionArgument};
use subarrow_plan::expression::{CASE_WHEN, CAST, IF_ELSE, LIST_ELEMENT, MAKE_STRUCT, STRUCT_FIELD};
use subarrow_plan::{
    call, call_with_options, field, Call, Expression, FieldPath, FieldRef, FunctionOptions,
    ScalarValue,
};

use crate::error::{invalid, not_implemented, Result};
use crate::extension_set::ExtensionSet;
use crate::literal::{from_proto_literal, to_proto_literal};
use crate::types::{from_proto_type, to_proto_type};

fn rex(rex_type: RexType) -> ProtoExpression {
    ProtoExpression {
        rex_type: Some(rex_type),
    }
}

fn rex_name(rex_type: &RexType) -> &'static str {
    match rex_type {
        RexType::Literal(_) => "literal",
        RexType::Selection(_) => "selection",
        RexType::ScalarFunction(_) => "scalar_function",
        RexType::WindowFunction(_) => "window_function",
        RexType::IfThen(_) => "if_then",
        RexType::SwitchExpression(_) => "switch_expression",
        RexType::SingularOrList(_) => "singular_or_list",
        RexType::MultiOrList(_) => "multi_or_list",
        RexType::Cast(_) => "cast",
        RexType::Subquery(_) => "subquery",
        RexType::Nested(_) => "nested",
        _ => "unknown",
    }
}

fn field_index(field: i32) -> Result<usize> {
    usize::try_from(field).map_err(|_| invalid(format!("negative field index {field}")))
}

/// Apply one struct-field step to a partially decoded selection
fn select_struct_field(out: Option<Expression>, index: usize) -> Expression {
    match out {
        None => field(FieldRef::path(vec![index])),
        Some(Expression::Field(FieldRef::Path(FieldPath(mut indices)))) => {
            indices.push(index);
            field(FieldRef::path(indices))
        }
        Some(Expression::Call(mut c)) if c.function == STRUCT_FIELD => {
            if let Some(FunctionOptions::StructField { indices }) = &mut c.options {
                indices.push(index);
            }
            Expression::Call(c)
        }
        Some(other) => call_with_options(
            STRUCT_FIELD,
            vec![other],
            FunctionOptions::StructField {
                indices: vec![index],
            },
        ),
    }
}

fn from_proto_selection(selection: &FieldReference, ext_set: &ExtensionSet) -> Result<Expression> {
    let mut out = match &selection.root_type {
        None | Some(RootType::RootReference(_)) => None,
        Some(RootType::Expression(base)) => Some(from_proto_expression(base, ext_set)?),
        Some(RootType::OuterReference(_)) => {
            return Err(not_implemented("outer references"));
        }
    };

    let segment = match &selection.reference_type {
        Some(FieldReferenceType::DirectReference(segment)) => segment,
        Some(FieldReferenceType::MaskedReference(_)) => {
            return Err(not_implemented("masked field references"));
        }
        None => return Err(invalid("field reference with no reference type")),
    };

    let mut next: Option<&ReferenceSegment> = Some(segment);
    while let Some(segment) = next {
        match &segment.reference_type {
            Some(SegmentType::StructField(sf)) => {
                out = Some(select_struct_field(out, field_index(sf.field)?));
                next = sf.child.as_deref();
            }
            Some(SegmentType::ListElement(le)) => {
                let list = out.take().ok_or_else(|| {
                    invalid("list element reference applied to the input row, which is not a list")
                })?;
                let offset = Expression::Literal(ScalarValue::Int32(Some(le.offset)));
                out = Some(call(LIST_ELEMENT, vec![list, offset]));
                next = le.child.as_deref();
            }
            Some(SegmentType::MapKey(_)) => return Err(not_implemented("map key references")),
            None => return Err(invalid("reference segment with no reference type")),
        }
    }
    out.ok_or_else(|| invalid("empty field reference"))
}

pub(crate) fn from_proto_arguments(
    arguments: &[FunctionArgument],
    deprecated_args: &[ProtoExpression],
    ext_set: &ExtensionSet,
) -> Result<Vec<Expression>> {
    if arguments.is_empty() {
        return deprecated_args
            .iter()
            .map(|arg| from_proto_expression(arg, ext_set))
            .collect();
    }
    let mut out = Vec::with_capacity(arguments.len());
    for argument in arguments {
        match &argument.arg_type {
            Some(ArgType::Value(value)) => out.push(from_proto_expression(value, ext_set)?),
            // enum and type arguments select an overload, which natives resolve from types
            Some(ArgType::Enum(_)) | Some(ArgType::Type(_)) => {}
            None => return Err(invalid("function argument with no value")),
        }
    }
    Ok(out)
}

fn from_proto_if_then(if_then: &IfThen, ext_set: &ExtensionSet) -> Result<Expression> {
    if if_then.ifs.is_empty() {
        return Err(invalid("if_then expression with no clauses"));
    }
    let mut conditions = Vec::with_capacity(if_then.ifs.len());
    let mut values = Vec::with_capacity(if_then.ifs.len() + 1);
    for clause in &if_then.ifs {
        let condition = clause
            .r#if
            .as_ref()
            .ok_or_else(|| invalid("if clause with no condition"))?;
        let then = clause
            .then
            .as_ref()
            .ok_or_else(|| invalid("if clause with no result"))?;
        conditions.push(from_proto_expression(condition, ext_set)?);
        values.push(from_proto_expression(then, ext_set)?);
    }
    let otherwise = if_then
        .r#else
        .as_deref()
        .ok_or_else(|| not_implemented("if_then expressions with no else"))?;
    let otherwise = from_proto_expression(otherwise, ext_set)?;

    // a single clause always decodes as if_else, even when exported from case_when
    if conditions.len() == 1 {
        let mut arguments = conditions;
        arguments.append(&mut values);
        arguments.push(otherwise);
        return Ok(call(IF_ELSE, arguments));
    }

    let field_names = (1..=conditions.len()).map(|i| format!("cond{i}")).collect();
    let mut arguments = vec![call_with_options(
        MAKE_STRUCT,
        conditions,
        FunctionOptions::MakeStruct { field_names },
    )];
    arguments.append(&mut values);
    arguments.push(otherwise);
    Ok(call(CASE_WHEN, arguments))
}

fn from_proto_cast(cast: &ProtoCast, ext_set: &ExtensionSet) -> Result<Expression> {
    let ty = cast
        .r#type
        .as_ref()
        .ok_or_else(|| invalid("cast with no target type"))?;
    let input = cast
        .input
        .as_deref()
        .ok_or_else(|| invalid("cast with no input"))?;
    let to = from_proto_type(ty, ext_set)?.data_type().clone();
    Ok(call_with_options(
        CAST,
        vec![from_proto_expression(input, ext_set)?],
        FunctionOptions::Cast { to },
    ))
}

/// Translate a Substrait expression into a native one
pub fn from_proto_expression(expr: &ProtoExpression, ext_set: &ExtensionSet) -> Result<Expression> {
    let rex_type = expr
        .rex_type
        .as_ref()
        .ok_or_else(|| invalid("expression with no rex type"))?;
    match rex_type {
        RexType::Literal(literal) => Ok(Expression::Literal(from_proto_literal(literal, ext_set)?)),
        RexType::Selection(selection) => from_proto_selection(selection, ext_set),
        RexType::ScalarFunction(function) => {
            let name = ext_set.decode_function(function.function_reference)?;
            let arguments = from_proto_arguments(&function.arguments, &function.args, ext_set)?;
            Ok(call(name, arguments))
        }
        RexType::IfThen(if_then) => from_proto_if_then(if_then, ext_set),
        RexType::Cast(cast) => from_proto_cast(cast, ext_set),
        other => Err(not_implemented(format!(
            "Substrait {} expressions",
            rex_name(other)
        ))),
    }
}

enum Step {
    Field(i32),
    List(i32),
}

fn index_i32(index: usize) -> Result<i32> {
    i32::try_from(index).map_err(|_| invalid(format!("field index {index} too large")))
}

/// Split a selection-shaped expression into the expression it selects from
/// (`None` for the input row) and the steps taken below it
fn split_selection<'a>(expr: &'a Expression) -> Result<(Option<&'a Expression>, Vec<Step>)> {
    match expr {
        Expression::Field(FieldRef::Path(path)) => Ok((
            None,
            path.indices()
                .iter()
                .map(|&i| index_i32(i).map(Step::Field))
                .collect::<Result<_>>()?,
        )),
        Expression::Field(FieldRef::Index(index)) => Ok((None, vec![Step::Field(index_i32(*index)?)])),
        Expression::Field(other) => Err(invalid(format!(
            "field reference {other} must be bound before export"
        ))),
        Expression::Call(c) if c.function == STRUCT_FIELD && c.arguments.len() == 1 => {
            let Some(FunctionOptions::StructField { indices }) = &c.options else {
                return Err(invalid("struct_field requires field indices"));
            };
            let (root, mut steps) = split_selection(&c.arguments[0])?;
            for &index in indices {
                steps.push(Step::Field(index_i32(index)?));
            }
            Ok((root, steps))
        }
        Expression::Call(c) if c.function == LIST_ELEMENT && c.arguments.len() == 2 => {
            let offset = c.arguments[1]
                .as_literal()
                .and_then(ScalarValue::as_i64)
                .and_then(|v| i32::try_from(v).ok());
            match offset {
                Some(offset) => {
                    let (root, mut steps) = split_selection(&c.arguments[0])?;
                    steps.push(Step::List(offset));
                    Ok((root, steps))
                }
                None => Ok((Some(expr), vec![])),
            }
        }
        other => Ok((Some(other), vec![])),
    }
}

fn build_segment(steps: &[Step]) -> Option<ReferenceSegment> {
    let (first, rest) = steps.split_first()?;
    let child = build_segment(rest).map(Box::new);
    let reference_type = match first {
        Step::Field(index) => SegmentType::StructField(Box::new(StructField {
            field: *index,
            child,
        })),
        Step::List(offset) => SegmentType::ListElement(Box::new(ListElement {
            offset: *offset,
            child,
        })),
    };
    Some(ReferenceSegment {
        reference_type: Some(reference_type),
    })
}

fn to_proto_selection(expr: &Expression, ext_set: &mut ExtensionSet) -> Result<Option<ProtoExpression>> {
    let (root, steps) = split_selection(expr)?;
    let Some(segment) = build_segment(&steps) else {
        return Ok(None);
    };
    let root_type = match root {
        None => RootType::RootReference(RootReference {}),
        Some(base) => RootType::Expression(Box::new(to_proto_call_or_literal(base, ext_set)?)),
    };
    Ok(Some(rex(RexType::Selection(Box::new(FieldReference {
        reference_type: Some(FieldReferenceType::DirectReference(segment)),
        root_type: Some(root_type),
    })))))
}

fn value_argument(expr: &Expression, ext_set: &mut ExtensionSet) -> Result<FunctionArgument> {
    Ok(FunctionArgument {
        arg_type: Some(ArgType::Value(to_proto_expression(expr, ext_set)?)),
    })
}

fn if_clause(condition: &Expression, then: &Expression, ext_set: &mut ExtensionSet) -> Result<IfClause> {
    Ok(IfClause {
        r#if: Some(to_proto_expression(condition, ext_set)?),
        then: Some(to_proto_expression(then, ext_set)?),
    })
}

fn to_proto_case_when(c: &Call, ext_set: &mut ExtensionSet) -> Result<ProtoExpression> {
    let conditions = match c.arguments.first() {
        Some(Expression::Call(conds)) if conds.function == MAKE_STRUCT => &conds.arguments,
        _ => {
            return Err(invalid(
                "case_when requires a make_struct of conditions as first argument",
            ))
        }
    };
    let values = &c.arguments[1..];
    if values.len() == conditions.len() {
        return Err(not_implemented("case_when with no else value"));
    }
    if values.len() != conditions.len() + 1 {
        return Err(invalid(format!(
            "case_when has {} conditions but {} values",
            conditions.len(),
            values.len()
        )));
    }
    let ifs = conditions
        .iter()
        .zip(values)
        .map(|(condition, then)| if_clause(condition, then, ext_set))
        .collect::<Result<Vec<_>>>()?;
    let otherwise = to_proto_expression(&values[conditions.len()], ext_set)?;
    Ok(rex(RexType::IfThen(Box::new(IfThen {
        ifs,
        r#else: Some(Box::new(otherwise)),
    }))))
}

fn to_proto_call(c: &Call, ext_set: &mut ExtensionSet) -> Result<ProtoExpression> {
    match c.function.as_str() {
        IF_ELSE => {
            let [condition, then, otherwise] = c.arguments.as_slice() else {
                return Err(invalid(format!(
                    "if_else takes 3 arguments, got {}",
                    c.arguments.len()
                )));
            };
            Ok(rex(RexType::IfThen(Box::new(IfThen {
                ifs: vec![if_clause(condition, then, ext_set)?],
                r#else: Some(Box::new(to_proto_expression(otherwise, ext_set)?)),
            }))))
        }
        CASE_WHEN => to_proto_case_when(c, ext_set),
        CAST => {
            let (Some(FunctionOptions::Cast { to }), [input]) = (&c.options, c.arguments.as_slice())
            else {
                return Err(invalid("cast takes one argument and a target type"));
            };
            Ok(rex(RexType::Cast(Box::new(ProtoCast {
                r#type: Some(to_proto_type(to, true, ext_set)?),
                input: Some(Box::new(to_proto_expression(input, ext_set)?)),
                ..Default::default()
            }))))
        }
        MAKE_STRUCT | STRUCT_FIELD | LIST_ELEMENT => Err(not_implemented(format!(
            "{} outside a field selection",
            c.function
        ))),
        name => {
            let function_reference = ext_set.encode_function(name)?;
            let arguments = c
                .arguments
                .iter()
                .map(|arg| value_argument(arg, ext_set))
                .collect::<Result<Vec<_>>>()?;
            Ok(rex(RexType::ScalarFunction(ScalarFunction {
                function_reference,
                arguments,
                ..Default::default()
            })))
        }
    }
}

fn to_proto_call_or_literal(expr: &Expression, ext_set: &mut ExtensionSet) -> Result<ProtoExpression> {
    match expr {
        Expression::Literal(value) => Ok(rex(RexType::Literal(to_proto_literal(value, ext_set)?))),
        Expression::Call(c) => to_proto_call(c, ext_set),
        Expression::Field(other) => Err(invalid(format!(
            "field reference {other} cannot be the root of a selection"
        ))),
    }
}

/// Translate a bound native expression into Substrait
pub fn to_proto_expression(expr: &Expression, ext_set: &mut ExtensionSet) -> Result<ProtoExpression> {
    if let Some(selection) = to_proto_selection(expr, ext_set)? {
        return Ok(selection);
    }
    to_proto_call_or_literal(expr, ext_set)
}

pub fn serialize_expression(expr: &Expression, ext_set: &mut ExtensionSet) -> Result<Vec<u8>> {
    Ok(to_proto_expression(expr, ext_set)?.encode_to_vec())
}

pub fn deserialize_expression(bytes: &[u8], ext_set: &ExtensionSet) -> Result<Expression> {
    let expr = ProtoExpression::decode(bytes)?;
    from_proto_expression(&expr, ext_set)
}
