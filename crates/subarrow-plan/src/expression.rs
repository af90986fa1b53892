//! Native expression tree
//!
//! Expressions are built unbound (field references by name or index) and
//! bound against a schema, which resolves every reference to a [`FieldPath`]
//! and checks that calls are well typed.

use std::fmt;

use arrow::datatypes::{DataType, Field, Fields, Schema};

use crate::error::{PlanError, Result};
use crate::functions::FunctionRegistry;
use crate::scalar::ScalarValue;

pub const IF_ELSE: &str = "if_else";
pub const CASE_WHEN: &str = "case_when";
pub const MAKE_STRUCT: &str = "make_struct";
pub const STRUCT_FIELD: &str = "struct_field";
pub const LIST_ELEMENT: &str = "list_element";
pub const CAST: &str = "cast";

/// Indices into nested struct fields, outermost first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(pub Vec<usize>);

impl FieldPath {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// Resolve against `fields`. Every step but the last must land on a struct.
    pub fn get<'a>(&self, fields: &'a Fields) -> Result<&'a Field> {
        if self.0.is_empty() {
            return Err(PlanError::Invalid("empty field path".to_string()));
        }
        let mut current = fields;
        let mut found: Option<&Field> = None;
        for (depth, &index) in self.0.iter().enumerate() {
            if let Some(parent) = found {
                match parent.data_type() {
                    DataType::Struct(children) => current = children,
                    other => {
                        return Err(PlanError::Invalid(format!(
                            "field path {self} steps into non-struct type {other} at depth {depth}"
                        )))
                    }
                }
            }
            let field = current.get(index).ok_or_else(|| {
                PlanError::Invalid(format!(
                    "field path {self} index {index} out of range for {} fields",
                    current.len()
                ))
            })?;
            found = Some(field.as_ref());
        }
        found.ok_or_else(|| PlanError::Invalid("empty field path".to_string()))
    }

    pub fn data_type(&self, schema: &Schema) -> Result<DataType> {
        Ok(self.get(schema.fields())?.data_type().clone())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath(")?;
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{index}")?;
        }
        write!(f, ")")
    }
}

/// A reference to a column, possibly nested
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    Name(String),
    Index(usize),
    Path(FieldPath),
    /// Steps through nested structs, each step a name or an index
    Nested(Vec<FieldRef>),
}

impl FieldRef {
    pub fn name(name: impl Into<String>) -> Self {
        FieldRef::Name(name.into())
    }

    /// `a.b.c` style reference
    pub fn dotted(path: &str) -> Self {
        let steps: Vec<FieldRef> = path.split('.').map(FieldRef::name).collect();
        if steps.len() == 1 {
            FieldRef::Name(path.to_string())
        } else {
            FieldRef::Nested(steps)
        }
    }

    pub fn path(indices: Vec<usize>) -> Self {
        FieldRef::Path(FieldPath(indices))
    }

    pub fn as_path(&self) -> Option<&FieldPath> {
        match self {
            FieldRef::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Resolve to a field path within `schema`
    pub fn resolve(&self, schema: &Schema) -> Result<FieldPath> {
        let mut indices = Vec::new();
        self.resolve_into(schema.fields(), &mut indices)?;
        let path = FieldPath(indices);
        path.get(schema.fields())?;
        Ok(path)
    }

    fn resolve_into(&self, fields: &Fields, indices: &mut Vec<usize>) -> Result<()> {
        match self {
            FieldRef::Name(name) => {
                let matches: Vec<usize> = fields
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.name() == name)
                    .map(|(i, _)| i)
                    .collect();
                match matches.as_slice() {
                    [index] => indices.push(*index),
                    [] => {
                        return Err(PlanError::NotFound(format!(
                            "no field named '{name}' among {:?}",
                            fields.iter().map(|f| f.name()).collect::<Vec<_>>()
                        )))
                    }
                    _ => {
                        return Err(PlanError::Invalid(format!(
                            "field name '{name}' is ambiguous"
                        )))
                    }
                }
            }
            FieldRef::Index(index) => {
                if *index >= fields.len() {
                    return Err(PlanError::Invalid(format!(
                        "field index {index} out of range for {} fields",
                        fields.len()
                    )));
                }
                indices.push(*index);
            }
            FieldRef::Path(path) => {
                path.get(fields)?;
                indices.extend_from_slice(path.indices());
            }
            FieldRef::Nested(steps) => {
                let mut current = fields.clone();
                for step in steps {
                    let start = indices.len();
                    step.resolve_into(&current, indices)?;
                    let field = FieldPath(indices[start..].to_vec()).get(&current)?.clone();
                    current = match field.data_type() {
                        DataType::Struct(children) => children.clone(),
                        _ => Fields::empty(),
                    };
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Name(name) => write!(f, "{name}"),
            FieldRef::Index(index) => write!(f, "FieldPath({index})"),
            FieldRef::Path(path) => write!(f, "{path}"),
            FieldRef::Nested(steps) => {
                for (i, step) in steps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{step}")?;
                }
                Ok(())
            }
        }
    }
}

/// Options carried by the calls that need more than their arguments
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOptions {
    StructField { indices: Vec<usize> },
    MakeStruct { field_names: Vec<String> },
    Cast { to: DataType },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub function: String,
    pub arguments: Vec<Expression>,
    pub options: Option<FunctionOptions>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(ScalarValue),
    Field(FieldRef),
    Call(Call),
}

/// Reference a column by name
pub fn col(name: impl Into<String>) -> Expression {
    Expression::Field(FieldRef::Name(name.into()))
}

pub fn lit(value: impl Into<ScalarValue>) -> Expression {
    Expression::Literal(value.into())
}

pub fn field(field_ref: FieldRef) -> Expression {
    Expression::Field(field_ref)
}

pub fn call(function: impl Into<String>, arguments: Vec<Expression>) -> Expression {
    Expression::Call(Call {
        function: function.into(),
        arguments,
        options: None,
    })
}

pub fn call_with_options(
    function: impl Into<String>,
    arguments: Vec<Expression>,
    options: FunctionOptions,
) -> Expression {
    Expression::Call(Call {
        function: function.into(),
        arguments,
        options: Some(options),
    })
}

impl Expression {
    pub fn literal_true() -> Self {
        Expression::Literal(ScalarValue::Boolean(Some(true)))
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            Expression::Literal(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_field_ref(&self) -> Option<&FieldRef> {
        match self {
            Expression::Field(field_ref) => Some(field_ref),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Expression::Call(call) => Some(call),
            _ => None,
        }
    }

    /// True if every field reference has been resolved to a path
    pub fn is_bound(&self) -> bool {
        match self {
            Expression::Literal(_) => true,
            Expression::Field(field_ref) => matches!(field_ref, FieldRef::Path(_)),
            Expression::Call(call) => call.arguments.iter().all(Expression::is_bound),
        }
    }

    /// Resolve field references against `schema` and type-check every call
    pub fn bind(&self, schema: &Schema, registry: &FunctionRegistry) -> Result<Expression> {
        let bound = self.bind_refs(schema)?;
        bound.data_type(schema, registry)?;
        Ok(bound)
    }

    fn bind_refs(&self, schema: &Schema) -> Result<Expression> {
        Ok(match self {
            Expression::Literal(value) => Expression::Literal(value.clone()),
            Expression::Field(field_ref) => {
                Expression::Field(FieldRef::Path(field_ref.resolve(schema)?))
            }
            Expression::Call(call) => Expression::Call(Call {
                function: call.function.clone(),
                arguments: call
                    .arguments
                    .iter()
                    .map(|arg| arg.bind_refs(schema))
                    .collect::<Result<Vec<_>>>()?,
                options: call.options.clone(),
            }),
        })
    }

    /// Output type of this expression over rows of `schema`
    pub fn data_type(&self, schema: &Schema, registry: &FunctionRegistry) -> Result<DataType> {
        match self {
            Expression::Literal(value) => Ok(value.data_type()),
            Expression::Field(field_ref) => field_ref.resolve(schema)?.data_type(schema),
            Expression::Call(call) => call.data_type(schema, registry),
        }
    }

    /// Output field, named after the expression
    pub fn to_field(&self, schema: &Schema, registry: &FunctionRegistry) -> Result<Field> {
        match self {
            Expression::Field(field_ref) => {
                let path = field_ref.resolve(schema)?;
                Ok(path.get(schema.fields())?.clone())
            }
            _ => Ok(Field::new(
                self.to_string(),
                self.data_type(schema, registry)?,
                true,
            )),
        }
    }
}

impl Call {
    fn argument_types(&self, schema: &Schema, registry: &FunctionRegistry) -> Result<Vec<DataType>> {
        self.arguments
            .iter()
            .map(|arg| arg.data_type(schema, registry))
            .collect()
    }

    fn data_type(&self, schema: &Schema, registry: &FunctionRegistry) -> Result<DataType> {
        let args = self.argument_types(schema, registry)?;
        match self.function.as_str() {
            IF_ELSE => {
                if args.len() != 3 {
                    return Err(PlanError::Invalid(format!(
                        "if_else takes 3 arguments, got {}",
                        args.len()
                    )));
                }
                expect_boolean(&args[0], "if_else condition")?;
                unify_branches(&args[1..])
            }
            CASE_WHEN => {
                let conditions = match args.first() {
                    Some(DataType::Struct(fields)) => fields.clone(),
                    _ => {
                        return Err(PlanError::Invalid(
                            "case_when requires a struct of conditions as first argument"
                                .to_string(),
                        ))
                    }
                };
                for condition in conditions.iter() {
                    expect_boolean(condition.data_type(), "case_when condition")?;
                }
                let values = &args[1..];
                if values.len() != conditions.len() && values.len() != conditions.len() + 1 {
                    return Err(PlanError::Invalid(format!(
                        "case_when has {} conditions but {} values",
                        conditions.len(),
                        values.len()
                    )));
                }
                unify_branches(values)
            }
            MAKE_STRUCT => {
                let names = match &self.options {
                    Some(FunctionOptions::MakeStruct { field_names }) => field_names.clone(),
                    None => vec![String::new(); args.len()],
                    Some(other) => {
                        return Err(PlanError::Invalid(format!(
                            "make_struct given options {other:?}"
                        )))
                    }
                };
                if names.len() != args.len() {
                    return Err(PlanError::Invalid(format!(
                        "make_struct has {} names for {} arguments",
                        names.len(),
                        args.len()
                    )));
                }
                let fields: Vec<Field> = names
                    .into_iter()
                    .zip(args)
                    .map(|(name, data_type)| Field::new(name, data_type, true))
                    .collect();
                Ok(DataType::Struct(Fields::from(fields)))
            }
            STRUCT_FIELD => {
                let indices = match &self.options {
                    Some(FunctionOptions::StructField { indices }) => indices,
                    _ => {
                        return Err(PlanError::Invalid(
                            "struct_field requires field indices".to_string(),
                        ))
                    }
                };
                let [input] = args.as_slice() else {
                    return Err(PlanError::Invalid(format!(
                        "struct_field takes 1 argument, got {}",
                        args.len()
                    )));
                };
                match input {
                    DataType::Struct(fields) => Ok(FieldPath(indices.clone())
                        .get(fields)?
                        .data_type()
                        .clone()),
                    other => Err(PlanError::Invalid(format!(
                        "struct_field applied to non-struct type {other}"
                    ))),
                }
            }
            LIST_ELEMENT => {
                let [list, index] = args.as_slice() else {
                    return Err(PlanError::Invalid(format!(
                        "list_element takes 2 arguments, got {}",
                        args.len()
                    )));
                };
                if !index.is_integer() {
                    return Err(PlanError::Invalid(format!(
                        "list_element index must be an integer, got {index}"
                    )));
                }
                match list {
                    DataType::List(item) | DataType::LargeList(item) => {
                        Ok(item.data_type().clone())
                    }
                    other => Err(PlanError::Invalid(format!(
                        "list_element applied to non-list type {other}"
                    ))),
                }
            }
            CAST => match &self.options {
                Some(FunctionOptions::Cast { to }) if args.len() == 1 => Ok(to.clone()),
                _ => Err(PlanError::Invalid(
                    "cast takes one argument and a target type".to_string(),
                )),
            },
            name => registry.return_type(name, &args),
        }
    }
}

fn expect_boolean(data_type: &DataType, what: &str) -> Result<()> {
    match data_type {
        DataType::Boolean | DataType::Null => Ok(()),
        other => Err(PlanError::Invalid(format!(
            "{what} must be boolean, got {other}"
        ))),
    }
}

fn unify_branches(types: &[DataType]) -> Result<DataType> {
    let mut out = DataType::Null;
    for data_type in types {
        if out == DataType::Null {
            out = data_type.clone();
        } else if data_type != &DataType::Null && data_type != &out {
            return Err(PlanError::Invalid(format!(
                "branches have mismatched types {out} and {data_type}"
            )));
        }
    }
    Ok(out)
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{value}"),
            Expression::Field(field_ref) => write!(f, "{field_ref}"),
            Expression::Call(call) => {
                write!(f, "{}(", call.function)?;
                for (i, arg) in call.arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                match &call.options {
                    Some(FunctionOptions::StructField { indices }) => {
                        write!(f, ", {}", FieldPath(indices.clone()))?
                    }
                    Some(FunctionOptions::Cast { to }) => write!(f, " as {to}")?,
                    _ => {}
                }
                write!(f, ")")
            }
        }
    }
}
