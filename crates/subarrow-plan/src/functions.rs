//! Native function registry
//!
//! Native functions are identified by name. The registry knows whether a
//! function is scalar or aggregate and how its output type follows from its
//! argument types. Control-flow and nesting forms (`if_else`, `case_when`,
//! `struct_field`, `list_element`, `make_struct`, `cast`) are typed by the
//! expression binder and never appear here.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, Result};

/// Prefix of the grouped variant of an aggregate function
pub const HASH_PREFIX: &str = "hash_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Scalar,
    /// Aggregate over the whole input
    Aggregate,
    /// Aggregate per group
    HashAggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(expected) => n == *expected,
            Arity::AtLeast(min) => n >= *min,
        }
    }
}

/// How a function's output type is derived
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnType {
    Fixed(DataType),
    FirstArgument,
    /// Widest numeric type among the arguments
    CommonNumeric,
    /// Sum widening: signed to Int64, unsigned to UInt64, floats to Float64
    Sum,
    /// Float64 over numeric arguments
    Floating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    pub kind: FunctionKind,
    pub arity: Arity,
    pub return_type: ReturnType,
}

impl FunctionSignature {
    pub fn scalar(name: impl Into<String>, arity: Arity, return_type: ReturnType) -> Self {
        Self {
            name: name.into(),
            kind: FunctionKind::Scalar,
            arity,
            return_type,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, FunctionKind::Aggregate | FunctionKind::HashAggregate)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionSignature>,
}

static DEFAULT_REGISTRY: LazyLock<Arc<FunctionRegistry>> =
    LazyLock::new(|| Arc::new(FunctionRegistry::new()));

impl FunctionRegistry {
    /// Registry with all builtin functions
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }

    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Shared instance holding the builtins
    pub fn default_registry() -> Arc<FunctionRegistry> {
        DEFAULT_REGISTRY.clone()
    }

    fn register_builtins(&mut self) {
        // Arithmetic
        for name in ["add", "subtract", "multiply", "divide"] {
            self.register(FunctionSignature::scalar(
                name,
                Arity::Exact(2),
                ReturnType::CommonNumeric,
            ));
        }
        for name in ["negate", "abs"] {
            self.register(FunctionSignature::scalar(
                name,
                Arity::Exact(1),
                ReturnType::FirstArgument,
            ));
        }
        self.register(FunctionSignature::scalar(
            "power",
            Arity::Exact(2),
            ReturnType::Floating,
        ));
        self.register(FunctionSignature::scalar(
            "sqrt",
            Arity::Exact(1),
            ReturnType::Floating,
        ));

        // Comparison
        for name in [
            "equal",
            "not_equal",
            "less",
            "less_equal",
            "greater",
            "greater_equal",
            "is_not_distinct_from",
        ] {
            self.register(FunctionSignature::scalar(
                name,
                Arity::Exact(2),
                ReturnType::Fixed(DataType::Boolean),
            ));
        }
        for name in ["is_null", "is_valid", "invert"] {
            self.register(FunctionSignature::scalar(
                name,
                Arity::Exact(1),
                ReturnType::Fixed(DataType::Boolean),
            ));
        }

        // Boolean
        for name in ["and_kleene", "or_kleene", "xor"] {
            self.register(FunctionSignature::scalar(
                name,
                Arity::Exact(2),
                ReturnType::Fixed(DataType::Boolean),
            ));
        }

        // Aggregates, each with a grouped variant
        for (name, return_type) in [
            ("sum", ReturnType::Sum),
            ("mean", ReturnType::Fixed(DataType::Float64)),
            ("min", ReturnType::FirstArgument),
            ("max", ReturnType::FirstArgument),
            ("count", ReturnType::Fixed(DataType::Int64)),
        ] {
            self.register(FunctionSignature {
                name: name.to_string(),
                kind: FunctionKind::Aggregate,
                arity: Arity::Exact(1),
                return_type: return_type.clone(),
            });
            self.register(FunctionSignature {
                name: format!("{HASH_PREFIX}{name}"),
                kind: FunctionKind::HashAggregate,
                arity: Arity::Exact(1),
                return_type,
            });
        }
    }

    /// Add or replace a function
    pub fn register(&mut self, sig: FunctionSignature) {
        debug!(function = %sig.name, kind = ?sig.kind, "registering native function");
        self.functions.insert(sig.name.clone(), sig);
    }

    pub fn lookup(&self, name: &str) -> Result<&FunctionSignature> {
        self.functions
            .get(name)
            .ok_or_else(|| PlanError::NotFound(format!("no native function named '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.functions
            .get(name)
            .map(|sig| sig.is_aggregate())
            .unwrap_or(false)
    }

    /// Grouped counterpart of an aggregate, if one is registered
    pub fn hash_variant(&self, name: &str) -> Option<&FunctionSignature> {
        if name.starts_with(HASH_PREFIX) {
            return self
                .functions
                .get(name)
                .filter(|sig| sig.kind == FunctionKind::HashAggregate);
        }
        self.functions
            .get(&format!("{HASH_PREFIX}{name}"))
            .filter(|sig| sig.kind == FunctionKind::HashAggregate)
    }

    /// Output type of `name` applied to arguments of the given types
    pub fn return_type(&self, name: &str, args: &[DataType]) -> Result<DataType> {
        let sig = self.lookup(name)?;
        if !sig.arity.accepts(args.len()) {
            return Err(PlanError::Invalid(format!(
                "function '{name}' expects {:?} arguments, got {}",
                sig.arity,
                args.len()
            )));
        }
        match &sig.return_type {
            ReturnType::Fixed(data_type) => Ok(data_type.clone()),
            ReturnType::FirstArgument => Ok(args[0].clone()),
            ReturnType::CommonNumeric => {
                let mut out = args[0].clone();
                for arg in &args[1..] {
                    out = common_numeric_type(&out, arg).ok_or_else(|| {
                        PlanError::Invalid(format!(
                            "function '{name}' has no kernel for ({out}, {arg})"
                        ))
                    })?;
                }
                if !is_numeric(&out) {
                    return Err(PlanError::Invalid(format!(
                        "function '{name}' requires numeric arguments, got {out}"
                    )));
                }
                Ok(out)
            }
            ReturnType::Floating => match args
                .iter()
                .find(|arg| !is_numeric(arg) && **arg != DataType::Null)
            {
                Some(arg) => Err(PlanError::Invalid(format!(
                    "function '{name}' requires numeric arguments, got {arg}"
                ))),
                None => Ok(DataType::Float64),
            },
            ReturnType::Sum => sum_type(&args[0]).ok_or_else(|| {
                PlanError::NotImplemented(format!("'{name}' over values of type {}", args[0]))
            }),
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_numeric(data_type: &DataType) -> bool {
    data_type.is_integer() || data_type.is_floating()
}

fn sum_type(data_type: &DataType) -> Option<DataType> {
    match data_type {
        t if t.is_signed_integer() => Some(DataType::Int64),
        t if t.is_unsigned_integer() => Some(DataType::UInt64),
        t if t.is_floating() => Some(DataType::Float64),
        DataType::Null => Some(DataType::Int64),
        _ => None,
    }
}

fn integer_width(data_type: &DataType) -> u8 {
    match data_type {
        DataType::Int8 | DataType::UInt8 => 8,
        DataType::Int16 | DataType::UInt16 => 16,
        DataType::Int32 | DataType::UInt32 => 32,
        _ => 64,
    }
}

fn signed_of_width(width: u8) -> DataType {
    match width {
        8 => DataType::Int8,
        16 => DataType::Int16,
        32 => DataType::Int32,
        _ => DataType::Int64,
    }
}

fn unsigned_of_width(width: u8) -> DataType {
    match width {
        8 => DataType::UInt8,
        16 => DataType::UInt16,
        32 => DataType::UInt32,
        _ => DataType::UInt64,
    }
}

/// Smallest type both arguments can be cast to without changing kind.
/// `None` when either side is not numeric (nulls adopt the other side).
pub fn common_numeric_type(lhs: &DataType, rhs: &DataType) -> Option<DataType> {
    if lhs == rhs {
        return Some(lhs.clone());
    }
    match (lhs, rhs) {
        (DataType::Null, other) | (other, DataType::Null) => Some(other.clone()),
        (DataType::Float32, other) | (other, DataType::Float32)
            if other.is_integer() && integer_width(other) <= 16 =>
        {
            Some(DataType::Float32)
        }
        (l, r) if l.is_floating() || r.is_floating() => {
            if is_numeric(l) && is_numeric(r) {
                Some(DataType::Float64)
            } else {
                None
            }
        }
        (l, r) if l.is_signed_integer() && r.is_signed_integer() => {
            Some(signed_of_width(integer_width(l).max(integer_width(r))))
        }
        (l, r) if l.is_unsigned_integer() && r.is_unsigned_integer() => {
            Some(unsigned_of_width(integer_width(l).max(integer_width(r))))
        }
        (l, r) if l.is_integer() && r.is_integer() => {
            let (signed, unsigned) = if l.is_signed_integer() { (l, r) } else { (r, l) };
            let width = integer_width(signed).max(integer_width(unsigned) * 2).min(64);
            Some(signed_of_width(width))
        }
        _ => None,
    }
}
