//! Native plan model
//!
//! Arrow-typed expressions, scalar values and operator declarations that an
//! execution engine instantiates, plus the registry of native functions the
//! expressions may call.

pub mod declaration;
pub mod error;
pub mod expression;
pub mod functions;
pub mod scalar;
pub mod types;

pub use declaration::{
    Aggregate, AggregateNodeOptions, BatchCollector, ConsumingSinkNodeOptions, Declaration,
    FileFormat, FileSystemDataset, FilterNodeOptions, HashJoinNodeOptions, JoinKeyCmp, JoinType,
    NodeOptions, ProjectNodeOptions, ScanNodeOptions, SinkConsumer, SinkNodeOptions,
    TableSourceNodeOptions, WriteNodeOptions,
};
pub use error::{ErrorKind, PlanError, Result};
pub use expression::{
    call, call_with_options, col, field, lit, Call, Expression, FieldPath, FieldRef,
    FunctionOptions,
};
pub use functions::{FunctionKind, FunctionRegistry, FunctionSignature};
pub use scalar::ScalarValue;
pub use types::ExtensionType;
