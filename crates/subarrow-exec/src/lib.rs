//! Execution of translated plans
//!
//! A small in-process engine for declaration trees built on Arrow compute
//! kernels, plus helpers that take serialized Substrait plans straight to
//! record batches.

mod aggregate;
pub mod error;
pub mod eval;
pub mod exec_plan;
mod join;
mod sink;
mod source;

use std::sync::{Arc, Mutex};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchIterator, RecordBatchReader};
use subarrow_plan::{Declaration, FunctionRegistry, SinkConsumer};
use subarrow_registry::ExtensionIdRegistry;
use subarrow_substrait::{deserialize_plans, deserialize_relations, ConversionOptions, SinkFactory};

pub use error::{ExecError, Result};
pub use eval::evaluate;
pub use exec_plan::{run, ExecPlan, Output};
pub use source::{dataset_from_file, format_of};

/// Run a declaration and gather its output. Sinks at the root are skipped.
pub fn collect(declaration: &Declaration, registry: &FunctionRegistry) -> Result<Output> {
    let mut current = declaration;
    while current.options.is_sink() {
        current = current
            .inputs
            .first()
            .ok_or_else(|| error::invalid("sink declaration has no input"))?;
    }
    run(current, registry)
}

/// Decode a single-relation plan and attach `consumer` as its sink
pub fn deserialize_plan(
    bytes: &[u8],
    consumer: Arc<dyn SinkConsumer>,
    registry: Option<Arc<ExtensionIdRegistry>>,
    options: &ConversionOptions,
) -> Result<ExecPlan> {
    let slot = Mutex::new(Some(consumer));
    let factory = || slot.lock().ok().and_then(|mut consumer| consumer.take());
    let plans = deserialize_plans(bytes, SinkFactory::Consumer(&factory), registry, options)?;
    if plans.declarations.len() != 1 {
        return Err(error::invalid(format!(
            "expected a plan with exactly one relation, got {}",
            plans.declarations.len()
        )));
    }
    ExecPlan::from_declarations(plans.declarations, options.function_registry())
}

/// Decode, translate and run a single-relation plan
pub fn execute_serialized_plan(
    bytes: &[u8],
    registry: Option<Arc<ExtensionIdRegistry>>,
    options: &ConversionOptions,
) -> Result<Box<dyn RecordBatchReader + Send>> {
    let (schema, batches) = execute_to_batches(bytes, registry, options)?;
    Ok(Box::new(RecordBatchIterator::new(
        batches.into_iter().map(Ok),
        schema,
    )))
}

fn execute_to_batches(
    bytes: &[u8],
    registry: Option<Arc<ExtensionIdRegistry>>,
    options: &ConversionOptions,
) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let mut plan = deserialize_relations(bytes, registry, options)?;
    if plan.relations.len() != 1 {
        return Err(error::invalid(format!(
            "expected a plan with exactly one relation, got {}",
            plan.relations.len()
        )));
    }
    let info = plan.relations.remove(0);
    let (_, batches) = run(&info.declaration, &options.function_registry())?;
    Ok((info.output_schema, batches))
}
