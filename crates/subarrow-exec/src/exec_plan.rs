//! Running declaration trees
//!
//! Execution is pull based and materializing: each node runs its inputs to
//! completion, then produces its output batches. Joins and aggregates see
//! their inputs as one concatenated batch.

use std::sync::Arc;

use arrow::array::{Array, RecordBatchOptions};
use arrow::compute::{cast, concat_batches, filter_record_batch};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use subarrow_plan::{Declaration, FunctionRegistry, NodeOptions};
use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::error::{invalid, Result};
use crate::eval::{evaluate, evaluate_predicate};
use crate::join::hash_join;
use crate::sink::{deliver, write};
use crate::source::scan;

/// Output of a node: its schema and every batch it produced
pub type Output = (SchemaRef, Vec<RecordBatch>);

fn input(declaration: &Declaration, index: usize) -> Result<&Declaration> {
    declaration.inputs.get(index).ok_or_else(|| {
        invalid(format!(
            "'{}' is missing input {index}",
            declaration.factory_name()
        ))
    })
}

fn concatenated(output: Output) -> Result<RecordBatch> {
    let (schema, batches) = output;
    Ok(concat_batches(&schema, &batches)?)
}

/// Run a declaration tree; sinks pass their input through
pub fn run(declaration: &Declaration, registry: &FunctionRegistry) -> Result<Output> {
    debug!(
        node = declaration.factory_name(),
        label = %declaration.label,
        "executing"
    );
    match &declaration.options {
        NodeOptions::Scan(options) => Ok((options.dataset.schema.clone(), scan(options)?)),
        NodeOptions::TableSource(options) => Ok((options.schema.clone(), options.batches.clone())),
        NodeOptions::Filter(options) => {
            let (schema, batches) = run(input(declaration, 0)?, registry)?;
            let batches = batches
                .iter()
                .map(|batch| {
                    let mask = evaluate_predicate(&options.filter_expression, batch)?;
                    Ok(filter_record_batch(batch, &mask)?)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((schema, batches))
        }
        NodeOptions::Project(options) => {
            let schema = declaration.output_schema(registry)?;
            let (_, batches) = run(input(declaration, 0)?, registry)?;
            let batches = batches
                .iter()
                .map(|batch| {
                    let columns = options
                        .expressions
                        .iter()
                        .zip(schema.fields())
                        .map(|(expr, field)| {
                            let column = evaluate(expr, batch)?;
                            if column.data_type() == field.data_type() {
                                Ok(column)
                            } else {
                                Ok(cast(&column, field.data_type())?)
                            }
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let batch_options =
                        RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
                    Ok(RecordBatch::try_new_with_options(
                        schema.clone(),
                        columns,
                        &batch_options,
                    )?)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((schema, batches))
        }
        NodeOptions::HashJoin(options) => {
            let schema = declaration.output_schema(registry)?;
            let left = concatenated(run(input(declaration, 0)?, registry)?)?;
            let right = concatenated(run(input(declaration, 1)?, registry)?)?;
            let joined = hash_join(options, &left, &right, &schema)?;
            Ok((schema, vec![joined]))
        }
        NodeOptions::Aggregate(options) => {
            let schema = declaration.output_schema(registry)?;
            let batch = concatenated(run(input(declaration, 0)?, registry)?)?;
            let aggregated = aggregate(options, &batch, &schema)?;
            Ok((schema, vec![aggregated]))
        }
        NodeOptions::Sink(_) | NodeOptions::ConsumingSink(_) | NodeOptions::Write(_) => {
            run(input(declaration, 0)?, registry)
        }
    }
}

/// A set of sink-terminated declarations ready to run
pub struct ExecPlan {
    declarations: Vec<Declaration>,
    registry: Arc<FunctionRegistry>,
    started: bool,
}

impl ExecPlan {
    /// Every declaration must be a well-formed tree ending in a sink
    pub fn from_declarations(
        declarations: Vec<Declaration>,
        registry: Arc<FunctionRegistry>,
    ) -> Result<Self> {
        for declaration in &declarations {
            if !declaration.options.is_sink() {
                return Err(invalid(format!(
                    "plan root '{}' is not a sink",
                    declaration.factory_name()
                )));
            }
            declaration.validate()?;
        }
        Ok(Self {
            declarations,
            registry,
            started: false,
        })
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Run every sink to completion
    pub fn start_producing(&mut self) -> Result<()> {
        if self.started {
            return Err(invalid("plan has already been started"));
        }
        self.started = true;
        info!(sinks = self.declarations.len(), "starting plan");

        for declaration in &self.declarations {
            let source = input(declaration, 0)?;
            match &declaration.options {
                NodeOptions::Sink(options) => {
                    let schema = source.output_schema(&self.registry)?;
                    let batches = run(source, &self.registry).map(|(_, batches)| batches);
                    deliver(options.collector.as_ref(), &schema, batches)?;
                }
                NodeOptions::ConsumingSink(options) => {
                    let schema = source.output_schema(&self.registry)?;
                    let batches = run(source, &self.registry).map(|(_, batches)| batches);
                    deliver(options.consumer.as_ref(), &schema, batches)?;
                }
                NodeOptions::Write(options) => {
                    let (schema, batches) = run(source, &self.registry)?;
                    write(options, &schema, &batches)?;
                }
                _ => {
                    return Err(invalid(format!(
                        "plan root '{}' is not a sink",
                        declaration.factory_name()
                    )))
                }
            }
        }
        Ok(())
    }
}
