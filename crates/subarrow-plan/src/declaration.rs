//! Operator declarations: the native plan tree
//!
//! A [`Declaration`] names an operator kind, carries that kind's options and
//! owns its inputs. Trees are built bottom-up and handed to an engine.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::expression::{Expression, FieldRef};
use crate::functions::FunctionRegistry;

/// On-disk formats a dataset can be read from or written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Parquet,
    /// Arrow IPC file format
    Ipc,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Parquet => "parquet",
            FileFormat::Ipc => "arrow",
        }
    }
}

/// A set of files sharing one schema and format
#[derive(Debug, Clone, PartialEq)]
pub struct FileSystemDataset {
    pub schema: SchemaRef,
    pub format: FileFormat,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ScanNodeOptions {
    pub dataset: FileSystemDataset,
    /// Rows not satisfying the filter may be skipped, defaults to `true`
    pub filter: Expression,
}

#[derive(Debug, Clone)]
pub struct TableSourceNodeOptions {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

#[derive(Debug, Clone)]
pub struct FilterNodeOptions {
    pub filter_expression: Expression,
}

#[derive(Debug, Clone)]
pub struct ProjectNodeOptions {
    pub expressions: Vec<Expression>,
    /// Output names, one per expression
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    LeftAnti,
    RightSemi,
    RightAnti,
}

/// How a pair of join keys is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKeyCmp {
    /// Nulls never match
    Eq,
    /// Nulls match nulls
    Is,
}

#[derive(Debug, Clone)]
pub struct HashJoinNodeOptions {
    pub join_type: JoinType,
    /// Keys relative to the left input
    pub left_keys: Vec<FieldRef>,
    /// Keys relative to the right input
    pub right_keys: Vec<FieldRef>,
    pub key_cmp: Vec<JoinKeyCmp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: String,
    pub target: Vec<FieldRef>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AggregateNodeOptions {
    pub aggregates: Vec<Aggregate>,
    pub keys: Vec<FieldRef>,
}

/// Receives the output of a consuming sink
pub trait SinkConsumer: Send + Sync {
    fn init(&self, _schema: &SchemaRef) -> Result<()> {
        Ok(())
    }

    fn consume(&self, batch: RecordBatch) -> Result<()>;

    /// Called exactly once after the last batch
    fn finish(&self) -> Result<()>;
}

/// Consumer that keeps every batch in memory
#[derive(Debug, Default)]
pub struct BatchCollector {
    schema: Mutex<Option<SchemaRef>>,
    batches: Mutex<Vec<RecordBatch>>,
    finished: Mutex<bool>,
}

impl BatchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.lock().ok().and_then(|s| s.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.lock().map(|f| *f).unwrap_or(false)
    }

    /// Drain the collected batches
    pub fn take_batches(&self) -> Vec<RecordBatch> {
        self.batches
            .lock()
            .map(|mut batches| std::mem::take(&mut *batches))
            .unwrap_or_default()
    }
}

fn poisoned() -> PlanError {
    PlanError::Invalid("batch collector lock poisoned".to_string())
}

impl SinkConsumer for BatchCollector {
    fn init(&self, schema: &SchemaRef) -> Result<()> {
        *self.schema.lock().map_err(|_| poisoned())? = Some(schema.clone());
        Ok(())
    }

    fn consume(&self, batch: RecordBatch) -> Result<()> {
        self.batches.lock().map_err(|_| poisoned())?.push(batch);
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        let mut finished = self.finished.lock().map_err(|_| poisoned())?;
        if *finished {
            return Err(PlanError::Invalid("sink finished twice".to_string()));
        }
        *finished = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SinkNodeOptions {
    pub collector: Arc<BatchCollector>,
}

#[derive(Clone)]
pub struct ConsumingSinkNodeOptions {
    pub consumer: Arc<dyn SinkConsumer>,
}

impl fmt::Debug for ConsumingSinkNodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumingSinkNodeOptions").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteNodeOptions {
    pub base_dir: PathBuf,
    pub format: FileFormat,
    /// File name pattern, `{i}` is replaced by the file number
    pub basename_template: String,
}

#[derive(Debug, Clone)]
pub enum NodeOptions {
    Scan(ScanNodeOptions),
    TableSource(TableSourceNodeOptions),
    Filter(FilterNodeOptions),
    Project(ProjectNodeOptions),
    HashJoin(HashJoinNodeOptions),
    Aggregate(AggregateNodeOptions),
    Sink(SinkNodeOptions),
    ConsumingSink(ConsumingSinkNodeOptions),
    Write(WriteNodeOptions),
}

impl NodeOptions {
    pub fn factory_name(&self) -> &'static str {
        match self {
            NodeOptions::Scan(_) => "scan",
            NodeOptions::TableSource(_) => "table_source",
            NodeOptions::Filter(_) => "filter",
            NodeOptions::Project(_) => "project",
            NodeOptions::HashJoin(_) => "hashjoin",
            NodeOptions::Aggregate(_) => "aggregate",
            NodeOptions::Sink(_) => "sink",
            NodeOptions::ConsumingSink(_) => "consuming_sink",
            NodeOptions::Write(_) => "write",
        }
    }

    fn expected_inputs(&self) -> usize {
        match self {
            NodeOptions::Scan(_) | NodeOptions::TableSource(_) => 0,
            NodeOptions::HashJoin(_) => 2,
            _ => 1,
        }
    }

    pub fn is_sink(&self) -> bool {
        matches!(
            self,
            NodeOptions::Sink(_) | NodeOptions::ConsumingSink(_) | NodeOptions::Write(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub options: NodeOptions,
    pub inputs: Vec<Declaration>,
    pub label: String,
}

impl Declaration {
    pub fn new(options: NodeOptions, inputs: Vec<Declaration>) -> Self {
        Self {
            options,
            inputs,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn factory_name(&self) -> &'static str {
        self.options.factory_name()
    }

    /// Chain unary declarations: the first is the source, each next one
    /// takes the previous as its single input
    pub fn sequence(declarations: Vec<Declaration>) -> Result<Declaration> {
        let mut iter = declarations.into_iter();
        let mut current = iter
            .next()
            .ok_or_else(|| PlanError::Invalid("empty declaration sequence".to_string()))?;
        for mut next in iter {
            if !next.inputs.is_empty() {
                return Err(PlanError::Invalid(format!(
                    "'{}' in a sequence must not have inputs",
                    next.factory_name()
                )));
            }
            next.inputs.push(current);
            current = next;
        }
        Ok(current)
    }

    fn input(&self, index: usize) -> Result<&Declaration> {
        self.inputs.get(index).ok_or_else(|| {
            PlanError::Invalid(format!(
                "'{}' is missing input {index}",
                self.factory_name()
            ))
        })
    }

    /// Check input counts across the whole tree
    pub fn validate(&self) -> Result<()> {
        let expected = self.options.expected_inputs();
        if self.inputs.len() != expected {
            return Err(PlanError::Invalid(format!(
                "'{}' takes {expected} inputs, got {}",
                self.factory_name(),
                self.inputs.len()
            )));
        }
        self.inputs.iter().try_for_each(Declaration::validate)
    }

    /// Schema of the rows this declaration emits
    pub fn output_schema(&self, registry: &FunctionRegistry) -> Result<SchemaRef> {
        match &self.options {
            NodeOptions::Scan(options) => Ok(options.dataset.schema.clone()),
            NodeOptions::TableSource(options) => Ok(options.schema.clone()),
            NodeOptions::Filter(_)
            | NodeOptions::Sink(_)
            | NodeOptions::ConsumingSink(_)
            | NodeOptions::Write(_) => self.input(0)?.output_schema(registry),
            NodeOptions::Project(options) => {
                let input = self.input(0)?.output_schema(registry)?;
                if options.names.len() != options.expressions.len() {
                    return Err(PlanError::Invalid(format!(
                        "project has {} names for {} expressions",
                        options.names.len(),
                        options.expressions.len()
                    )));
                }
                let fields = options
                    .expressions
                    .iter()
                    .zip(&options.names)
                    .map(|(expr, name)| {
                        let field = expr.to_field(&input, registry)?;
                        Ok(field.with_name(name.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(Schema::new(fields)))
            }
            NodeOptions::HashJoin(options) => {
                let left = self.input(0)?.output_schema(registry)?;
                let right = self.input(1)?.output_schema(registry)?;
                let fields: Vec<Arc<Field>> = match options.join_type {
                    JoinType::LeftSemi | JoinType::LeftAnti => left.fields().iter().cloned().collect(),
                    JoinType::RightSemi | JoinType::RightAnti => {
                        right.fields().iter().cloned().collect()
                    }
                    JoinType::Inner => left.fields().iter().chain(right.fields().iter()).cloned().collect(),
                    JoinType::LeftOuter | JoinType::RightOuter | JoinType::FullOuter => {
                        let left_nullable = options.join_type != JoinType::LeftOuter;
                        let right_nullable = options.join_type != JoinType::RightOuter;
                        left.fields()
                            .iter()
                            .map(|f| nullable_if(f, left_nullable))
                            .chain(right.fields().iter().map(|f| nullable_if(f, right_nullable)))
                            .collect()
                    }
                };
                Ok(Arc::new(Schema::new(fields)))
            }
            NodeOptions::Aggregate(options) => {
                let input = self.input(0)?.output_schema(registry)?;
                let mut fields = Vec::with_capacity(options.aggregates.len() + options.keys.len());
                for aggregate in &options.aggregates {
                    let args = aggregate
                        .target
                        .iter()
                        .map(|target| target.resolve(&input)?.data_type(&input))
                        .collect::<Result<Vec<_>>>()?;
                    let data_type = registry.return_type(&aggregate.function, &args)?;
                    fields.push(Field::new(aggregate.name.clone(), data_type, true));
                }
                for key in &options.keys {
                    let path = key.resolve(&input)?;
                    fields.push(path.get(input.fields())?.clone());
                }
                Ok(Arc::new(Schema::new(fields)))
            }
        }
    }
}

fn nullable_if(field: &Arc<Field>, nullable: bool) -> Arc<Field> {
    if nullable && !field.is_nullable() {
        Arc::new(field.as_ref().clone().with_nullable(true))
    } else {
        field.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{call, col, lit};
    use arrow::datatypes::DataType;

    fn source(names: &[&str]) -> Declaration {
        let fields: Vec<Field> = names
            .iter()
            .map(|n| Field::new(*n, DataType::Int32, false))
            .collect();
        Declaration::new(
            NodeOptions::TableSource(TableSourceNodeOptions {
                schema: Arc::new(Schema::new(fields)),
                batches: vec![],
            }),
            vec![],
        )
    }

    #[test]
    fn test_project_schema() {
        let registry = FunctionRegistry::default();
        let project = Declaration::new(
            NodeOptions::Project(ProjectNodeOptions {
                expressions: vec![col("b"), call("add", vec![col("a"), lit(1i64)])],
                names: vec!["b".to_string(), "a_plus_one".to_string()],
            }),
            vec![source(&["a", "b"])],
        );
        let schema = project.output_schema(&registry).unwrap();
        assert_eq!(schema.fields().len(), 2);
        assert_eq!(schema.field(0).name(), "b");
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);
    }

    #[test]
    fn test_join_schema() {
        let registry = FunctionRegistry::default();
        let join = |join_type| {
            Declaration::new(
                NodeOptions::HashJoin(HashJoinNodeOptions {
                    join_type,
                    left_keys: vec![FieldRef::name("a")],
                    right_keys: vec![FieldRef::name("x")],
                    key_cmp: vec![JoinKeyCmp::Eq],
                }),
                vec![source(&["a", "b"]), source(&["x"])],
            )
        };
        let inner = join(JoinType::Inner).output_schema(&registry).unwrap();
        assert_eq!(inner.fields().len(), 3);

        let semi = join(JoinType::LeftSemi).output_schema(&registry).unwrap();
        assert_eq!(semi.fields().len(), 2);

        let left = join(JoinType::LeftOuter).output_schema(&registry).unwrap();
        assert!(!left.field(0).is_nullable());
        assert!(left.field(2).is_nullable());
    }

    #[test]
    fn test_aggregate_schema_orders_measures_first() {
        let registry = FunctionRegistry::default();
        let aggregate = Declaration::new(
            NodeOptions::Aggregate(AggregateNodeOptions {
                aggregates: vec![Aggregate {
                    function: "hash_sum".to_string(),
                    target: vec![FieldRef::name("c")],
                    name: "sum(c)".to_string(),
                }],
                keys: vec![FieldRef::name("a")],
            }),
            vec![source(&["a", "b", "c"])],
        );
        let schema = aggregate.output_schema(&registry).unwrap();
        assert_eq!(schema.field(0).name(), "sum(c)");
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).name(), "a");
    }

    #[test]
    fn test_sequence_and_validate() {
        let filter = Declaration::new(
            NodeOptions::Filter(FilterNodeOptions {
                filter_expression: Expression::literal_true(),
            }),
            vec![],
        );
        let plan = Declaration::sequence(vec![source(&["a"]), filter]).unwrap();
        assert_eq!(plan.factory_name(), "filter");
        assert!(plan.validate().is_ok());

        let broken = Declaration::new(
            NodeOptions::Filter(FilterNodeOptions {
                filter_expression: Expression::literal_true(),
            }),
            vec![],
        );
        assert!(matches!(broken.validate(), Err(PlanError::Invalid(_))));
    }

    #[test]
    fn test_collector_finishes_once() {
        let collector = BatchCollector::new();
        assert!(collector.finish().is_ok());
        assert!(collector.is_finished());
        assert!(collector.finish().is_err());
    }
}
