//! Export: native declarations to Substrait relations and plans

#![allow(deprecated)]

use prost::Message;
use substrait::proto::aggregate_rel::{Grouping, Measure};
use substrait::proto::function_argument::ArgType;
use substrait::proto::join_rel::JoinType as ProtoJoinType;
use substrait::proto::plan_rel::RelType as PlanRelType;
use substrait::proto::read_rel::local_files::file_or_files::{
    ArrowReadOptions, FileFormat as ProtoFileFormat, ParquetReadOptions, PathType,
};
use substrait::proto::read_rel::local_files::FileOrFiles;
use substrait::proto::read_rel::{LocalFiles, NamedTable, ReadType};
use substrait::proto::aggregate_function::AggregationInvocation;
use substrait::proto::rel::RelType;
use substrait::proto::rel_common::{Emit, EmitKind};
use substrait::proto::{
    AggregateFunction, AggregateRel, AggregationPhase, FilterRel,
    FunctionArgument, JoinRel, Plan, PlanRel, ProjectRel, ReadRel, Rel, RelCommon, RelRoot,
    Version,
};
use subarrow_plan::functions::HASH_PREFIX;
use subarrow_plan::{
    call, field, Declaration, Expression, FieldRef, FileFormat, FunctionRegistry, JoinKeyCmp,
    JoinType, NodeOptions, ScalarValue,
};
use tracing::debug;

use crate::error::{invalid, not_implemented, Result};
use crate::expression::to_proto_expression;
use crate::extension_set::ExtensionSet;
use crate::types::{flattened_names, to_proto_schema, to_proto_type};

/// Substrait minor version the exported plans target
const SUBSTRAIT_MINOR_VERSION: u32 = 53;
const PRODUCER: &str = "subarrow";

fn rel(rel_type: RelType) -> Rel {
    Rel {
        rel_type: Some(rel_type),
    }
}

fn input<'a>(declaration: &'a Declaration, index: usize) -> Result<&'a Declaration> {
    declaration.inputs.get(index).ok_or_else(|| {
        invalid(format!(
            "'{}' is missing input {index}",
            declaration.factory_name()
        ))
    })
}

/// Bind against `schema` and translate
fn export_expression(
    expr: &Expression,
    schema: &arrow::datatypes::Schema,
    ext_set: &mut ExtensionSet,
    registry: &FunctionRegistry,
) -> Result<substrait::proto::Expression> {
    let bound = expr.bind(schema, registry)?;
    to_proto_expression(&bound, ext_set)
}

fn top_level_index(key: &FieldRef, schema: &arrow::datatypes::Schema) -> Result<usize> {
    let path = key.resolve(schema)?;
    match path.indices() {
        [index] => Ok(*index),
        _ => Err(not_implemented(format!("nested join key {key}"))),
    }
}

fn proto_join_type(join_type: JoinType) -> ProtoJoinType {
    match join_type {
        JoinType::Inner => ProtoJoinType::Inner,
        JoinType::FullOuter => ProtoJoinType::Outer,
        JoinType::LeftOuter => ProtoJoinType::Left,
        JoinType::RightOuter => ProtoJoinType::Right,
        JoinType::LeftSemi => ProtoJoinType::LeftSemi,
        JoinType::LeftAnti => ProtoJoinType::LeftAnti,
        JoinType::RightSemi => ProtoJoinType::RightSemi,
        JoinType::RightAnti => ProtoJoinType::RightAnti,
    }
}

fn path_uri(path: &std::path::Path) -> String {
    let display = path.display().to_string();
    if path.is_absolute() {
        format!("file://{display}")
    } else {
        display
    }
}

/// Translate a declaration tree. Sinks are transparent.
pub fn to_proto_rel(
    declaration: &Declaration,
    ext_set: &mut ExtensionSet,
    registry: &FunctionRegistry,
) -> Result<Rel> {
    debug!(factory = declaration.factory_name(), "exporting declaration");
    match &declaration.options {
        NodeOptions::Sink(_) | NodeOptions::ConsumingSink(_) | NodeOptions::Write(_) => {
            to_proto_rel(input(declaration, 0)?, ext_set, registry)
        }
        NodeOptions::Scan(options) => {
            let dataset = &options.dataset;
            let filter = match &options.filter {
                Expression::Literal(ScalarValue::Boolean(Some(true))) => None,
                filter => Some(Box::new(export_expression(
                    filter,
                    &dataset.schema,
                    ext_set,
                    registry,
                )?)),
            };
            let items = dataset
                .files
                .iter()
                .map(|path| FileOrFiles {
                    path_type: Some(PathType::UriFile(path_uri(path))),
                    file_format: Some(match dataset.format {
                        FileFormat::Parquet => ProtoFileFormat::Parquet(ParquetReadOptions::default()),
                        FileFormat::Ipc => ProtoFileFormat::Arrow(ArrowReadOptions::default()),
                    }),
                    ..Default::default()
                })
                .collect();
            Ok(rel(RelType::Read(Box::new(ReadRel {
                base_schema: Some(to_proto_schema(&dataset.schema, ext_set)?),
                filter,
                read_type: Some(ReadType::LocalFiles(LocalFiles {
                    items,
                    ..Default::default()
                })),
                ..Default::default()
            }))))
        }
        NodeOptions::TableSource(options) => {
            if declaration.label.is_empty() {
                return Err(not_implemented(
                    "exporting an unnamed table source; give it a label to export it as a named table",
                ));
            }
            Ok(rel(RelType::Read(Box::new(ReadRel {
                base_schema: Some(to_proto_schema(&options.schema, ext_set)?),
                read_type: Some(ReadType::NamedTable(NamedTable {
                    names: declaration.label.split('.').map(str::to_string).collect(),
                    ..Default::default()
                })),
                ..Default::default()
            }))))
        }
        NodeOptions::Filter(options) => {
            let source = input(declaration, 0)?;
            let schema = source.output_schema(registry)?;
            let condition = export_expression(&options.filter_expression, &schema, ext_set, registry)?;
            Ok(rel(RelType::Filter(Box::new(FilterRel {
                input: Some(Box::new(to_proto_rel(source, ext_set, registry)?)),
                condition: Some(Box::new(condition)),
                ..Default::default()
            }))))
        }
        NodeOptions::Project(options) => {
            let source = input(declaration, 0)?;
            let schema = source.output_schema(registry)?;
            let expressions = options
                .expressions
                .iter()
                .map(|expr| export_expression(expr, &schema, ext_set, registry))
                .collect::<Result<Vec<_>>>()?;
            // project appends its columns; emit only those
            let width = schema.fields().len();
            let output_mapping = (width..width + expressions.len())
                .map(|i| i32::try_from(i).map_err(|_| invalid("too many project columns")))
                .collect::<Result<Vec<_>>>()?;
            Ok(rel(RelType::Project(Box::new(ProjectRel {
                common: Some(RelCommon {
                    emit_kind: Some(EmitKind::Emit(Emit { output_mapping })),
                    ..Default::default()
                }),
                input: Some(Box::new(to_proto_rel(source, ext_set, registry)?)),
                expressions,
                ..Default::default()
            }))))
        }
        NodeOptions::HashJoin(options) => {
            let ([left_key], [right_key], [key_cmp]) = (
                options.left_keys.as_slice(),
                options.right_keys.as_slice(),
                options.key_cmp.as_slice(),
            ) else {
                return Err(not_implemented("exporting joins on more than one key"));
            };
            let left = input(declaration, 0)?;
            let right = input(declaration, 1)?;
            let left_schema = left.output_schema(registry)?;
            let right_schema = right.output_schema(registry)?;
            let left_index = top_level_index(left_key, &left_schema)?;
            let right_index = left_schema.fields().len() + top_level_index(right_key, &right_schema)?;
            let comparator = match key_cmp {
                JoinKeyCmp::Eq => "equal",
                JoinKeyCmp::Is => "is_not_distinct_from",
            };
            let condition = call(
                comparator,
                vec![
                    field(FieldRef::path(vec![left_index])),
                    field(FieldRef::path(vec![right_index])),
                ],
            );
            Ok(rel(RelType::Join(Box::new(JoinRel {
                left: Some(Box::new(to_proto_rel(left, ext_set, registry)?)),
                right: Some(Box::new(to_proto_rel(right, ext_set, registry)?)),
                expression: Some(Box::new(to_proto_expression(&condition, ext_set)?)),
                r#type: proto_join_type(options.join_type) as i32,
                ..Default::default()
            }))))
        }
        NodeOptions::Aggregate(options) => {
            let source = input(declaration, 0)?;
            let schema = source.output_schema(registry)?;
            let grouping_expressions = options
                .keys
                .iter()
                .map(|key| export_expression(&field(key.clone()), &schema, ext_set, registry))
                .collect::<Result<Vec<_>>>()?;
            let groupings = if grouping_expressions.is_empty() {
                vec![]
            } else {
                vec![Grouping {
                    expression_references: (0..grouping_expressions.len() as u32).collect(),
                    ..Default::default()
                }]
            };

            let mut measures = Vec::with_capacity(options.aggregates.len());
            for aggregate in &options.aggregates {
                let function = aggregate
                    .function
                    .strip_prefix(HASH_PREFIX)
                    .unwrap_or(&aggregate.function);
                let arguments = aggregate
                    .target
                    .iter()
                    .map(|target| {
                        Ok(FunctionArgument {
                            arg_type: Some(ArgType::Value(export_expression(
                                &field(target.clone()),
                                &schema,
                                ext_set,
                                registry,
                            )?)),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let argument_types = aggregate
                    .target
                    .iter()
                    .map(|target| Ok(target.resolve(&schema)?.data_type(&schema)?))
                    .collect::<Result<Vec<_>>>()?;
                let output_type = registry.return_type(function, &argument_types)?;
                measures.push(Measure {
                    measure: Some(AggregateFunction {
                        function_reference: ext_set.encode_function(function)?,
                        arguments,
                        output_type: Some(to_proto_type(&output_type, true, ext_set)?),
                        phase: AggregationPhase::InitialToResult as i32,
                        invocation: AggregationInvocation::All as i32,
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }

            Ok(rel(RelType::Aggregate(Box::new(AggregateRel {
                input: Some(Box::new(to_proto_rel(source, ext_set, registry)?)),
                groupings,
                measures,
                grouping_expressions,
                ..Default::default()
            }))))
        }
    }
}

/// Build a single-root plan whose extension blocks cover every anchor used
pub fn to_proto_plan(
    declaration: &Declaration,
    ext_set: &mut ExtensionSet,
    registry: &FunctionRegistry,
) -> Result<Plan> {
    let input = to_proto_rel(declaration, ext_set, registry)?;
    let names = flattened_names(&*declaration.output_schema(registry)?);
    let (extension_uris, extensions) = ext_set.to_proto()?;
    debug!(
        uris = extension_uris.len(),
        extensions = extensions.len(),
        "exported plan"
    );
    Ok(Plan {
        version: Some(Version {
            minor_number: SUBSTRAIT_MINOR_VERSION,
            producer: PRODUCER.to_string(),
            ..Default::default()
        }),
        extension_uris,
        extensions,
        relations: vec![PlanRel {
            rel_type: Some(PlanRelType::Root(RelRoot {
                input: Some(input),
                names,
            })),
        }],
        ..Default::default()
    })
}

pub fn serialize_plan(
    declaration: &Declaration,
    ext_set: &mut ExtensionSet,
    registry: &FunctionRegistry,
) -> Result<Vec<u8>> {
    Ok(to_proto_plan(declaration, ext_set, registry)?.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubstraitError;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;
    use subarrow_plan::{
        col, lit, FileSystemDataset, FilterNodeOptions, HashJoinNodeOptions, ScanNodeOptions,
        TableSourceNodeOptions,
    };

    fn table(label: &str, names: &[&str]) -> Declaration {
        let fields: Vec<Field> = names
            .iter()
            .map(|n| Field::new(*n, DataType::Int64, true))
            .collect();
        Declaration::new(
            NodeOptions::TableSource(TableSourceNodeOptions {
                schema: Arc::new(Schema::new(fields)),
                batches: vec![],
            }),
            vec![],
        )
        .with_label(label)
    }

    #[test]
    fn test_scan_exports_local_files() {
        let registry = FunctionRegistry::default();
        let mut ext_set = ExtensionSet::default();
        let scan = Declaration::new(
            NodeOptions::Scan(ScanNodeOptions {
                dataset: FileSystemDataset {
                    schema: Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
                    format: FileFormat::Parquet,
                    files: vec!["/data/a.parquet".into()],
                },
                filter: Expression::literal_true(),
            }),
            vec![],
        );
        let rel = to_proto_rel(&scan, &mut ext_set, &registry).unwrap();
        let Some(RelType::Read(read)) = rel.rel_type else {
            panic!("expected a read relation");
        };
        assert!(read.filter.is_none());
        let Some(ReadType::LocalFiles(files)) = read.read_type else {
            panic!("expected local files");
        };
        assert_eq!(
            files.items[0].path_type,
            Some(PathType::UriFile("file:///data/a.parquet".to_string()))
        );
    }

    #[test]
    fn test_filter_binds_names_before_export() {
        let registry = FunctionRegistry::default();
        let mut ext_set = ExtensionSet::default();
        let filter = Declaration::new(
            NodeOptions::Filter(FilterNodeOptions {
                filter_expression: call("greater", vec![col("b"), lit(1i64)]),
            }),
            vec![table("t", &["a", "b"])],
        );
        let plan = to_proto_plan(&filter, &mut ext_set, &registry).unwrap();
        assert_eq!(plan.extensions.len(), 1);
        let Some(PlanRelType::Root(root)) = &plan.relations[0].rel_type else {
            panic!("expected a root relation");
        };
        assert_eq!(root.names, vec!["a", "b"]);
    }

    #[test]
    fn test_unlabelled_table_source_not_exported() {
        let registry = FunctionRegistry::default();
        let mut ext_set = ExtensionSet::default();
        let result = to_proto_rel(&table("", &["a"]), &mut ext_set, &registry);
        assert!(matches!(result, Err(SubstraitError::NotImplemented(_))));
    }

    #[test]
    fn test_join_types_use_wire_numbering() {
        assert_eq!(proto_join_type(JoinType::Inner) as i32, 1);
        assert_eq!(proto_join_type(JoinType::FullOuter) as i32, 2);
        assert_eq!(proto_join_type(JoinType::LeftAnti) as i32, 6);
        assert_eq!(proto_join_type(JoinType::RightSemi) as i32, 8);
        assert_eq!(proto_join_type(JoinType::RightAnti) as i32, 9);
    }

    #[test]
    fn test_composite_join_keys_not_exported() {
        let registry = FunctionRegistry::default();
        let mut ext_set = ExtensionSet::default();
        let join = Declaration::new(
            NodeOptions::HashJoin(HashJoinNodeOptions {
                join_type: JoinType::Inner,
                left_keys: vec![FieldRef::name("a"), FieldRef::name("b")],
                right_keys: vec![FieldRef::name("x"), FieldRef::name("y")],
                key_cmp: vec![JoinKeyCmp::Eq, JoinKeyCmp::Eq],
            }),
            vec![table("l", &["a", "b"]), table("r", &["x", "y"])],
        );
        let result = to_proto_rel(&join, &mut ext_set, &registry);
        assert!(matches!(result, Err(SubstraitError::NotImplemented(_))));
    }
}
