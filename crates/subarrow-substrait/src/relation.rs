//! Relation translation: Substrait relations to native declarations

#![allow(deprecated)]

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::compute::{cast, concat};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use substrait::proto::expression::RexType;
use substrait::proto::join_rel::JoinType as ProtoJoinType;
use substrait::proto::read_rel::local_files::file_or_files::{FileFormat as ProtoFileFormat, PathType};
use substrait::proto::read_rel::{LocalFiles, ReadType, VirtualTable};
use substrait::proto::rel::RelType;
use substrait::proto::aggregate_function::AggregationInvocation;
use substrait::proto::rel_common::EmitKind;
use substrait::proto::{
    AggregateRel, AggregationPhase, FilterRel, JoinRel, ProjectRel,
    ReadRel, Rel, RelCommon,
};
use subarrow_plan::expression::CAST;
use subarrow_plan::{
    call_with_options, field, Aggregate, AggregateNodeOptions, Declaration, Expression,
    FieldRef, FileFormat, FileSystemDataset, FilterNodeOptions, FunctionOptions,
    FunctionRegistry, HashJoinNodeOptions, JoinKeyCmp, JoinType, NodeOptions,
    ProjectNodeOptions, ScalarValue, ScanNodeOptions, TableSourceNodeOptions,
};
use tracing::debug;

use crate::error::{invalid, not_implemented, Result};
use crate::expression::{from_proto_arguments, from_proto_expression};
use crate::extension_set::ExtensionSet;
use crate::literal::from_proto_literal;
use crate::options::ConversionOptions;
use crate::types::{from_proto_schema, rename_fields};

/// A translated relation together with the schema it emits
#[derive(Debug, Clone)]
pub struct DeclarationInfo {
    pub declaration: Declaration,
    pub output_schema: SchemaRef,
}

impl DeclarationInfo {
    fn new(declaration: Declaration, registry: &FunctionRegistry) -> Result<Self> {
        let output_schema = declaration.output_schema(registry)?;
        Ok(Self {
            declaration,
            output_schema,
        })
    }
}

fn rel_name(rel_type: &RelType) -> &'static str {
    match rel_type {
        RelType::Read(_) => "read",
        RelType::Filter(_) => "filter",
        RelType::Project(_) => "project",
        RelType::Join(_) => "join",
        RelType::Aggregate(_) => "aggregate",
        RelType::Fetch(_) => "fetch",
        RelType::Sort(_) => "sort",
        RelType::Set(_) => "set",
        RelType::Cross(_) => "cross",
        RelType::ExtensionSingle(_) => "extension_single",
        RelType::ExtensionMulti(_) => "extension_multi",
        RelType::ExtensionLeaf(_) => "extension_leaf",
        RelType::Reference(_) => "reference",
        RelType::Write(_) => "write",
        RelType::HashJoin(_) => "hash_join",
        RelType::MergeJoin(_) => "merge_join",
        _ => "unknown",
    }
}

fn required_input<'a>(input: &'a Option<Box<Rel>>, what: &str) -> Result<&'a Rel> {
    input
        .as_deref()
        .ok_or_else(|| invalid(format!("{what} relation has no input")))
}

/// Translate a relation tree
pub fn from_proto_rel(
    rel: &Rel,
    ext_set: &ExtensionSet,
    options: &ConversionOptions,
) -> Result<DeclarationInfo> {
    let rel_type = rel
        .rel_type
        .as_ref()
        .ok_or_else(|| invalid("relation with no rel type"))?;
    debug!(rel = rel_name(rel_type), "translating relation");

    let registry = options.function_registry();
    let (info, common) = match rel_type {
        RelType::Read(read) => (from_proto_read(read, ext_set, options, &registry)?, &read.common),
        RelType::Filter(filter) => (
            from_proto_filter(filter, ext_set, options, &registry)?,
            &filter.common,
        ),
        RelType::Project(project) => (
            from_proto_project(project, ext_set, options, &registry)?,
            &project.common,
        ),
        RelType::Join(join) => (from_proto_join(join, ext_set, options, &registry)?, &join.common),
        RelType::Aggregate(aggregate) => (
            from_proto_aggregate(aggregate, ext_set, options, &registry)?,
            &aggregate.common,
        ),
        other => {
            return Err(not_implemented(format!(
                "Substrait {} relations",
                rel_name(other)
            )))
        }
    };
    apply_emit(info, common.as_ref(), &registry)
}

/// Restrict and reorder a relation's output per its emit mapping
fn apply_emit(
    info: DeclarationInfo,
    common: Option<&RelCommon>,
    registry: &FunctionRegistry,
) -> Result<DeclarationInfo> {
    let mapping = match common.and_then(|c| c.emit_kind.as_ref()) {
        None | Some(EmitKind::Direct(_)) => return Ok(info),
        Some(EmitKind::Emit(emit)) => &emit.output_mapping,
    };
    let width = info.output_schema.fields().len();
    let mut expressions = Vec::with_capacity(mapping.len());
    let mut names = Vec::with_capacity(mapping.len());
    for &index in mapping {
        let column = usize::try_from(index)
            .ok()
            .filter(|&i| i < width)
            .ok_or_else(|| {
                invalid(format!(
                    "emit index {index} is out of range for {width} output columns"
                ))
            })?;
        expressions.push(field(FieldRef::path(vec![column])));
        names.push(info.output_schema.field(column).name().clone());
    }
    debug!(?mapping, "applying emit");
    let project = Declaration::new(
        NodeOptions::Project(ProjectNodeOptions { expressions, names }),
        vec![info.declaration],
    );
    DeclarationInfo::new(project, registry)
}

fn bind_boolean(
    expr: &Expression,
    schema: &Schema,
    registry: &FunctionRegistry,
    what: &str,
) -> Result<Expression> {
    let bound = expr
        .bind(schema, registry)
        .map_err(|e| invalid(format!("{what} does not bind to the input schema: {e}")))?;
    match bound.data_type(schema, registry)? {
        DataType::Boolean => Ok(bound),
        other => Err(invalid(format!("{what} must be boolean, got {other}"))),
    }
}

fn from_proto_read(
    read: &ReadRel,
    ext_set: &ExtensionSet,
    options: &ConversionOptions,
    registry: &FunctionRegistry,
) -> Result<DeclarationInfo> {
    let base_schema = read
        .base_schema
        .as_ref()
        .ok_or_else(|| invalid("read relation has no base_schema"))?;
    let schema = Arc::new(from_proto_schema(base_schema, ext_set)?);
    if read.projection.is_some() {
        return Err(not_implemented("read relation projections"));
    }
    let filter = read
        .filter
        .as_deref()
        .map(|f| {
            let expr = from_proto_expression(f, ext_set)?;
            bind_boolean(&expr, &schema, registry, "read filter")
        })
        .transpose()?;

    let source = match &read.read_type {
        Some(ReadType::NamedTable(named)) => {
            let provider = options.named_table_provider.as_ref().ok_or_else(|| {
                not_implemented(format!(
                    "plan reads named table {:?} but no named table provider was configured",
                    named.names
                ))
            })?;
            let mut declaration = provider(&named.names)?;
            let provided = declaration.output_schema(registry)?;
            if provided.fields().len() != schema.fields().len() {
                return Err(invalid(format!(
                    "named table {:?} provides {} columns but the read declares {}",
                    named.names,
                    provided.fields().len(),
                    schema.fields().len()
                )));
            }
            if declaration.label.is_empty() {
                declaration.label = named.names.join(".");
            }
            declaration
        }
        Some(ReadType::LocalFiles(files)) => {
            let dataset = dataset_from_local_files(files, schema.clone())?;
            Declaration::new(
                NodeOptions::Scan(ScanNodeOptions {
                    dataset,
                    filter: filter.clone().unwrap_or_else(Expression::literal_true),
                }),
                vec![],
            )
        }
        Some(ReadType::VirtualTable(table)) => Declaration::new(
            NodeOptions::TableSource(TableSourceNodeOptions {
                schema: schema.clone(),
                batches: virtual_table_batches(table, &schema, ext_set)?,
            }),
            vec![],
        ),
        Some(ReadType::ExtensionTable(_)) => {
            return Err(not_implemented("extension table reads"))
        }
        Some(_) => return Err(not_implemented("this read type")),
        None => return Err(invalid("read relation has no read type")),
    };

    let declaration = match filter {
        Some(filter_expression) => Declaration::new(
            NodeOptions::Filter(FilterNodeOptions { filter_expression }),
            vec![source],
        ),
        None => source,
    };
    DeclarationInfo::new(declaration, registry)
}

fn local_path(uri: &str) -> Result<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if uri.contains("://") {
        return Err(not_implemented(format!(
            "reading {uri}: only local files are supported"
        )));
    }
    Ok(PathBuf::from(uri))
}

fn dataset_from_local_files(files: &LocalFiles, schema: SchemaRef) -> Result<FileSystemDataset> {
    let mut format = None;
    let mut paths = Vec::with_capacity(files.items.len());
    for item in &files.items {
        if item.start != 0 || item.length != 0 {
            return Err(not_implemented("partial file reads (start/length)"));
        }
        let path = match &item.path_type {
            Some(PathType::UriFile(uri)) | Some(PathType::UriPath(uri)) => local_path(uri)?,
            Some(PathType::UriPathGlob(uri)) => {
                return Err(not_implemented(format!("glob path {uri}")))
            }
            Some(PathType::UriFolder(uri)) => {
                return Err(not_implemented(format!("folder path {uri}")))
            }
            None => return Err(invalid("local file item has no path")),
        };
        let item_format = match &item.file_format {
            Some(ProtoFileFormat::Parquet(_)) => FileFormat::Parquet,
            Some(ProtoFileFormat::Arrow(_)) => FileFormat::Ipc,
            Some(_) => {
                return Err(not_implemented(format!(
                    "file format of {}",
                    path.display()
                )))
            }
            None => return Err(invalid(format!("{} has no file format", path.display()))),
        };
        match format {
            Some(existing) if existing != item_format => {
                return Err(not_implemented("local files with mixed formats"))
            }
            _ => format = Some(item_format),
        }
        paths.push(path);
    }
    let format = format.ok_or_else(|| invalid("local files read lists no files"))?;
    Ok(FileSystemDataset {
        schema,
        format,
        files: paths,
    })
}

fn virtual_table_rows(table: &VirtualTable, ext_set: &ExtensionSet) -> Result<Vec<Vec<ScalarValue>>> {
    if !table.expressions.is_empty() {
        return table
            .expressions
            .iter()
            .map(|row| {
                row.fields
                    .iter()
                    .map(|expr| match &expr.rex_type {
                        Some(RexType::Literal(literal)) => from_proto_literal(literal, ext_set),
                        _ => Err(not_implemented("non-literal virtual table values")),
                    })
                    .collect()
            })
            .collect();
    }
    table
        .values
        .iter()
        .map(|row| {
            row.fields
                .iter()
                .map(|literal| from_proto_literal(literal, ext_set))
                .collect()
        })
        .collect()
}

fn virtual_table_batches(
    table: &VirtualTable,
    schema: &SchemaRef,
    ext_set: &ExtensionSet,
) -> Result<Vec<RecordBatch>> {
    let rows = virtual_table_rows(table, ext_set)?;
    if rows.is_empty() {
        return Ok(vec![]);
    }
    let width = schema.fields().len();
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(invalid(format!(
            "virtual table row has {} values for {width} columns",
            row.len()
        )));
    }
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(width);
    for (i, target) in schema.fields().iter().enumerate() {
        let cells = rows
            .iter()
            .map(|row| row[i].to_array())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let refs: Vec<&dyn Array> = cells.iter().map(|a| a.as_ref()).collect();
        let column = concat(&refs)?;
        let column = if column.data_type() == target.data_type() {
            column
        } else {
            cast(&column, target.data_type())?
        };
        columns.push(column);
    }
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| invalid(format!("virtual table values do not match its schema: {e}")))?;
    Ok(vec![batch])
}

fn from_proto_filter(
    filter: &FilterRel,
    ext_set: &ExtensionSet,
    options: &ConversionOptions,
    registry: &FunctionRegistry,
) -> Result<DeclarationInfo> {
    let input = from_proto_rel(required_input(&filter.input, "filter")?, ext_set, options)?;
    let condition = filter
        .condition
        .as_deref()
        .ok_or_else(|| invalid("filter relation has no condition"))?;
    let condition = from_proto_expression(condition, ext_set)?;
    let filter_expression =
        bind_boolean(&condition, &input.output_schema, registry, "filter condition")?;
    DeclarationInfo::new(
        Declaration::new(
            NodeOptions::Filter(FilterNodeOptions { filter_expression }),
            vec![input.declaration],
        ),
        registry,
    )
}

fn from_proto_project(
    project: &ProjectRel,
    ext_set: &ExtensionSet,
    options: &ConversionOptions,
    registry: &FunctionRegistry,
) -> Result<DeclarationInfo> {
    let input = from_proto_rel(required_input(&project.input, "project")?, ext_set, options)?;
    let schema = &input.output_schema;

    let mut expressions: Vec<Expression> = (0..schema.fields().len())
        .map(|i| field(FieldRef::path(vec![i])))
        .collect();
    let mut names: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    for expr in &project.expressions {
        let bound = from_proto_expression(expr, ext_set)?
            .bind(schema, registry)
            .map_err(|e| invalid(format!("project expression does not bind: {e}")))?;
        names.push(bound.to_string());
        expressions.push(bound);
    }
    DeclarationInfo::new(
        Declaration::new(
            NodeOptions::Project(ProjectNodeOptions { expressions, names }),
            vec![input.declaration],
        ),
        registry,
    )
}

fn join_type(value: i32) -> Result<JoinType> {
    let proto = ProtoJoinType::try_from(value)
        .map_err(|_| invalid(format!("unknown join type {value}")))?;
    Ok(match proto {
        ProtoJoinType::Inner => JoinType::Inner,
        ProtoJoinType::Outer => JoinType::FullOuter,
        ProtoJoinType::Left => JoinType::LeftOuter,
        ProtoJoinType::Right => JoinType::RightOuter,
        ProtoJoinType::LeftSemi => JoinType::LeftSemi,
        ProtoJoinType::LeftAnti => JoinType::LeftAnti,
        ProtoJoinType::RightSemi => JoinType::RightSemi,
        ProtoJoinType::RightAnti => JoinType::RightAnti,
        other => return Err(not_implemented(format!("join type {}", other.as_str_name()))),
    })
}

fn top_level_column(expr: &Expression) -> Option<usize> {
    match expr.as_field_ref()? {
        FieldRef::Path(path) => match path.indices() {
            [index] => Some(*index),
            _ => None,
        },
        FieldRef::Index(index) => Some(*index),
        _ => None,
    }
}

fn from_proto_join(
    join: &JoinRel,
    ext_set: &ExtensionSet,
    options: &ConversionOptions,
    registry: &FunctionRegistry,
) -> Result<DeclarationInfo> {
    let left = join
        .left
        .as_deref()
        .ok_or_else(|| invalid("join relation has no left input"))?;
    let right = join
        .right
        .as_deref()
        .ok_or_else(|| invalid("join relation has no right input"))?;
    let join_type = join_type(join.r#type)?;
    if join.post_join_filter.is_some() {
        return Err(not_implemented("join post_join_filter"));
    }
    let expression = join
        .expression
        .as_deref()
        .ok_or_else(|| invalid("join relation has no expression"))?;

    let left = from_proto_rel(left, ext_set, options)?;
    let right = from_proto_rel(right, ext_set, options)?;

    let condition = from_proto_expression(expression, ext_set)?;
    let Some(comparison) = condition.as_call() else {
        return Err(invalid(format!(
            "join expression {condition} is not a key comparison"
        )));
    };
    let key_cmp = match comparison.function.as_str() {
        "equal" => JoinKeyCmp::Eq,
        "is_not_distinct_from" => JoinKeyCmp::Is,
        "and_kleene" => return Err(not_implemented("join on more than one key comparison")),
        other => {
            return Err(invalid(format!(
                "join comparator '{other}' is neither equal nor is_not_distinct_from"
            )))
        }
    };
    let [lhs, rhs] = comparison.arguments.as_slice() else {
        return Err(invalid(format!(
            "join comparator takes 2 arguments, got {}",
            comparison.arguments.len()
        )));
    };
    let (Some(lhs), Some(rhs)) = (top_level_column(lhs), top_level_column(rhs)) else {
        return Err(invalid("join keys must be direct references to top-level columns"));
    };

    let left_width = left.output_schema.fields().len();
    let right_width = right.output_schema.fields().len();
    let in_left = |i: usize| i < left_width;
    let in_right = |i: usize| i >= left_width && i < left_width + right_width;
    let (left_key, right_key) = if in_left(lhs) && in_right(rhs) {
        (lhs, rhs - left_width)
    } else if in_left(rhs) && in_right(lhs) {
        (rhs, lhs - left_width)
    } else {
        return Err(invalid(format!(
            "join keys {lhs} and {rhs} must reference one column from each input"
        )));
    };

    let declaration = Declaration::new(
        NodeOptions::HashJoin(HashJoinNodeOptions {
            join_type,
            left_keys: vec![FieldRef::path(vec![left_key])],
            right_keys: vec![FieldRef::path(vec![right_key])],
            key_cmp: vec![key_cmp],
        }),
        vec![left.declaration, right.declaration],
    );
    DeclarationInfo::new(declaration, registry)
}

fn direct_reference(expr: &Expression, schema: &Schema) -> Option<FieldRef> {
    let field_ref = expr.as_field_ref()?;
    field_ref.resolve(schema).ok().map(FieldRef::Path)
}

fn from_proto_aggregate(
    aggregate: &AggregateRel,
    ext_set: &ExtensionSet,
    options: &ConversionOptions,
    registry: &FunctionRegistry,
) -> Result<DeclarationInfo> {
    let input = from_proto_rel(required_input(&aggregate.input, "aggregate")?, ext_set, options)?;
    let schema = &input.output_schema;

    if aggregate.groupings.len() > 1 {
        return Err(not_implemented(format!(
            "aggregates with {} grouping sets",
            aggregate.groupings.len()
        )));
    }
    let mut keys = Vec::new();
    if let Some(grouping) = aggregate.groupings.first() {
        let expressions: Vec<&substrait::proto::Expression> =
            if grouping.expression_references.is_empty() {
                grouping.grouping_expressions.iter().collect()
            } else {
                grouping
                    .expression_references
                    .iter()
                    .map(|&reference| {
                        aggregate
                            .grouping_expressions
                            .get(reference as usize)
                            .ok_or_else(|| {
                                invalid(format!("grouping expression reference {reference} out of range"))
                            })
                    })
                    .collect::<Result<_>>()?
            };
        for expr in expressions {
            let key = from_proto_expression(expr, ext_set)?;
            let key = direct_reference(&key, schema)
                .ok_or_else(|| not_implemented(format!("computed grouping key {key}")))?;
            keys.push(key);
        }
    }

    let mut aggregates = Vec::with_capacity(aggregate.measures.len());
    for measure in &aggregate.measures {
        let function = measure
            .measure
            .as_ref()
            .ok_or_else(|| invalid("aggregate measure has no function"))?;
        if measure.filter.is_some() {
            return Err(not_implemented("aggregate measure filters"));
        }
        if function.phase != AggregationPhase::InitialToResult as i32 {
            return Err(not_implemented(format!(
                "aggregation phase {}; only initial-to-result is supported",
                function.phase
            )));
        }
        if function.invocation == AggregationInvocation::Distinct as i32 {
            return Err(not_implemented("distinct aggregate invocation"));
        }
        if !function.sorts.is_empty() {
            return Err(not_implemented("ordered aggregate functions"));
        }
        let arguments = from_proto_arguments(&function.arguments, &function.args, ext_set)?;
        let [argument] = arguments.as_slice() else {
            return Err(not_implemented(format!(
                "aggregate functions with {} arguments",
                arguments.len()
            )));
        };
        let target = direct_reference(argument, schema)
            .ok_or_else(|| not_implemented(format!("computed aggregate argument {argument}")))?;

        let name = ext_set.decode_function(function.function_reference)?;
        if !registry.is_aggregate(&name) {
            return Err(invalid(format!("'{name}' is not an aggregate function")));
        }
        let native = if keys.is_empty() {
            name.clone()
        } else {
            registry
                .hash_variant(&name)
                .map(|sig| sig.name.clone())
                .ok_or_else(|| {
                    not_implemented(format!("grouped aggregation with '{name}'"))
                })?
        };
        aggregates.push(Aggregate {
            function: native,
            name: format!("{name}({target})"),
            target: vec![target],
        });
    }

    DeclarationInfo::new(
        Declaration::new(
            NodeOptions::Aggregate(AggregateNodeOptions { aggregates, keys }),
            vec![input.declaration],
        ),
        registry,
    )
}

/// Rename a root relation's output from its depth-first name list
pub fn rename_root(
    info: DeclarationInfo,
    names: &[String],
    registry: &FunctionRegistry,
) -> Result<DeclarationInfo> {
    if names.is_empty() {
        return Ok(info);
    }
    let fields = info.output_schema.fields();
    let renamed = rename_fields(fields, names)?;
    if renamed.iter().zip(fields.iter()).all(|(new, old)| new == old.as_ref()) {
        return Ok(info);
    }

    let expressions = renamed
        .iter()
        .zip(fields.iter())
        .enumerate()
        .map(|(i, (new, old))| {
            let column = field(FieldRef::path(vec![i]));
            if new.data_type() == old.data_type() {
                column
            } else {
                // nested names live in the type
                call_with_options(
                    CAST,
                    vec![column],
                    FunctionOptions::Cast {
                        to: new.data_type().clone(),
                    },
                )
            }
        })
        .collect();
    let project = Declaration::new(
        NodeOptions::Project(ProjectNodeOptions {
            expressions,
            names: renamed.iter().map(|f| f.name().clone()).collect(),
        }),
        vec![info.declaration],
    );
    DeclarationInfo::new(project, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubstraitError;
    use arrow::datatypes::Field;
    use subarrow_plan::PlanError;

    fn source(names: &[&str]) -> DeclarationInfo {
        let fields: Vec<Field> = names
            .iter()
            .map(|n| Field::new(*n, DataType::Int32, true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        DeclarationInfo::new(
            Declaration::new(
                NodeOptions::TableSource(TableSourceNodeOptions {
                    schema,
                    batches: vec![],
                }),
                vec![],
            ),
            &FunctionRegistry::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_rename_root() {
        let registry = FunctionRegistry::default();
        let renamed = rename_root(
            source(&["a", "b"]),
            &["x".to_string(), "y".to_string()],
            &registry,
        )
        .unwrap();
        assert_eq!(renamed.declaration.factory_name(), "project");
        assert_eq!(renamed.output_schema.field(0).name(), "x");
        assert_eq!(renamed.output_schema.field(1).name(), "y");

        let result = rename_root(source(&["a", "b"]), &["x".to_string()], &registry);
        assert!(matches!(result, Err(SubstraitError::Invalid(_))));
    }

    #[test]
    fn test_rename_root_without_change_is_a_no_op() {
        let registry = FunctionRegistry::default();
        let info = rename_root(source(&["a"]), &["a".to_string()], &registry).unwrap();
        assert_eq!(info.declaration.factory_name(), "table_source");
    }

    #[test]
    fn test_emit_selects_and_reorders() {
        let registry = FunctionRegistry::default();
        let common = RelCommon {
            emit_kind: Some(EmitKind::Emit(substrait::proto::rel_common::Emit {
                output_mapping: vec![2, 0],
            })),
            ..Default::default()
        };
        let info = apply_emit(source(&["a", "b", "c"]), Some(&common), &registry).unwrap();
        let names: Vec<&str> = info
            .output_schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["c", "a"]);

        let common = RelCommon {
            emit_kind: Some(EmitKind::Emit(substrait::proto::rel_common::Emit {
                output_mapping: vec![3],
            })),
            ..Default::default()
        };
        assert!(matches!(
            apply_emit(source(&["a", "b", "c"]), Some(&common), &registry),
            Err(SubstraitError::Invalid(_))
        ));
    }

    #[test]
    fn test_join_type_numbering() {
        assert_eq!(join_type(1).unwrap(), JoinType::Inner);
        assert_eq!(join_type(2).unwrap(), JoinType::FullOuter);
        assert_eq!(join_type(6).unwrap(), JoinType::LeftAnti);
        assert!(matches!(join_type(0), Err(SubstraitError::NotImplemented(_))));
        assert!(matches!(join_type(7), Err(SubstraitError::NotImplemented(_))));
        assert!(matches!(join_type(99), Err(SubstraitError::Invalid(_))));
    }

    #[test]
    fn test_local_paths() {
        assert_eq!(
            local_path("file:///tmp/data.parquet").unwrap(),
            PathBuf::from("/tmp/data.parquet")
        );
        assert_eq!(
            local_path("/tmp/data.arrow").unwrap(),
            PathBuf::from("/tmp/data.arrow")
        );
        assert!(matches!(
            local_path("s3://bucket/data.parquet"),
            Err(SubstraitError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_provider_errors_keep_their_kind() {
        let err: SubstraitError = PlanError::NotFound("table t".to_string()).into();
        assert_eq!(err.kind(), subarrow_plan::ErrorKind::NotFound);
    }
}
