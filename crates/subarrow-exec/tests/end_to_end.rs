//! End-to-end tests: Substrait plans translated and executed
//!
//! Run with: cargo test --package subarrow-exec --test end_to_end

use std::fs::File;
use std::sync::Arc;

use arrow::array::{Array, AsArray, Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Int64Type, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use prost::Message;
use serde_json::{json, Value};
use subarrow_exec::{collect, deserialize_plan, execute_serialized_plan, ExecPlan};
use subarrow_plan::{
    call, col, lit, BatchCollector, Declaration, ErrorKind, Expression, FileFormat,
    FileSystemDataset, FilterNodeOptions, FunctionRegistry, NodeOptions, PlanError,
    ScanNodeOptions, TableSourceNodeOptions, WriteNodeOptions,
};
use subarrow_registry::{SUBSTRAIT_ARITHMETIC_URI, SUBSTRAIT_COMPARISON_URI};
use subarrow_substrait::{
    deserialize_plans, plan_from_json, serialize_plan, ConversionOptions, ExtensionSet,
    SinkFactory,
};

fn table(columns: Vec<(&str, Vec<Option<i32>>)>) -> Declaration {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, _)| Field::new(*name, DataType::Int32, true))
        .collect();
    let schema: SchemaRef = Arc::new(Schema::new(fields));
    let arrays = columns
        .into_iter()
        .map(|(_, values)| Arc::new(Int32Array::from(values)) as Arc<dyn Array>)
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).expect("valid test batch");
    Declaration::new(
        NodeOptions::TableSource(TableSourceNodeOptions {
            schema,
            batches: vec![batch],
        }),
        vec![],
    )
}

/// Tables every test plan can read by name
fn options() -> ConversionOptions {
    ConversionOptions::default().with_named_table_provider(Arc::new(
        |names: &[String]| -> Result<Declaration, PlanError> {
            match names.first().map(String::as_str) {
                Some("sales") => Ok(table(vec![
                    ("key", vec![Some(10), Some(20), Some(30), Some(40), Some(10), Some(20)]),
                    ("value", vec![Some(30), Some(40), Some(60), Some(60), Some(50), Some(50)]),
                ])),
                Some("DATA") => Ok(table(vec![("FOO", vec![Some(1), Some(2), Some(5)])])),
                Some("left") => Ok(table(vec![
                    ("a", vec![Some(1), Some(2), Some(3)]),
                    ("b", vec![Some(100), Some(200), Some(300)]),
                ])),
                Some("right") => Ok(table(vec![
                    ("x", vec![Some(3), Some(1), Some(7)]),
                    ("y", vec![Some(-3), Some(-1), Some(-7)]),
                ])),
                _ => Err(PlanError::NotFound(format!("table {names:?}"))),
            }
        },
    ))
}

fn i32_type() -> Value {
    json!({"i32": {"nullability": "NULLABILITY_NULLABLE"}})
}

fn column(index: i32) -> Value {
    json!({
        "selection": {
            "directReference": {"structField": {"field": index}},
            "rootReference": {}
        }
    })
}

fn named_read(table: &str, names: &[&str]) -> Value {
    let types: Vec<Value> = names.iter().map(|_| i32_type()).collect();
    json!({
        "read": {
            "baseSchema": {
                "names": names,
                "struct": {"types": types, "nullability": "NULLABILITY_REQUIRED"}
            },
            "namedTable": {"names": [table]}
        }
    })
}

fn plan_bytes(plan: Value) -> Vec<u8> {
    plan_from_json(&plan.to_string())
        .expect("test plan should parse")
        .encode_to_vec()
}

fn single_root(root: Value, names: &[&str]) -> Vec<u8> {
    plan_bytes(json!({
        "extensionUris": [
            {"extensionUriAnchor": 1, "uri": SUBSTRAIT_ARITHMETIC_URI},
            {"extensionUriAnchor": 2, "uri": SUBSTRAIT_COMPARISON_URI}
        ],
        "extensions": [
            {"extensionFunction": {"extensionUriReference": 1, "functionAnchor": 0, "name": "sum"}},
            {"extensionFunction": {"extensionUriReference": 2, "functionAnchor": 1, "name": "equal"}},
            {"extensionFunction": {"extensionUriReference": 2, "functionAnchor": 2, "name": "gt"}}
        ],
        "relations": [{"root": {"input": root, "names": names}}]
    }))
}

fn execute(bytes: &[u8]) -> Vec<RecordBatch> {
    execute_serialized_plan(bytes, None, &options())
        .expect("plan should execute")
        .collect::<Result<Vec<_>, _>>()
        .expect("batches should be readable")
}

fn int32s(batches: &[RecordBatch], column: usize) -> Vec<Option<i32>> {
    batches
        .iter()
        .flat_map(|b| b.column(column).as_primitive::<Int32Type>().iter().collect::<Vec<_>>())
        .collect()
}

fn int64s(batches: &[RecordBatch], column: usize) -> Vec<Option<i64>> {
    batches
        .iter()
        .flat_map(|b| b.column(column).as_primitive::<Int64Type>().iter().collect::<Vec<_>>())
        .collect()
}

#[test]
fn test_grouped_sum() {
    let root = json!({
        "aggregate": {
            "input": named_read("sales", &["key", "value"]),
            "groupings": [{"groupingExpressions": [column(0)]}],
            "measures": [{
                "measure": {
                    "functionReference": 0,
                    "arguments": [{"value": column(1)}],
                    "phase": "AGGREGATION_PHASE_INITIAL_TO_RESULT",
                    "invocation": "AGGREGATION_INVOCATION_ALL",
                    "outputType": {"i64": {"nullability": "NULLABILITY_NULLABLE"}}
                }
            }]
        }
    });
    let batches = execute(&single_root(root, &["total", "key"]));
    assert_eq!(batches[0].schema().field(0).name(), "total");

    let rows: Vec<(Option<i64>, Option<i32>)> = int64s(&batches, 0)
        .into_iter()
        .zip(int32s(&batches, 1))
        .collect();
    assert_eq!(
        rows,
        vec![
            (Some(80), Some(10)),
            (Some(90), Some(20)),
            (Some(60), Some(30)),
            (Some(60), Some(40)),
        ]
    );
}

#[test]
fn test_power_and_sqrt_project() {
    let fp64 = json!({"fp64": {"nullability": "NULLABILITY_NULLABLE"}});
    let power = json!({
        "scalarFunction": {
            "functionReference": 0,
            "arguments": [{"value": column(0)}, {"value": {"literal": {"i32": 2}}}],
            "outputType": fp64
        }
    });
    let plan = json!({
        "extensionUris": [{"extensionUriAnchor": 1, "uri": SUBSTRAIT_ARITHMETIC_URI}],
        "extensions": [
            {"extensionFunction": {"extensionUriReference": 1, "functionAnchor": 0, "name": "power"}},
            {"extensionFunction": {"extensionUriReference": 1, "functionAnchor": 1, "name": "sqrt"}}
        ],
        "relations": [{
            "root": {
                "input": {
                    "project": {
                        "common": {"emit": {"outputMapping": [1, 2]}},
                        "input": named_read("DATA", &["FOO"]),
                        "expressions": [
                            power.clone(),
                            {
                                "scalarFunction": {
                                    "functionReference": 1,
                                    "arguments": [{"value": power}],
                                    "outputType": fp64
                                }
                            }
                        ]
                    }
                },
                "names": ["squared", "root"]
            }
        }]
    });
    let batches = execute(&plan_bytes(plan));
    let floats = |column: usize| -> Vec<Option<f64>> {
        batches
            .iter()
            .flat_map(|b| b.column(column).as_primitive::<Float64Type>().iter().collect::<Vec<_>>())
            .collect()
    };
    assert_eq!(floats(0), vec![Some(1.0), Some(4.0), Some(25.0)]);
    assert_eq!(floats(1), vec![Some(1.0), Some(2.0), Some(5.0)]);
}

#[test]
fn test_isthmus_plan() {
    // As produced by Isthmus for `SELECT FOO + 1 FROM DATA`
    let plan = json!({
        "extensionUris": [{"extensionUriAnchor": 1, "uri": "/functions_arithmetic.yaml"}],
        "extensions": [{
            "extensionFunction": {
                "extensionUriReference": 1,
                "functionAnchor": 0,
                "name": "add:opt_i32_i32"
            }
        }],
        "relations": [{
            "root": {
                "input": {
                    "project": {
                        "common": {"emit": {"outputMapping": [1]}},
                        "input": named_read("DATA", &["FOO"]),
                        "expressions": [{
                            "scalarFunction": {
                                "functionReference": 0,
                                "arguments": [
                                    {"enum": "unspecified"},
                                    {"value": column(0)},
                                    {"value": {"literal": {"i32": 1}}}
                                ],
                                "outputType": i32_type()
                            }
                        }]
                    }
                },
                "names": ["EXPR$0"]
            }
        }]
    });
    let batches = execute(&plan_bytes(plan));
    assert_eq!(batches[0].schema().field(0).name(), "EXPR$0");
    assert_eq!(int32s(&batches, 0), vec![Some(2), Some(3), Some(6)]);
}

#[test]
fn test_join_with_emit() {
    let root = json!({
        "join": {
            "common": {"emit": {"outputMapping": [1, 3]}},
            "left": named_read("left", &["a", "b"]),
            "right": named_read("right", &["x", "y"]),
            "expression": {
                "scalarFunction": {
                    "functionReference": 1,
                    "arguments": [{"value": column(0)}, {"value": column(2)}],
                    "outputType": {"bool": {"nullability": "NULLABILITY_NULLABLE"}}
                }
            },
            "type": "JOIN_TYPE_INNER"
        }
    });
    let batches = execute(&single_root(root, &[]));
    let mut rows: Vec<(Option<i32>, Option<i32>)> =
        int32s(&batches, 0).into_iter().zip(int32s(&batches, 1)).collect();
    rows.sort();
    assert_eq!(rows, vec![(Some(100), Some(-1)), (Some(300), Some(-3))]);
}

#[test]
fn test_virtual_table_filter() {
    let root = json!({
        "filter": {
            "input": {
                "read": {
                    "baseSchema": {
                        "names": ["n"],
                        "struct": {"types": [i32_type()], "nullability": "NULLABILITY_REQUIRED"}
                    },
                    "virtualTable": {
                        "expressions": [
                            {"fields": [{"literal": {"i32": 4}}]},
                            {"fields": [{"literal": {"i32": 9}}]},
                            {"fields": [{"literal": {"i32": 2}}]}
                        ]
                    }
                }
            },
            "condition": {
                "scalarFunction": {
                    "functionReference": 2,
                    "arguments": [{"value": column(0)}, {"value": {"literal": {"i32": 3}}}],
                    "outputType": {"bool": {"nullability": "NULLABILITY_NULLABLE"}}
                }
            }
        }
    });
    let batches = execute(&single_root(root, &[]));
    assert_eq!(int32s(&batches, 0), vec![Some(4), Some(9)]);
}

#[test]
fn test_consumer_finishes_once() {
    let bytes = single_root(named_read("DATA", &["FOO"]), &[]);
    let collector = Arc::new(BatchCollector::new());
    let mut plan = deserialize_plan(&bytes, collector.clone(), None, &options()).unwrap();
    plan.start_producing().unwrap();

    assert!(collector.is_finished());
    assert_eq!(collector.schema().unwrap().field(0).name(), "FOO");
    let rows: usize = collector.take_batches().iter().map(|b| b.num_rows()).sum();
    assert_eq!(rows, 3);

    let err = plan.start_producing().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[test]
fn test_plan_without_relations() {
    let bytes = plan_bytes(json!({"relations": []}));
    let err = execute_serialized_plan(&bytes, None, &options()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let collector = Arc::new(BatchCollector::new());
    let err = deserialize_plan(&bytes, collector, None, &options()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[test]
fn test_write_sink_then_scan() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = single_root(named_read("DATA", &["FOO"]), &[]);
    let write_options = || {
        Some(WriteNodeOptions {
            base_dir: dir.path().to_path_buf(),
            format: FileFormat::Ipc,
            basename_template: "part-{i}.arrow".to_string(),
        })
    };
    let plans = deserialize_plans(&bytes, SinkFactory::Write(&write_options), None, &options())
        .unwrap();
    let mut plan =
        ExecPlan::from_declarations(plans.declarations, FunctionRegistry::default_registry())
            .unwrap();
    plan.start_producing().unwrap();

    let written = dir.path().join("part-0.arrow");
    assert!(written.exists());

    let root = json!({
        "read": {
            "baseSchema": {
                "names": ["FOO"],
                "struct": {"types": [i32_type()], "nullability": "NULLABILITY_REQUIRED"}
            },
            "localFiles": {
                "items": [{"uriFile": format!("file://{}", written.display()), "arrow": {}}]
            }
        }
    });
    let batches = execute(&single_root(root, &[]));
    assert_eq!(int32s(&batches, 0), vec![Some(1), Some(2), Some(5)]);
}

#[test]
fn test_serialized_scan_filter_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.parquet");
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, true),
        Field::new("name", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3, 4])),
            Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
        ],
    )
    .unwrap();
    let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema.clone(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let registry = FunctionRegistry::default_registry();
    let scan = Declaration::new(
        NodeOptions::Scan(ScanNodeOptions {
            dataset: FileSystemDataset {
                schema: schema.clone(),
                format: FileFormat::Parquet,
                files: vec![path],
            },
            filter: Expression::literal_true(),
        }),
        vec![],
    );
    let filter_expression = call("greater_equal", vec![col("id"), lit(3i32)])
        .bind(&schema, &registry)
        .unwrap();
    let declaration = Declaration::new(
        NodeOptions::Filter(FilterNodeOptions { filter_expression }),
        vec![scan],
    );
    let (_, expected) = collect(&declaration, &registry).unwrap();

    let mut ext_set = ExtensionSet::default();
    let bytes = serialize_plan(&declaration, &mut ext_set, &registry).unwrap();
    let actual = execute(&bytes);

    assert_eq!(int32s(&actual, 0), int32s(&expected, 0));
    assert_eq!(int32s(&actual, 0), vec![Some(3), Some(4)]);
    let names: Vec<&str> = actual
        .iter()
        .flat_map(|b| b.column(1).as_string::<i32>().iter().flatten().collect::<Vec<_>>())
        .collect();
    assert_eq!(names, vec!["c", "d"]);
}
