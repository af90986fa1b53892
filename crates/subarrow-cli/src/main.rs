//! subarrow command-line tool
//!
//! Runs, converts and inspects Substrait plans.

mod config;
mod logging;
mod output;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use subarrow_exec::{dataset_from_file, execute_serialized_plan};
use subarrow_plan::{
    Declaration, Expression, FunctionRegistry, NodeOptions, PlanError, ScanNodeOptions,
};
use subarrow_substrait::{
    binary_to_json, deserialize_relations, json_to_binary, plan_fingerprint, ConversionOptions,
    NamedTableProvider,
};
use tracing::info;

use crate::config::{Config, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "subarrow")]
#[command(about = "Translate and run Substrait plans on Arrow")]
struct Cli {
    /// Configuration file
    #[arg(short, long, value_name = "PATH", default_value = "subarrow.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a plan and print its results
    Run {
        /// Binary plan, or JSON when the file ends in .json
        plan: PathBuf,

        /// Overrides output.format from the config
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Convert a plan between its binary and JSON forms
    Convert { input: PathBuf, output: PathBuf },
    /// Print the declaration tree a plan translates to
    Explain { plan: PathBuf },
    /// Print the SHA-256 fingerprint of a plan's binary form
    Fingerprint { plan: PathBuf },
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn read_plan(path: &Path) -> anyhow::Result<Vec<u8>> {
    if is_json(path) {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Ok(json_to_binary(&json)?)
    } else {
        std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
    }
}

/// Named tables resolve to scans over the configured files
fn table_provider(tables: BTreeMap<String, PathBuf>) -> NamedTableProvider {
    Arc::new(move |names: &[String]| {
        let name = names.join(".");
        let path = tables
            .get(&name)
            .ok_or_else(|| PlanError::NotFound(format!("no table configured as '{name}'")))?;
        let dataset = dataset_from_file(path)
            .map_err(|e| PlanError::Invalid(format!("table '{name}': {e}")))?;
        Ok(Declaration::new(
            NodeOptions::Scan(ScanNodeOptions {
                dataset,
                filter: Expression::literal_true(),
            }),
            vec![],
        )
        .with_label(name))
    })
}

fn conversion_options(config: &Config) -> ConversionOptions {
    ConversionOptions::default()
        .with_strictness(config.conversion.strictness)
        .with_named_table_provider(table_provider(config.tables.clone()))
}

fn explain(declaration: &Declaration, registry: &FunctionRegistry, depth: usize) -> String {
    let schema = declaration
        .output_schema(registry)
        .map(|schema| {
            schema
                .fields()
                .iter()
                .map(|f| format!("{}: {}", f.name(), f.data_type()))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_else(|e| format!("<{e}>"));
    let mut line = format!("{}{}", "  ".repeat(depth), declaration.factory_name());
    if !declaration.label.is_empty() {
        line.push_str(&format!(" '{}'", declaration.label));
    }
    line.push_str(&format!(" [{schema}]\n"));
    for input in &declaration.inputs {
        line.push_str(&explain(input, registry, depth + 1));
    }
    line
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config.logging)?;

    match cli.command {
        Command::Run { plan, format } => {
            let bytes = read_plan(&plan)?;
            info!(plan = %plan.display(), fingerprint = %plan_fingerprint(&bytes), "running plan");
            let reader = execute_serialized_plan(&bytes, None, &conversion_options(&config))?;
            let batches = reader.collect::<Result<Vec<_>, _>>()?;
            let format = format.unwrap_or(config.output.format);
            output::write_batches(&mut std::io::stdout().lock(), format, &batches)?;
        }
        Command::Convert { input, output } => {
            let bytes = read_plan(&input)?;
            if is_json(&output) {
                std::fs::write(&output, binary_to_json(&bytes)?)?;
            } else {
                std::fs::write(&output, bytes)?;
            }
            info!(from = %input.display(), to = %output.display(), "converted plan");
        }
        Command::Explain { plan } => {
            let bytes = read_plan(&plan)?;
            let options = conversion_options(&config);
            let relations = deserialize_relations(&bytes, None, &options)?;
            let registry = options.function_registry();
            for (i, info) in relations.relations.iter().enumerate() {
                println!("relation {i}:");
                print!("{}", explain(&info.declaration, &registry, 1));
            }
        }
        Command::Fingerprint { plan } => {
            println!("{}", plan_fingerprint(&read_plan(&plan)?));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::writer::FileWriter;
    use arrow::record_batch::RecordBatch;

    fn write_table(path: &Path) {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, true)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1, 2]))])
                .unwrap();
        let mut writer = FileWriter::try_new(File::create(path).unwrap(), &schema).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["subarrow", "run", "plan.json", "--format", "csv"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("subarrow.yaml"));
        assert!(matches!(
            cli.command,
            Command::Run { format: Some(OutputFormat::Csv), .. }
        ));
        assert!(Cli::try_parse_from(["subarrow", "explode", "plan.json"]).is_err());
    }

    #[test]
    fn test_table_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.arrow");
        write_table(&path);

        let provider = table_provider(BTreeMap::from([("db.numbers".to_string(), path)]));
        let declaration = provider(&["db".to_string(), "numbers".to_string()]).unwrap();
        assert_eq!(declaration.factory_name(), "scan");
        assert_eq!(declaration.label, "db.numbers");

        let missing = provider(&["numbers".to_string()]).unwrap_err();
        assert!(matches!(missing, PlanError::NotFound(_)));
    }

    #[test]
    fn test_run_json_plan_against_configured_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.arrow");
        write_table(&path);
        let plan_path = dir.path().join("plan.json");
        std::fs::write(
            &plan_path,
            r#"{
  "relations": [{
    "root": {
      "input": {
        "read": {
          "baseSchema": {
            "names": ["n"],
            "struct": {"types": [{"i64": {"nullability": "NULLABILITY_NULLABLE"}}]}
          },
          "namedTable": {"names": ["numbers"]}
        }
      },
      "names": ["n"]
    }
  }]
}"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.tables.insert("numbers".to_string(), path);

        let bytes = read_plan(&plan_path).unwrap();
        let reader = execute_serialized_plan(&bytes, None, &conversion_options(&config)).unwrap();
        let batches = reader.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);

        let relations = deserialize_relations(&bytes, None, &conversion_options(&config)).unwrap();
        let tree = explain(
            &relations.relations[0].declaration,
            &FunctionRegistry::default_registry(),
            0,
        );
        assert_eq!(tree, "scan 'numbers' [n: Int64]\n");
    }
}
