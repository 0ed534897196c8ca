use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use heritagedb::executor::{MutationPolicy, ScriptLoading};
use heritagedb::script::Script;
use heritagedb::{CatalogEngine, EngineConfig, Gid, OperationCall, Schema, Value};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "catalog-tool")]
#[command(about = "Runs catalog operations and checks schema and script files")]
struct Cli {
    /// Directory with the conventional schema/, data/ and scripts/ layout
    #[arg(long, global = true, default_value = "resources")]
    root: PathBuf,

    /// JSON engine config; overrides --root
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    policy: Option<PolicyArg>,

    /// Compile scripts on every call instead of caching them
    #[arg(long, global = true)]
    reparse: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Declared,
    NamePrefix,
}

#[derive(Subcommand)]
enum Command {
    /// Run one operation
    Exec {
        script: String,
        operation: String,
        /// Arguments as JSON scalars; anything else is passed as text
        args: Vec<String>,
    },
    /// Run a whole script's `main` operation
    Run {
        script: String,
        /// Named parameters as name=value; values are parsed like exec args
        params: Vec<String>,
    },
    /// Run a JSON list of {"operation", "args"} calls as one batch
    Batch { script: String, calls: PathBuf },
    /// Seed the catalog file when it is missing or empty
    Init,
    /// Print the catalog, or one node with --gid
    Show {
        #[arg(long)]
        gid: Option<String>,
    },
    /// Parse a schema file and list its types
    CheckSchema { path: PathBuf },
    /// Compile a script file against the configured schema
    CheckScript { path: PathBuf },
    /// Node counts per type
    Stats,
}

#[derive(Deserialize)]
struct PlainCall {
    operation: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = engine_config(&cli)?;

    match cli.command {
        Command::Exec {
            script,
            operation,
            args,
        } => {
            let engine = open(config).await?;
            let args = args.iter().map(|arg| parse_arg(arg)).collect();
            let value = engine
                .execute(&script, &operation, args)
                .await
                .with_context(|| format!("{}::{} failed", script, operation))?;
            print_json(&value_to_json(&value))
        }
        Command::Run { script, params } => {
            let engine = open(config).await?;
            let mut named = HashMap::new();
            for param in &params {
                let (name, raw) = param
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Parameter '{}' is not name=value", param))?;
                named.insert(name.to_string(), parse_arg(raw));
            }
            let value = engine
                .execute_script(&script, named)
                .await
                .with_context(|| format!("Script '{}' failed", script))?;
            print_json(&value_to_json(&value))
        }
        Command::Batch { script, calls } => {
            let engine = open(config).await?;
            let text = fs::read_to_string(&calls)
                .with_context(|| format!("Failed to read batch file '{}'", calls.display()))?;
            let plain: Vec<PlainCall> = serde_json::from_str(&text)
                .with_context(|| format!("Invalid batch file '{}'", calls.display()))?;
            let calls = plain
                .into_iter()
                .map(|call| {
                    let args = call.args.iter().map(json_to_value).collect::<Result<_>>()?;
                    Ok(OperationCall::new(call.operation, args))
                })
                .collect::<Result<Vec<_>>>()?;
            let results = engine
                .execute_batch(&script, calls)
                .await
                .with_context(|| format!("Batch on {} failed", script))?;
            print_json(&serde_json::Value::Array(
                results.iter().map(value_to_json).collect(),
            ))
        }
        Command::Init => {
            let engine = open(config).await?;
            let seeded = engine
                .initialize_if_empty()
                .await
                .context("Failed to initialize catalog")?;
            if seeded {
                println!("Catalog initialized at {}", engine.store().path().display());
            } else {
                println!("Catalog already has content; nothing to do");
            }
            Ok(())
        }
        Command::Show { gid } => {
            let engine = open(config).await?;
            let document = engine.store().load().await.context("Failed to load catalog")?;
            match gid {
                None => print_json(
                    &serde_json::to_value(document.to_file())
                        .context("Failed to render catalog")?,
                ),
                Some(gid) => {
                    let node = document
                        .node(&Gid::new(gid.as_str()))
                        .ok_or_else(|| anyhow!("No node with gid '{}'", gid))?;
                    let attributes: serde_json::Map<_, _> = node
                        .attributes()
                        .map(|(name, value)| (name.to_string(), value_to_json(value)))
                        .collect();
                    print_json(&json!({
                        "gid": node.gid().as_str(),
                        "type": node.type_name(),
                        "container": node.container().map(|c| c.gid().to_string()),
                        "attributes": attributes,
                    }))
                }
            }
        }
        Command::CheckSchema { path } => {
            let schema = Schema::load(&path)
                .with_context(|| format!("Schema '{}' is invalid", path.display()))?;
            println!("namespace {}", schema.namespace());
            println!("root {}", schema.root_type());
            for def in schema.types() {
                let marker = if def.is_abstract { " (abstract)" } else { "" };
                println!(
                    "  {}{}: {} attribute(s), {} relationship(s)",
                    def.name,
                    marker,
                    schema.attributes(&def.name).len(),
                    schema.relationships(&def.name).len()
                );
            }
            Ok(())
        }
        Command::CheckScript { path } => {
            let schema = Schema::load(&config.schema_path).with_context(|| {
                format!("Schema '{}' is invalid", config.schema_path.display())
            })?;
            let source = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read script '{}'", path.display()))?;
            let id = path.display().to_string();
            let script = Script::compile(&id, &source, &schema)
                .with_context(|| format!("Script '{}' does not compile", id))?;
            for operation in script.operations() {
                let kind = if operation.mutates { "mutates" } else { "readonly" };
                println!(
                    "  {}({}) {}",
                    operation.name,
                    operation.params.join(", "),
                    kind
                );
            }
            Ok(())
        }
        Command::Stats => {
            let engine = open(config).await?;
            let document = engine.store().load().await.context("Failed to load catalog")?;
            let mut per_type: BTreeMap<&str, usize> = BTreeMap::new();
            for gid in document.document_order() {
                if let Some(node) = document.node(&gid) {
                    *per_type.entry(node.type_name()).or_default() += 1;
                }
            }
            print_json(&json!({
                "schema": engine.schema().namespace(),
                "nodes": document.len(),
                "types": per_type,
            }))
        }
    }
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => EngineConfig::from_root(&cli.root),
    };
    if let Some(policy) = cli.policy {
        config = config.mutation_policy(match policy {
            PolicyArg::Declared => MutationPolicy::Declared,
            PolicyArg::NamePrefix => MutationPolicy::NamePrefix,
        });
    }
    if cli.reparse {
        config = config.script_loading(ScriptLoading::Reparse);
    }
    Ok(config)
}

async fn open(config: EngineConfig) -> Result<CatalogEngine> {
    let schema_path = config.schema_path.clone();
    CatalogEngine::open(config)
        .await
        .with_context(|| format!("Failed to open catalog with schema '{}'", schema_path.display()))
}

fn parse_arg(arg: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(arg)
        .ok()
        .and_then(|json| json_to_value(&json).ok())
        .unwrap_or_else(|| Value::Text(arg.to_string()))
}

fn json_to_value(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(
                n.as_f64()
                    .ok_or_else(|| anyhow!("Number {} is out of range", n))?,
            ),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => bail!("Arguments must be scalars, got {}", other),
    })
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => json!(b),
        Value::Integer(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Text(s) | Value::Enum(s) => json!(s),
        Value::Node(gid) => json!({ "node": gid.as_str() }),
        Value::Nodes(gids) => json!({
            "nodes": gids.iter().map(Gid::as_str).collect::<Vec<_>>()
        }),
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", text);
    Ok(())
}
