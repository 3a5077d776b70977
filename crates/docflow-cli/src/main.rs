//! Docflow CLI
//!
//! Inspects `docflow.toml` configurations and shows the native queries the
//! engine would send to the store, without connecting to one.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use anyhow::{bail, Context};
use bson::{Bson, Document};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use docflow_core::config::LoggingConfig;
use docflow_core::{
    sort, DocflowConfig, Executor, FilterCompiler, FilterSet, IdentifierKind, InputBag,
    MemoryStore, SchemaRegistry, SortField, WritePlanner,
};

#[derive(Parser)]
#[command(name = "docflow")]
#[command(version)]
#[command(about = "Docflow CLI - compile document store filters and plan bulk writes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ./docflow.toml when present)
    #[arg(short, long, value_name = "FILE", global = true, env = "DOCFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured document types and their identifier kinds
    Types,

    /// Validate the configuration, and optionally a filter set and sort list
    Validate {
        /// Filter set JSON file
        #[arg(short, long, value_name = "FILE")]
        filters: Option<PathBuf>,

        /// Sort list JSON file
        #[arg(short, long, value_name = "FILE")]
        sort: Option<PathBuf>,
    },

    /// Compile a filter set into a query document
    Compile {
        /// Filter set JSON file
        #[arg(short, long, value_name = "FILE")]
        filters: PathBuf,

        /// Input values as an (extended) JSON object
        #[arg(short, long, value_name = "FILE")]
        inputs: Option<PathBuf>,

        /// Sort list JSON file
        #[arg(short, long, value_name = "FILE")]
        sort: Option<PathBuf>,

        /// Document type (overrides server.document_type)
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,
    },

    /// Show the delete predicate for a list of identifiers
    PlanDelete {
        /// Identifiers to delete
        ids: Vec<String>,

        /// Document type (overrides server.document_type)
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,

        /// Identifier kind (overrides the kind inferred from the type)
        #[arg(long, value_parser = parse_id_kind)]
        id_kind: Option<IdentifierKind>,
    },

    /// Write an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "docflow.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { output, force } = &cli.command {
        init_logging(cli.verbose, &LoggingConfig::default())?;
        return generate_config(output, *force);
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging)?;
    config.validate()?;

    match cli.command {
        Commands::Types => list_types(&config),
        Commands::Validate { filters, sort } => {
            validate(&config, filters.as_deref(), sort.as_deref())
        }
        Commands::Compile {
            filters,
            inputs,
            sort,
            type_name,
        } => compile(
            &config,
            &filters,
            inputs.as_deref(),
            sort.as_deref(),
            type_name.as_deref(),
        ),
        Commands::PlanDelete {
            ids,
            type_name,
            id_kind,
        } => plan_delete(&config, &ids, type_name.as_deref(), id_kind),
        Commands::Init { .. } => Ok(()),
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) -> anyhow::Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        logging.level.parse().unwrap_or(Level::INFO)
    };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DocflowConfig> {
    let config = match path {
        Some(path) => DocflowConfig::load_required(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DocflowConfig::load()?,
    };
    Ok(config)
}

fn registry(config: &DocflowConfig) -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry.register_definitions(&config.types);
    registry
}

fn list_types(config: &DocflowConfig) -> anyhow::Result<()> {
    let registry = registry(config);
    let names = registry.type_names();
    if names.is_empty() {
        println!("No document types configured");
        return Ok(());
    }

    for name in names {
        let Some(schema) = registry.resolve(&name) else {
            continue;
        };
        let id_kind = IdentifierKind::from_schema(&schema);
        let identifier = schema
            .identifier_field()
            .map_or_else(|| "-".to_string(), |f| f.name);
        println!("{name}");
        println!("   Identifier: {identifier} ({id_kind})");
        if schema.is_open() {
            println!("   Open:       yes");
        }
        println!("   Fields:");
        for (field, kind) in schema.fields() {
            println!("     - {field} ({kind})");
        }
    }
    Ok(())
}

fn validate(
    config: &DocflowConfig,
    filters: Option<&Path>,
    sort_path: Option<&Path>,
) -> anyhow::Result<()> {
    let filters = filters.map(read_filters).transpose()?.unwrap_or_default();
    let sort_fields = sort_path.map(read_sort).transpose()?.unwrap_or_default();

    let executor = Executor::from_config(MemoryStore::new(), config);
    let issues = executor.fetch_validation_issues(&filters, &sort_fields);
    for issue in &issues {
        println!("{issue}");
    }

    let fatal = issues.iter().filter(|i| i.is_fatal()).count();
    if fatal > 0 {
        bail!("configuration has {fatal} fatal issue(s)");
    }
    println!(
        "Configuration is valid ({} warning(s))",
        issues.len() - fatal
    );
    Ok(())
}

fn compile(
    config: &DocflowConfig,
    filters_path: &Path,
    inputs_path: Option<&Path>,
    sort_path: Option<&Path>,
    type_name: Option<&str>,
) -> anyhow::Result<()> {
    let filters = read_filters(filters_path)?;
    let inputs = inputs_path.map(read_inputs).transpose()?.unwrap_or_default();
    let sort_fields = sort_path.map(read_sort).transpose()?.unwrap_or_default();

    let registry = registry(config);
    let schema = registry.resolve_or_untyped(type_name.or(config.server.document_type.as_deref()));
    debug!(type_name = schema.type_name(), "Compiling against schema");

    let compiled = FilterCompiler::new(&schema, &inputs)
        .with_id_kind_override(config.server.id_kind_override)
        .compile_set(
        &filters,
        &config.server.reserved_inputs(),
        config.limits.max_filter_depth,
    )?;
    for warning in &compiled.warnings {
        eprintln!("{warning}");
    }
    for issue in sort::validation_issues(&sort_fields) {
        if issue.is_fatal() {
            return Err(issue.into_error().into());
        }
    }

    let mut output = Document::new();
    output.insert("filter", compiled.predicate);
    if let Some(sort_spec) = sort::sort_document(&sort_fields) {
        output.insert("sort", sort_spec);
    }
    print_json(output)
}

fn plan_delete(
    config: &DocflowConfig,
    ids: &[String],
    type_name: Option<&str>,
    id_kind: Option<IdentifierKind>,
) -> anyhow::Result<()> {
    let registry = registry(config);
    let schema = registry.resolve_or_untyped(type_name.or(config.server.document_type.as_deref()));
    let kind = IdentifierKind::resolve(&schema, id_kind.or(config.server.id_kind_override));
    info!(type_name = schema.type_name(), id_kind = %kind, "Planning deletion");

    let ids: Vec<Bson> = ids.iter().cloned().map(Bson::String).collect();
    let filter = WritePlanner::new(&schema, kind)
        .with_max_batch_size(config.limits.max_batch_size)
        .plan_deletions(&ids)?;
    print_json(filter)
}

fn generate_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }
    fs::write(output, EXAMPLE_CONFIG)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

fn read_filters(path: &Path) -> anyhow::Result<FilterSet> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing filter set {}", path.display()))
}

fn read_sort(path: &Path) -> anyhow::Result<Vec<SortField>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing sort list {}", path.display()))
}

fn read_inputs(path: &Path) -> anyhow::Result<InputBag> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    match Bson::try_from(json)? {
        Bson::Document(document) => Ok(document.into_iter().collect()),
        _ => bail!("{} must hold a JSON object", path.display()),
    }
}

fn print_json(document: Document) -> anyhow::Result<()> {
    let json = Bson::Document(document).into_relaxed_extjson();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn parse_id_kind(value: &str) -> Result<IdentifierKind, String> {
    IdentifierKind::ALL
        .into_iter()
        .find(|kind| kind.name() == value)
        .ok_or_else(|| {
            let names: Vec<&str> = IdentifierKind::ALL.iter().map(|k| k.name()).collect();
            format!("expected one of: {}", names.join(", "))
        })
}

const EXAMPLE_CONFIG: &str = r#"# Docflow configuration
[server]
connection_string = "mongodb://localhost:27017"
database = "crm"
# collection = "customers"   # omit to read the "Collection Name" input
document_type = "Customer"
# id_kind_override = "int64"

[[types]]
name = "Customer"
fields = { Id = "string", Name = "string", Tier = "int32", Since = "date_time" }

[logging]
level = "info"
format = "text"

[limits]
max_filter_depth = 32
max_batch_size = 0
"#;
