use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use octofhir_conformance::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conformance")]
#[command(about = "Capability-driven conformance tests for FHIR servers")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tests derived from a CapabilityStatement
    Tests {
        /// Path to the reference CapabilityStatement
        #[arg(short, long)]
        capability: PathBuf,
        /// Resource type to derive tests for
        #[arg(short, long, default_value = "Encounter")]
        resource_type: String,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Run the derived tests against a server
    Run {
        /// Path to the reference CapabilityStatement
        #[arg(short, long)]
        capability: PathBuf,
        /// Resource types to test; each runs as an independent sequence
        #[arg(short, long, default_value = "Encounter", value_delimiter = ',')]
        resource_type: Vec<String>,
        /// Path to the JSON configuration file
        #[arg(long)]
        config: PathBuf,
        /// Server CapabilityStatement; fetched from <base>/metadata when absent
        #[arg(long)]
        server_capability: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Tests {
            capability,
            resource_type,
            format,
        } => list_tests(&capability, &resource_type, format),
        Commands::Run {
            capability,
            resource_type,
            config,
            server_capability,
            format,
        } => {
            let failed = run_tests(
                &capability,
                &resource_type,
                &config,
                server_capability.as_deref(),
                format,
            )
            .await?;
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn list_tests(capability: &Path, resource_type: &str, format: OutputFormat) -> anyhow::Result<()> {
    let statement = read_json(capability)?;
    let definitions = CapabilityMetadataExtractor::extract_from_statement(&statement, resource_type)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&definitions)?),
        OutputFormat::Text => {
            println!("{} tests for {}:", definitions.len(), resource_type);
            for definition in &definitions {
                println!("  {:<32} {}", definition.id, definition.description());
            }
        }
    }
    Ok(())
}

async fn run_tests(
    capability: &Path,
    resource_types: &[String],
    config: &Path,
    server_capability: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<bool> {
    let config = ConformanceConfig::from_file(config)
        .with_context(|| format!("loading configuration from {}", config.display()))?;
    let reference = read_json(capability)?;
    let server_statement = server_capability.map(read_json).transpose()?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.request_timeout())?);

    if config.token().is_none() {
        tracing::warn!("no bearer token configured; authenticated tests will be omitted");
    }

    let mut runners = Vec::with_capacity(resource_types.len());
    let mut definitions = Vec::with_capacity(resource_types.len());
    for resource_type in resource_types {
        let server = match &server_statement {
            Some(statement) => CapabilityModel::from_capability_statement(statement, resource_type)?,
            None => ExecutionContext::from_config(&config, transport.clone())?
                .fetch_capability_model(resource_type)
                .await
                .context("fetching server CapabilityStatement")?,
        };
        runners.push(SequenceRunner::from_config(&config, transport.clone(), server)?);
        definitions.push(CapabilityMetadataExtractor::extract_from_statement(
            &reference,
            resource_type,
        )?);
    }

    let sequences: Vec<_> = runners.iter().zip(definitions).collect();
    let results = run_sequences(&sequences).await;

    let failed = results
        .iter()
        .flatten()
        .any(|result| result.outcome.is_fail());

    match format {
        OutputFormat::Json => {
            let report: serde_json::Map<String, Value> = resource_types
                .iter()
                .cloned()
                .zip(results.iter().map(serde_json::to_value))
                .map(|(resource_type, value)| value.map(|value| (resource_type, value)))
                .collect::<std::result::Result<_, _>>()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for (resource_type, results) in resource_types.iter().zip(&results) {
                print_sequence(resource_type, results);
            }
        }
    }
    Ok(failed)
}

fn print_sequence(resource_type: &str, results: &[TestResult]) {
    println!("{resource_type}:");
    for result in results {
        let marker = match result.outcome.verdict {
            Verdict::Pass => "✅",
            Verdict::Fail(_) => "❌",
            Verdict::Skip(_) => "⏭️ ",
            Verdict::Omit(_) => "➖",
        };
        println!("  {marker} {:<32} {}", result.id, result.outcome.verdict.label());
        if let Some(message) = result.outcome.message() {
            println!("      {message}");
        }
        for warning in &result.outcome.warnings {
            println!("      ⚠️  {warning}");
        }
    }

    let passed = results.iter().filter(|r| r.outcome.is_pass()).count();
    println!("  {passed}/{} passed", results.len());
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    if !value.is_object() {
        bail!("{} does not contain a JSON object", path.display());
    }
    Ok(value)
}
