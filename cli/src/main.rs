//! Samyama CDC CLI: replay, inspect and validate CDC event files
//!
//! Event files are JSON lines, one `StreamsTransactionEvent` per line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use samyama_cdc::event::{read_json_lines, validate_tx_event_ids, Payload, StreamsTransactionEvent};
use samyama_cdc::graph::GraphStore;
use samyama_cdc::sink::{CdcStrategy, EventApplier, KeyStrategy};
use samyama_cdc::StreamsConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "samyama-cdc", version, about = "Samyama CDC event tools")]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Clone, clap::ValueEnum)]
enum Mode {
    SourceId,
    Schema,
}

#[derive(Clone, clap::ValueEnum)]
enum KeyStrategyArg {
    Default,
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an event file to an empty graph and print the result
    Replay {
        /// JSON lines event file
        file: PathBuf,

        /// Identity strategy
        #[arg(long, value_enum, default_value = "source-id")]
        mode: Mode,

        /// Synthetic id property (source-id mode)
        #[arg(long, default_value = "sourceId")]
        id_name: String,

        /// Synthetic label (source-id mode)
        #[arg(long, default_value = "SourceEvent")]
        label_name: String,

        /// Key selection (schema mode)
        #[arg(long, value_enum, default_value = "default")]
        key_strategy: KeyStrategyArg,

        /// Streams YAML config; with --topic, the strategy comes from it
        #[arg(long, requires = "topic")]
        config: Option<PathBuf>,

        /// Topic whose configured strategy to use
        #[arg(long)]
        topic: Option<String>,
    },
    /// List the events of a file
    Inspect {
        /// JSON lines event file
        file: PathBuf,
    },
    /// Check that every transaction in a file is complete and well numbered
    Validate {
        /// JSON lines event file
        file: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Replay {
            file,
            mode,
            id_name,
            label_name,
            key_strategy,
            config,
            topic,
        } => {
            let strategy = match (config, topic) {
                (Some(config), Some(topic)) => strategy_from_config(&config, &topic),
                _ => Ok(strategy_from_args(mode, id_name, label_name, key_strategy)),
            };
            strategy.and_then(|strategy| run_replay(&file, strategy, &cli.format))
        }
        Commands::Inspect { file } => run_inspect(&file, &cli.format),
        Commands::Validate { file } => run_validate(&file),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn strategy_from_args(mode: Mode, id_name: String, label_name: String, key_strategy: KeyStrategyArg) -> CdcStrategy {
    match mode {
        Mode::SourceId => CdcStrategy::source_id(id_name, label_name),
        Mode::Schema => CdcStrategy::schema(match key_strategy {
            KeyStrategyArg::Default => KeyStrategy::Default,
            KeyStrategyArg::All => KeyStrategy::All,
        }),
    }
}

fn strategy_from_config(path: &Path, topic: &str) -> Result<CdcStrategy> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = StreamsConfig::from_yaml_str(&yaml)?;
    match config.strategy_for(topic) {
        Some(strategy) => Ok(strategy),
        None => bail!("topic {} is not configured as a CDC topic", topic),
    }
}

fn load_events(path: &Path) -> Result<Vec<StreamsTransactionEvent>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let events = read_json_lines(BufReader::new(file))?;
    Ok(events)
}

fn run_replay(path: &Path, strategy: CdcStrategy, format: &OutputFormat) -> Result<()> {
    let events = load_events(path)?;
    if let Err(e) = validate_tx_event_ids(&events) {
        warn!("{}", e);
    }

    let mut store = GraphStore::new();
    let applier = EventApplier::new(strategy);
    let report = applier.apply_batch(&mut store, events)?;

    match format {
        OutputFormat::Json => {
            let nodes: Vec<serde_json::Value> = store
                .all_nodes()
                .iter()
                .map(|n| {
                    serde_json::json!({
                        "id": n.id.as_u64(),
                        "labels": n.label_names(),
                        "properties": n.properties,
                    })
                })
                .collect();
            let edges: Vec<serde_json::Value> = store
                .all_edges()
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "id": e.id.as_u64(),
                        "type": e.edge_type.as_str(),
                        "source": e.source.as_u64(),
                        "target": e.target.as_u64(),
                        "properties": e.properties,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "strategy": applier.strategy().name(),
                "report": report,
                "nodes": nodes,
                "edges": edges,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let mut nodes = Table::new();
            nodes.set_content_arrangement(ContentArrangement::Dynamic);
            nodes.set_header(vec!["id", "labels", "properties"]);
            for node in store.all_nodes() {
                nodes.add_row(vec![
                    node.id.as_u64().to_string(),
                    node.label_names().join(":"),
                    serde_json::to_string(&node.properties)?,
                ]);
            }

            let mut edges = Table::new();
            edges.set_content_arrangement(ContentArrangement::Dynamic);
            edges.set_header(vec!["id", "type", "source", "target", "properties"]);
            for edge in store.all_edges() {
                edges.add_row(vec![
                    edge.id.as_u64().to_string(),
                    edge.edge_type.as_str().to_string(),
                    edge.source.as_u64().to_string(),
                    edge.target.as_u64().to_string(),
                    serde_json::to_string(&edge.properties)?,
                ]);
            }

            println!("{}", nodes);
            println!("{}", edges);
            println!(
                "{} applied, {} skipped ({} mode)",
                report.applied,
                report.skipped,
                applier.strategy().name()
            );
        }
    }
    Ok(())
}

fn describe(event: &StreamsTransactionEvent) -> (&'static str, String) {
    match &event.payload {
        Payload::Node(node) => {
            let labels = node
                .after
                .as_ref()
                .or(node.before.as_ref())
                .map(|c| c.labels.join(":"))
                .unwrap_or_default();
            ("node", labels)
        }
        Payload::Relationship(rel) => ("relationship", format!("({})-[{}]->({})", rel.start.id, rel.label, rel.end.id)),
    }
}

fn run_inspect(path: &Path, format: &OutputFormat) -> Result<()> {
    let events = load_events(path)?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["txId", "txEventId", "operation", "kind", "id", "labels / type", "constraints"]);
            for event in &events {
                let (kind, labels) = describe(event);
                table.add_row(vec![
                    event.meta.tx_id.to_string(),
                    format!("{}/{}", event.meta.tx_event_id, event.meta.tx_events_count),
                    event.operation().to_string(),
                    kind.to_string(),
                    event.payload.id().to_string(),
                    labels,
                    event.schema.constraints.len().to_string(),
                ]);
            }
            println!("{}", table);
            println!("{} event(s)", events.len());
        }
    }
    Ok(())
}

fn run_validate(path: &Path) -> Result<()> {
    let events = load_events(path)?;
    validate_tx_event_ids(&events)?;
    println!("{} event(s), all transactions complete", events.len());
    Ok(())
}
