//! Infragraph CLI - cloud infrastructure knowledge graph

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use infragraph_core::config::Config;
use infragraph_core::domain::discovery::{DiscoveryAdapter, DiscoveryOptions, SnapshotAdapter};
use infragraph_core::domain::graph::{
    CloudProvider, GraphStorage, RelationshipType, ResourceType, Subgraph, SyncRecord, SyncStatus,
    TraversalDirection,
};
use infragraph_core::domain::query::GraphQueryService;
use infragraph_core::domain::sync::SyncOrchestrator;
use infragraph_core::infrastructure::SqliteGraphStorage;
use infragraph_core::storage::{Database, DatabaseConfig};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infragraph")]
#[command(author, version, about = "Cloud infrastructure knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path (defaults to the configured path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (defaults to <config dir>/infragraph/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover providers from inventory snapshots and merge them into the graph
    Sync {
        /// Provider to sync; pair each one with a --snapshot
        #[arg(short, long = "provider", required = true)]
        providers: Vec<String>,
        /// Snapshot file for the provider in the same position
        #[arg(short, long = "snapshot", required = true)]
        snapshots: Vec<PathBuf>,
        /// Only discover these resource types
        #[arg(long = "resource-type")]
        resource_types: Vec<String>,
        /// Only discover these regions
        #[arg(long = "region")]
        regions: Vec<String>,
        /// Only keep resources tagged KEY=VALUE
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show graph statistics
    Stats,

    /// Expand the neighborhood of a node
    Neighbors {
        /// Node ID
        id: String,
        #[arg(short, long, default_value_t = 1)]
        depth: u32,
        /// upstream, downstream or both
        #[arg(long, default_value = "both")]
        direction: String,
        /// Only follow these relationship types
        #[arg(long = "edge-type")]
        edge_types: Vec<String>,
    },

    /// Everything that depends on a node
    BlastRadius {
        /// Node ID
        id: String,
        #[arg(short, long, default_value_t = 3)]
        depth: u32,
    },

    /// Everything a node depends on
    Dependencies {
        /// Node ID
        id: String,
        #[arg(short, long, default_value_t = 3)]
        depth: u32,
    },

    /// Show the change history of a node
    Timeline {
        /// Node ID
        id: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Summarize edges that cross provider boundaries
    CrossCloud,

    /// Show recent sync records
    History {
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Reset configuration to defaults
    Reset,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,infragraph=debug,infragraph_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    if let Commands::Config { action } = &cli.command {
        return cmd_config(action, &config, cli.config.as_deref(), out);
    }

    let mut db_config = DatabaseConfig::from_storage(&config.storage);
    if let Some(path) = &cli.db {
        db_config.path = path.clone();
    }
    let db = Database::new(db_config).await?;
    debug!(path = %db.config().path.display(), "Using graph database");
    let storage: Arc<dyn GraphStorage> = Arc::new(SqliteGraphStorage::new(db.pool().clone()));
    let queries = GraphQueryService::new(storage.clone(), config.sync.traversal_max_nodes);

    let result = match cli.command {
        Commands::Sync {
            providers,
            snapshots,
            resource_types,
            regions,
            tags,
        } => {
            let options = discovery_options(&resource_types, &regions, &tags)?;
            cmd_sync(storage, &config, &providers, &snapshots, &options, out).await
        }
        Commands::Stats => cmd_stats(storage.as_ref(), out).await,
        Commands::Neighbors {
            id,
            depth,
            direction,
            edge_types,
        } => {
            let direction = TraversalDirection::parse(&direction)
                .ok_or_else(|| anyhow!("Unknown direction '{}'. Use upstream, downstream or both.", direction))?;
            let edge_types = parse_all(&edge_types, "relationship type", RelationshipType::parse)?;
            let filter = (!edge_types.is_empty()).then_some(edge_types.as_slice());
            let subgraph = queries.neighbors(&id, depth, direction, filter).await?;
            print_subgraph(&subgraph, out)
        }
        Commands::BlastRadius { id, depth } => {
            let subgraph = queries.blast_radius(&id, depth).await?;
            print_subgraph(&subgraph, out)
        }
        Commands::Dependencies { id, depth } => {
            let subgraph = queries.dependency_chain(&id, depth).await?;
            print_subgraph(&subgraph, out)
        }
        Commands::Timeline { id, limit } => cmd_timeline(&queries, &id, limit, out).await,
        Commands::CrossCloud => cmd_cross_cloud(&queries, out).await,
        Commands::History { provider, limit } => {
            let provider = provider.as_deref().map(parse_provider).transpose()?;
            cmd_history(storage.as_ref(), provider, limit, out).await
        }
        Commands::Config { .. } => Ok(()),
    };

    db.close().await;
    result
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_subgraph(subgraph: &Subgraph, out: Output) -> anyhow::Result<()> {
    if out.json() {
        return print_json(subgraph);
    }

    let mut nodes: Vec<_> = subgraph
        .nodes
        .iter()
        .map(|n| (subgraph.depths.get(&n.id).copied().unwrap_or(0), n))
        .collect();
    nodes.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

    if !out.quiet {
        println!(
            "{} nodes, {} edges from {}",
            subgraph.nodes.len(),
            subgraph.edges.len(),
            subgraph.root_id
        );
    }
    for (depth, node) in nodes {
        println!("  [{}] {} ({}, {})", depth, node.id, node.resource_type, node.status);
    }
    if !out.quiet && !subgraph.edges.is_empty() {
        println!("Edges:");
    }
    for edge in &subgraph.edges {
        println!(
            "  {} -[{} {:.2} {}]-> {}",
            edge.source_node_id,
            edge.relationship_type,
            edge.confidence,
            edge.discovered_via,
            edge.target_node_id
        );
    }
    if subgraph.truncated {
        println!("(truncated at the traversal node limit)");
    }
    Ok(())
}

fn print_record(record: &SyncRecord) {
    println!(
        "{}: {} ({} nodes, {} created, {} updated, {} disappeared, {} edges created){}",
        record.provider,
        record.status,
        record.nodes_discovered,
        record.nodes_created,
        record.nodes_updated,
        record.nodes_disappeared,
        record.edges_created,
        record
            .duration_ms
            .map(|ms| format!(" in {}ms", ms))
            .unwrap_or_default()
    );
    for error in &record.errors {
        println!("  error: {}", error);
    }
}

// ============================================================================
// Argument parsing
// ============================================================================

fn parse_provider(raw: &str) -> anyhow::Result<CloudProvider> {
    CloudProvider::parse(raw).ok_or_else(|| {
        anyhow!(
            "Unknown provider '{}'. Use aws, azure, gcp, kubernetes or custom.",
            raw
        )
    })
}

fn parse_all<T>(raw: &[String], what: &str, parse: impl Fn(&str) -> Option<T>) -> anyhow::Result<Vec<T>> {
    raw.iter()
        .map(|s| parse(s).ok_or_else(|| anyhow!("Unknown {} '{}'", what, s)))
        .collect()
}

fn discovery_options(
    resource_types: &[String],
    regions: &[String],
    tags: &[String],
) -> anyhow::Result<DiscoveryOptions> {
    let mut options = DiscoveryOptions::new();
    for resource_type in parse_all(resource_types, "resource type", ResourceType::parse)? {
        options = options.with_resource_type(resource_type);
    }
    for region in regions {
        options = options.with_region(region.as_str());
    }
    for tag in tags {
        let (key, value) = tag
            .split_once('=')
            .ok_or_else(|| anyhow!("Tag filter '{}' must look like KEY=VALUE", tag))?;
        options = options.with_tag(key, value);
    }
    Ok(options)
}

fn load_snapshot(provider: CloudProvider, path: &Path) -> anyhow::Result<Arc<dyn DiscoveryAdapter>> {
    let adapter = SnapshotAdapter::from_file(provider, path)
        .with_context(|| format!("Failed to load {} snapshot: {}", provider, path.display()))?;
    Ok(Arc::new(adapter))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_sync(
    storage: Arc<dyn GraphStorage>,
    config: &Config,
    providers: &[String],
    snapshots: &[PathBuf],
    options: &DiscoveryOptions,
    out: Output,
) -> anyhow::Result<()> {
    if providers.len() != snapshots.len() {
        bail!(
            "Got {} --provider and {} --snapshot arguments; pass one snapshot per provider.",
            providers.len(),
            snapshots.len()
        );
    }

    let mut seen = BTreeSet::new();
    let mut adapters = Vec::with_capacity(providers.len());
    for (raw, path) in providers.iter().zip(snapshots) {
        let provider = parse_provider(raw)?;
        if !seen.insert(provider) {
            bail!("Provider '{}' was given more than once.", provider);
        }
        let adapter = load_snapshot(provider, path)?;
        adapters.push(adapter);
    }

    let orchestrator = SyncOrchestrator::new(storage, config.inference.clone(), config.sync.clone());
    let records = match adapters.as_slice() {
        [single] => {
            let record = orchestrator.sync_provider(single.as_ref(), options).await?;
            vec![record]
        }
        many => {
            let report = orchestrator.sync_wave(many, options).await?;
            info!(
                inferred = report.inference.inferred,
                created = report.inference.created,
                "Cross-cloud inference finished"
            );
            if out.json() {
                print_json(&report)?;
            }
            report.records
        }
    };

    if out.json() && records.len() == 1 {
        print_json(&records[0])?;
    } else if !out.json() {
        for record in &records {
            print_record(record);
        }
    }

    let failed: Vec<String> = records
        .iter()
        .filter(|r| r.status == SyncStatus::Failed)
        .map(|r| r.provider.to_string())
        .collect();
    if !failed.is_empty() {
        bail!("Sync failed for {}", failed.join(", "));
    }
    Ok(())
}

async fn cmd_stats(storage: &dyn GraphStorage, out: Output) -> anyhow::Result<()> {
    let stats = storage.get_stats().await?;
    if out.json() {
        return print_json(&stats);
    }

    println!("Nodes:   {}", stats.total_nodes);
    println!("Edges:   {}", stats.total_edges);
    println!("Changes: {}", stats.total_changes);
    println!("Groups:  {}", stats.total_groups);
    println!("Monthly cost: {:.2}", stats.total_cost_monthly);
    match stats.last_sync_at {
        Some(at) => println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Last sync: never"),
    }
    if out.quiet {
        return Ok(());
    }

    if !stats.nodes_by_provider.is_empty() {
        println!("\nBy provider:");
        for (provider, count) in &stats.nodes_by_provider {
            println!("  {:<12} {}", provider.as_str(), count);
        }
    }
    if !stats.nodes_by_resource_type.is_empty() {
        println!("\nBy resource type:");
        for (resource_type, count) in &stats.nodes_by_resource_type {
            println!("  {:<16} {}", resource_type.as_str(), count);
        }
    }
    if !stats.edges_by_relationship_type.is_empty() {
        println!("\nBy relationship:");
        for (relationship, count) in &stats.edges_by_relationship_type {
            println!("  {:<18} {}", relationship.as_str(), count);
        }
    }
    Ok(())
}

async fn cmd_timeline(
    queries: &GraphQueryService,
    id: &str,
    limit: Option<usize>,
    out: Output,
) -> anyhow::Result<()> {
    let changes = queries.node_timeline(id, limit).await?;
    if out.json() {
        return print_json(&changes);
    }

    if changes.is_empty() {
        if !out.quiet {
            println!("No changes recorded for {}", id);
        }
        return Ok(());
    }
    for change in changes {
        let detail = match (&change.field, &change.previous_value, &change.new_value) {
            (Some(field), previous, new) => format!(
                " {}: {} -> {}",
                field,
                previous.as_deref().unwrap_or("null"),
                new.as_deref().unwrap_or("null")
            ),
            _ => String::new(),
        };
        println!(
            "{} {} via {}{}",
            change.detected_at.format("%Y-%m-%d %H:%M:%S"),
            change.change_type,
            change.detected_via,
            detail
        );
    }
    Ok(())
}

async fn cmd_cross_cloud(queries: &GraphQueryService, out: Output) -> anyhow::Result<()> {
    let summary = queries.cross_cloud_summary().await?;
    if out.json() {
        return print_json(&summary);
    }

    println!("Cross-cloud edges: {}", summary.total_edges);
    if let Some(average) = summary.average_confidence {
        println!("Average confidence: {:.2}", average);
    }
    if out.quiet || summary.total_edges == 0 {
        return Ok(());
    }
    println!("\nBy relationship:");
    for (relationship, count) in &summary.by_relationship_type {
        println!("  {:<18} {}", relationship.as_str(), count);
    }
    println!("\nBy provider pair:");
    for ((a, b), count) in &summary.by_provider_pair {
        println!("  {} <-> {}  {}", a, b, count);
    }
    Ok(())
}

async fn cmd_history(
    storage: &dyn GraphStorage,
    provider: Option<CloudProvider>,
    limit: usize,
    out: Output,
) -> anyhow::Result<()> {
    let records = storage.list_sync_records(provider, limit).await?;
    if out.json() {
        return print_json(&records);
    }

    if records.is_empty() {
        if !out.quiet {
            println!("No syncs recorded yet.");
            println!("\nRun one with: infragraph sync --provider <provider> --snapshot <file>");
        }
        return Ok(());
    }
    for record in &records {
        print!("{} ", record.started_at.format("%Y-%m-%d %H:%M:%S"));
        print_record(record);
    }
    Ok(())
}

fn cmd_config(
    action: &ConfigAction,
    config: &Config,
    explicit_path: Option<&Path>,
    out: Output,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            if out.json() {
                print_json(config)?;
            } else {
                print!("{}", toml::to_string_pretty(config).context("Failed to render config")?);
            }
        }
        ConfigAction::Path => {
            let path = match explicit_path {
                Some(path) => path.to_path_buf(),
                None => Config::config_path()?,
            };
            println!("{}", path.display());
        }
        ConfigAction::Reset => {
            match explicit_path {
                Some(path) if path.exists() => std::fs::remove_file(path)
                    .with_context(|| format!("Failed to remove config file: {}", path.display()))?,
                Some(_) => {}
                None => Config::reset()?,
            }
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod main_tests;
