//! CLI entry point for the netsync-discover daemon.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use netsync_core::{CanonicalStore, MemoryStore};
use netsync_graph::{GraphClient, GraphConfig};

use netsync_discover::config::{load_settings, DiscoverConfig};
use netsync_discover::inventory::HttpInventory;
use netsync_discover::notify::TracingNotifier;
use netsync_discover::reconcile::{Pass, ReconciliationEngine};
use netsync_discover::scheduler::{run_single_cycle, SyncScheduler};
use netsync_discover::snmp_client::AsyncSnmpConnector;

#[derive(Parser)]
#[command(name = "netsync-discover")]
#[command(about = "SNMP topology and VLAN reconciliation for the netsync inventory")]
struct Cli {
    /// Run a single sync cycle and exit.
    #[arg(long)]
    once: bool,

    /// Run as daemon with scheduled cycles.
    #[arg(long)]
    daemon: bool,

    /// Passes to run each cycle.
    #[arg(long, value_enum, default_value = "all")]
    pass: Pass,

    /// Keep results in memory instead of writing to Neo4j.
    #[arg(long)]
    dry_run: bool,

    /// Config file prefix (default: netsync).
    #[arg(short, long, default_value = "netsync")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    if !cli.once && !cli.daemon {
        anyhow::bail!("Specify --once (single cycle) or --daemon (scheduled cycles)");
    }

    let settings = load_settings(&cli.config)?;
    let discover_config = DiscoverConfig::from_settings(&settings);

    let store: Arc<dyn CanonicalStore> = if cli.dry_run {
        tracing::info!("Dry run: using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let graph = GraphClient::connect(&graph_config(&settings)).await?;
        graph.ensure_schema().await?;
        tracing::info!("Connected to Neo4j");
        Arc::new(graph)
    };

    let inventory = HttpInventory::new(&discover_config.inventory)?;
    let engine = ReconciliationEngine::new(
        &discover_config,
        Arc::new(inventory),
        store,
        Arc::new(TracingNotifier),
        Arc::new(AsyncSnmpConnector),
    )?;

    if cli.once {
        let report = run_single_cycle(&engine, cli.pass).await;
        if !report.is_success() {
            anyhow::bail!("One or more passes failed");
        }
    } else {
        let scheduler =
            SyncScheduler::new(Arc::new(engine), discover_config.sync_interval_secs, cli.pass);
        scheduler.run().await?;
    }

    Ok(())
}

fn graph_config(settings: &config::Config) -> GraphConfig {
    settings.get::<GraphConfig>("neo4j").unwrap_or_else(|e| {
        tracing::warn!(error = %e, "No usable [neo4j] section, using defaults");
        GraphConfig::default()
    })
}
