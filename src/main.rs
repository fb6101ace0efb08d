// ABOUTME: Main entry point: runs one persona's agent process or operator commands
// ABOUTME: Initializes logging, config, persona set, ensemble catalog, and the shared store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use troupe::config::Config;
use troupe::generate::TemplateGenerator;
use troupe::platform::LoggingPlatform;
use troupe::runtime::{run_agent, signal_channel, spawn_ticker, AgentRuntime};
use troupe::metrics;
use troupe_core::{EnsembleCatalog, PersonaSet, StateStore};

#[derive(Parser)]
#[command(name = "troupe", about = "Claim-arbitrated chat persona ensemble")]
struct Cli {
    /// Path to the host configuration file
    #[arg(long, default_value = "config.toml", env = "TROUPE_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host one persona's agent process
    Run {
        /// Persona id to host (one persona per process)
        #[arg(long)]
        persona: String,
    },
    /// Reset an agent's runtime state to its persona defaults
    ResetAgent { id: String },
    /// Print an agent's current runtime state
    ShowAgent { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they take the process down.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(Config::load(&cli.config)?);
    let personas = Arc::new(PersonaSet::load_dir(&config.persona_dir)?);
    let catalog = Arc::new(EnsembleCatalog::load(&config.ensemble_catalog, &personas)?);
    let store = StateStore::open(&config.store_path)?;

    tracing::info!(
        store = %config.store_path,
        personas = personas.len(),
        crossovers = catalog.crossover_events.len(),
        crises = catalog.crisis_events.len(),
        storylines = catalog.storylines.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Run { persona } => run(config, personas, catalog, store, persona).await,
        Command::ResetAgent { id } => {
            let persona = personas.require(&id)?;
            store.reset_agent(persona)?;
            println!("Agent '{}' reset to persona defaults", id);
            Ok(())
        }
        Command::ShowAgent { id } => {
            let state = store
                .load_agent(&id)?
                .with_context(|| format!("No stored state for agent '{}'", id))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
    }
}

async fn run(
    config: Arc<Config>,
    personas: Arc<PersonaSet>,
    catalog: Arc<EnsembleCatalog>,
    store: StateStore,
    persona: String,
) -> Result<()> {
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        // Metrics are best-effort; the ensemble works without them.
        tracing::warn!(error = %e, "Failed to install metrics exporter");
    }
    metrics::describe();

    // Real deployments wire a platform adapter here and feed inbound
    // messages into `tx` as AgentSignal::Stimulus.
    let platform = Arc::new(LoggingPlatform);
    let generator = Arc::new(TemplateGenerator);

    let runtime = AgentRuntime::new(
        config.clone(),
        personas,
        catalog,
        store,
        platform,
        generator,
        &persona,
    )?;

    let (tx, rx) = signal_channel();
    let ticker = spawn_ticker(
        tx,
        std::time::Duration::from_secs(config.tick_interval_secs),
    );

    run_agent(runtime, rx).await;
    ticker.abort();
    Ok(())
}
