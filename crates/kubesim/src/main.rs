use clap::{Parser, Subcommand};
use kubesim_core::node_allocatable;
use kubesim_sim::{SimulationConfig, Simulator, SimulatorError};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kubesim", about = "Kubernetes scheduling simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation until its workload is done
    Run {
        /// Path to the simulation config file
        #[arg(long, env = "KUBESIM_CONFIG")]
        config: PathBuf,
    },
    /// Load a config file and print what it describes
    Validate {
        /// Path to the simulation config file
        #[arg(long, env = "KUBESIM_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let path = match &cli.command {
        Commands::Run { config } | Commands::Validate { config } => config.clone(),
    };
    let config = SimulationConfig::load(&path)?;

    // Initialize tracing; RUST_LOG wins over the config's log level
    let default_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { .. } => run(&config).await,
        Commands::Validate { .. } => validate(&path, &config),
    }
}

/// Run the simulation, stopping at the next tick on Ctrl-C
async fn run(config: &SimulationConfig) -> miette::Result<()> {
    let mut simulator = Simulator::from_config(config)?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping at the next tick");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    match simulator.run(token).await {
        Ok(summary) => {
            info!(
                "Done: {} ticks, {} submitted, {} rejected, {} bound, {} preempted",
                summary.ticks,
                summary.pods_submitted,
                summary.pods_rejected,
                summary.pods_bound,
                summary.pods_preempted
            );
            Ok(())
        }
        Err(SimulatorError::Cancelled { .. }) => {
            info!("Simulation interrupted at {}", simulator.clock());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Print a summary of a loaded config
fn validate(path: &Path, config: &SimulationConfig) -> miette::Result<()> {
    println!("{}: ok", path.display());
    println!(
        "  tick: {}s, metrics every {} tick(s)",
        config.tick, config.metrics_tick
    );
    println!("  start: {}", config.start());

    println!("  nodes: {}", config.cluster.len());
    for node in &config.cluster {
        let allocatable = node_allocatable(node)?;
        let name = node.metadata.name.as_deref().unwrap_or_default();
        println!("    {} {}", name, allocatable);
    }

    let scheduler = &config.scheduler;
    println!(
        "  scheduler: {:?} queue, preemption {}, {:?} host selection",
        scheduler.queue,
        if scheduler.preemption { "on" } else { "off" },
        scheduler.host_selection
    );
    println!("    predicates: {:?}", scheduler.predicates);
    let priorities: Vec<String> = scheduler
        .priorities
        .iter()
        .map(|p| format!("{:?}x{}", p.name, p.weight))
        .collect();
    println!("    priorities: {}", priorities.join(", "));

    println!("  workload entries: {}", config.workload.len());
    Ok(())
}
