use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use raftsim::repl::Repl;
use raftsim::{ClusterRuntime, ClusterSimulator, SimulationConfig};

#[derive(Parser)]
#[command(name = "raftsim")]
#[command(about = "A simulated Raft leader-election cluster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ClusterArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Number of nodes (overrides the configuration file)
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Seed for reproducible runs
    #[arg(short, long)]
    seed: Option<u64>,
}

impl ClusterArgs {
    fn load(&self) -> anyhow::Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_json_file(path)
                .with_context(|| format!("loading configuration from {path}"))?,
            None => SimulationConfig::default(),
        };
        if let Some(nodes) = self.nodes {
            config.node_count = nodes;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Step a deterministic cluster by hand
    Repl {
        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Run a cluster on the wall clock and print its events as JSON lines
    Live {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// How long to run before shutting down
        #[arg(short, long, default_value_t = 5)]
        duration_secs: u64,

        /// Milliseconds between simulation steps
        #[arg(long, default_value_t = 10)]
        tick_ms: u64,
    },
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Repl { cluster } => {
            let config = cluster.load()?;
            let sim = ClusterSimulator::new(config)?;
            let mut repl =
                Repl::new(sim).map_err(|e| anyhow::anyhow!("failed to create line editor: {e}"))?;
            repl.run();
        }
        Command::Live {
            cluster,
            duration_secs,
            tick_ms,
        } => {
            let config = cluster.load()?;
            info!("Starting live cluster of {} nodes for {duration_secs}s", config.node_count);

            let handle = ClusterRuntime::start(config, Duration::from_millis(tick_ms.max(1)))?;
            let mut events = handle.subscribe();
            let deadline = tokio::time::sleep(Duration::from_secs(duration_secs));
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    event = events.recv() => match event {
                        Some(event) => println!("{}", serde_json::to_string(&event)?),
                        None => break,
                    }
                }
            }

            let snapshot = handle.snapshot().await;
            handle.shutdown().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if events.missed() > 0 {
                info!("{} events were dropped by the bounded buffer", events.missed());
            }
        }
    }

    Ok(())
}
