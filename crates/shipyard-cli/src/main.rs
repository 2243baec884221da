//! Shipyard CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Declarative stack builder with blue/green releases", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a stack configuration
    Validate {
        /// Path to the configuration file
        #[arg(env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
        path: String,
    },
    /// Render the resource graph as JSON
    Synth {
        /// Path to the configuration file
        #[arg(env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
        path: String,
        /// Write the document to a file instead of stdout
        #[arg(long)]
        out: Option<String>,
    },
    /// Show the provisioning order and deferred patches
    Plan {
        /// Path to the configuration file
        #[arg(env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
        path: String,
    },
    /// Apply the graph with the simulated provisioner
    Apply {
        /// Path to the configuration file
        #[arg(env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
        path: String,
        /// Make provisioning of this node fail
        #[arg(long)]
        fail_on: Option<String>,
    },
    /// Simulate one blue/green release attempt
    Release {
        /// Path to the configuration file
        #[arg(env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
        path: String,
        /// Fail the deployment in this phase
        #[arg(long, value_enum)]
        fail_in: Option<FailurePhase>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FailurePhase {
    Deploying,
    TrafficShifted,
    Terminating,
}

impl From<FailurePhase> for commands::release::FailAt {
    fn from(phase: FailurePhase) -> Self {
        match phase {
            FailurePhase::Deploying => commands::release::FailAt::Deploying,
            FailurePhase::TrafficShifted => commands::release::FailAt::TrafficShifted,
            FailurePhase::Terminating => commands::release::FailAt::Terminating,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Synth { path, out } => {
            commands::synth::synth(&path, out.as_deref())?;
        }
        Commands::Plan { path } => {
            commands::plan::plan(&path)?;
        }
        Commands::Apply { path, fail_on } => {
            commands::apply::apply(&path, fail_on).await?;
        }
        Commands::Release { path, fail_in } => {
            commands::release::release(&path, fail_in.map(Into::into)).await?;
        }
    }

    Ok(())
}
