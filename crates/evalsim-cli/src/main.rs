//! `evalsim` — a thin controller binary: load a scenario descriptor,
//! run it to completion, print the event log and final state.
//!
//! Grounded on `mofa-cli`'s entrypoint shape (`clap::Parser`, a
//! verbosity-gated `tracing_subscriber::fmt().with_env_filter(...)`, and
//! `tokio::runtime::Runtime::new()?.block_on(...)` bridging a sync
//! `main` into the async engine) without carrying over any of its TUI,
//! packaging, or database tooling — none of that is in scope here.

mod descriptor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use descriptor::ScenarioDescriptor;
use evalsim_runtime::Environment;

#[derive(Parser)]
#[command(name = "evalsim", about = "Run deterministic agent-evaluation scenarios")]
struct Cli {
    /// Emit debug-level logs instead of info-level.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario descriptor to completion and print the results.
    Run {
        /// Path to a YAML/JSON/TOML scenario descriptor.
        scenario: PathBuf,
    },
    /// Parse and validate a scenario descriptor without running it.
    Check {
        scenario: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Check { scenario } => {
            let descriptor = ScenarioDescriptor::load(&scenario)?;
            descriptor.build_scenario()?;
            println!("scenario descriptor is valid: {} event(s)", descriptor.events.len());
            Ok(())
        }
        Commands::Run { scenario } => run_scenario(&scenario).await,
    }
}

async fn run_scenario(path: &std::path::Path) -> anyhow::Result<()> {
    let descriptor = ScenarioDescriptor::load(path)?;
    let config = descriptor.environment_config();
    let policy = descriptor.notification_policy();
    let scenario = descriptor.build_scenario()?;

    let env = Environment::new(config, policy)?;
    let final_state = env.run(scenario, true, true).await?;

    tracing::info!(?final_state, "scenario finished");

    let log = env.event_log_json().await?;
    println!("{}", serde_json::to_string_pretty(&log)?);

    if let Some(reason) = env.failure_reason().await {
        eprintln!("validation failed: {reason:?}");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn run_scenario_executes_a_minimal_descriptor() {
        let yaml = r#"
environment:
  duration: 5.0
  oracle_mode: true
  queue_based_loop: true
apps:
  - aui
events:
  - id: e1
    app: AUI
    tool: send_message_to_agent
    event_type: User
    time: 1.0
    args:
      content: "hello agent"
"#;
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        run_scenario(file.path()).await.unwrap();
    }
}
