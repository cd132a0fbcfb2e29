use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use verifier::config::VerifierConfig;
use verifier::types::Runner;

mod cmd;

#[derive(Parser)]
#[command(name = "verifier")]
#[command(version, about = "Sandbox verification engine for generated code")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to verifier.toml (defaults to ./verifier.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Verify one execution request read from a JSON file
    Verify {
        /// Path to the request JSON
        request: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Build a request from a directory and verify it
    Scan {
        /// Directory holding the artifacts
        dir: PathBuf,
        /// Runner: python, node, typescript
        #[arg(short, long, value_parser = parse_runner)]
        runner: Runner,
        #[arg(long, default_value = "local")]
        task_id: String,
        #[arg(long, default_value = "scan")]
        subtask_id: String,
        /// Test command recorded in the request (defaults per runner)
        #[arg(long)]
        test_command: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args, Clone, Copy)]
pub struct RunArgs {
    /// Repair iterations already spent on this task
    #[arg(long, default_value = "0")]
    pub iteration: u32,
    /// Iteration budget (defaults to [policy] max_budget)
    #[arg(long)]
    pub budget: Option<u32>,
    /// Print the phase-keyed verification report instead of the execution report
    #[arg(long)]
    pub full: bool,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default verifier.toml file
    Init,
}

fn parse_runner(s: &str) -> Result<Runner, String> {
    s.to_ascii_lowercase().parse()
}

fn init_tracing(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    let log_json = std::env::var("VERIFIER_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false);

    // stdout carries command output; logs go to stderr.
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(cli.verbose, default_level);

    match &cli.command {
        Commands::Serve { host, port } => {
            let config = VerifierConfig::load(cli.config.as_deref())?.with_cli_args(
                host.clone(),
                *port,
                cli.verbose,
            );
            cmd::cmd_serve(&config).await?;
        }
        Commands::Verify { request, run } => {
            let config = load_config(&cli)?;
            cmd::cmd_verify(&config, request, *run).await?;
        }
        Commands::Scan {
            dir,
            runner,
            task_id,
            subtask_id,
            test_command,
            run,
        } => {
            let config = load_config(&cli)?;
            let target = cmd::ScanTarget {
                dir,
                runner: *runner,
                task_id,
                subtask_id,
                test_command: test_command.as_deref(),
            };
            cmd::cmd_scan(&config, target, *run).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<VerifierConfig> {
    Ok(VerifierConfig::load(cli.config.as_deref())?.with_cli_args(None, None, cli.verbose))
}
