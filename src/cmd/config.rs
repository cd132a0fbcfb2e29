//! Configuration view and validation commands: `verifier config`.

use anyhow::Result;
use verifier::config::{CONFIG_FILE_NAME, VerifierConfig, VerifierToml};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Verifier Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = VerifierConfig::load(Some(config_path.as_path()))?;
            let toml = &config.toml;

            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!("  max_body_bytes = {}", toml.server.max_body_bytes);
            println!();
            println!("[limits]");
            println!("  memory_mb = {}", toml.limits.memory_mb);
            println!("  cpu_cores = {}", toml.limits.cpu_cores);
            println!("  timeout_seconds = {}", toml.limits.timeout_seconds);
            println!("  max_output_bytes = {}", toml.limits.max_output_bytes);
            println!();
            println!("[policy]");
            println!("  max_budget = {}", toml.policy.max_budget);
            println!();
            println!("[sandbox]");
            println!("  mode = \"{}\"", toml.sandbox.mode);
            println!("  shell = \"{}\"", toml.sandbox.shell);
            println!();
            println!("Values include VERIFIER_* environment overrides.");
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
                return Ok(());
            }

            let toml = VerifierToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                std::fs::create_dir_all(parent)?;
            }

            VerifierToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, max_body_bytes");
            println!("  - [limits] default resource limits for requests");
            println!("  - [policy] max_budget");
            println!("  - [sandbox] mode (simulated | process), shell");
            println!();
        }
    }

    Ok(())
}
