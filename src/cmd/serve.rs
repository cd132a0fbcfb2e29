//! HTTP service command: `verifier serve`.

use anyhow::Result;
use verifier::config::VerifierConfig;

pub async fn cmd_serve(config: &VerifierConfig) -> Result<()> {
    for warning in config.validate() {
        println!("{} {}", console::style("Warning:").yellow().bold(), warning);
    }
    println!(
        "Sandbox mode: {}  |  max budget: {}",
        console::style(config.sandbox_mode()).cyan(),
        config.max_budget()
    );
    verifier::server::start_server(config).await
}
