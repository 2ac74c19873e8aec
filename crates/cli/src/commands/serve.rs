//! `switchboard serve` - Start the HTTP API server.

use switchboard_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        tracing::debug!(port, "Port overridden from the command line");
        config.gateway.port = port;
    }

    println!("📡 Switchboard Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Database:  {}", config.ledger.resolved_database_path().display());
    println!(
        "   Web search: {}",
        if config.search.api_key.is_some() { "enabled" } else { "disabled" }
    );

    switchboard_gateway::start(config).await?;

    Ok(())
}
