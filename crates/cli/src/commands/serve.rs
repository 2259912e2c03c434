//! `deskmate serve`: start the HTTP API server.

use deskmate_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("Deskmate gateway");
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!("   Model:     {}", config.model);
    println!("   Database:  {}", config.storage.db_path);

    deskmate_gateway::start(config).await?;

    Ok(())
}
