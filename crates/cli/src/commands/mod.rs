pub mod account;
pub mod models;
pub mod onboard;
pub mod serve;
pub mod usage;

use switchboard_config::AppConfig;
use switchboard_store::SqliteStore;
use tracing::debug;

/// Load the config and open its database, for the offline admin commands.
pub(crate) async fn open_store() -> Result<(AppConfig, SqliteStore), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let path = config.ledger.resolved_database_path();
    let store = SqliteStore::open(&path, config.ledger.initial_grant)
        .await
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    debug!(path = %path.display(), "Opened store");
    Ok((config, store))
}
