pub mod cache;
pub mod claims;
pub mod compile;
pub mod init;
pub mod status;
pub mod sweep;

use claimcache_capsule::Engine;
use claimcache_config::EngineConfig;

/// Load config from ~/.claimcache and open the engine.
pub(crate) async fn open_engine() -> Result<Engine, Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let engine = Engine::from_config(config)
        .await
        .map_err(|e| format!("Failed to open engine: {e}"))?;
    Ok(engine)
}
