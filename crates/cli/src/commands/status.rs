//! `claimcache status`: show store and cache status.

use claimcache_config::EngineConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine().await?;
    let config = engine.config();
    let status = engine.status().await?;

    println!("🧠 Claimcache Status");
    println!("====================");
    println!("  Config dir:     {}", EngineConfig::config_dir().display());
    println!("  Data dir:       {}", config.data_dir().display());
    println!("  Claim store:    {} ({} claims)", status.store_backend, status.claims);
    println!("  Claim limit:    {}", config.capsule.capsule_claim_limit);
    println!("  Working memory: {} max", config.capsule.max_working_memory);
    println!("  Prune mode:     {:?}", config.capsule.prune_mode);
    println!(
        "  Tool cache:     {}",
        if status.tool_cache_enabled {
            format!("enabled (layer {})", config.tool_cache.layer)
        } else {
            "disabled".to_string()
        }
    );
    println!("  Embeddings:     {}", config.embedding.provider);

    println!("\n  Layers (cascade order):");
    for layer in &status.cache.layers {
        println!(
            "    {:<12} {:>6} entries  hit rate {:.0}%",
            layer.layer,
            layer.entry_count,
            layer.hit_rate * 100.0
        );
    }

    let config_path = EngineConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, run `claimcache init` first");
    }

    Ok(())
}
