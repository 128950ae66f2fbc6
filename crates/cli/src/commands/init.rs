//! `claimcache init`: first-time setup.

use claimcache_config::EngineConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = EngineConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🧠 Claimcache Setup");
    println!("===================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() && !force {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.\n");
        return Ok(());
    }

    std::fs::write(&config_path, EngineConfig::default_toml())?;
    println!("✅ Wrote config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Adjust claim limits and cache layers in {}", config_path.display());
    println!("   2. Run: claimcache compile --session <id> --goal <text> --bundle <file>\n");

    Ok(())
}
