//! `claimcache cache`: cache layer management.

pub async fn stats() -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine().await?;
    let stats = engine.registry().stats().await;

    println!("📦 Cache Statistics");
    println!("===================");
    for layer in &stats.layers {
        println!("  {}", layer.layer);
        println!("    Entries:    {}", layer.entry_count);
        println!("    Size:       {:.1} KB", layer.size_bytes as f64 / 1024.0);
        println!("    Hits:       {} / misses {}", layer.hits, layer.misses);
        println!("    Evictions:  {}", layer.evictions);
    }
    println!(
        "\n  Cascade: {} lookups, {} hits ({:.0}%)",
        stats.cascade_lookups,
        stats.cascade_hits,
        stats.cascade_hit_rate * 100.0
    );
    for (layer, hits) in &stats.hits_by_layer {
        println!("    {layer}: {hits}");
    }

    Ok(())
}

pub async fn invalidate(pattern: &str, layers: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine().await?;
    let names: Vec<&str> = layers.iter().map(String::as_str).collect();
    let scope = if names.is_empty() { None } else { Some(names.as_slice()) };

    let removed = engine.registry().invalidate(pattern, scope).await?;
    println!("🗑️  Removed {removed} entries matching \"{pattern}\"");

    Ok(())
}

pub async fn forget(tool: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine().await?;
    let Some(cache) = engine.tool_cache() else {
        println!("⚠️  Tool cache is disabled in config");
        return Ok(());
    };

    let removed = cache.invalidate_tool(tool).await?;
    println!("🗑️  Forgot {removed} cached outputs of {tool}");

    Ok(())
}
