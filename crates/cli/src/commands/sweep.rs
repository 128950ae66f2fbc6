//! `claimcache sweep`: purge expired claims and cache entries.

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine().await?;
    let report = engine.sweep().await?;

    println!("🧹 Sweep complete");
    println!("  Expired claims:   {}", report.expired_claims);
    println!("  Archived claims:  {}", report.archived_claims);
    println!("  Cache entries:    {}", report.cache_entries);

    Ok(())
}
