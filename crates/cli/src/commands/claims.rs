//! `claimcache claims`: inspect and prune session working memory.

use claimcache_capsule::compile::summary_line;
use claimcache_core::claim::Claim;

pub async fn list(session: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine().await?;
    let mut claims = engine.store().list_active(session).await?;
    claims.sort_by(|a, b| b.metadata.score.total_cmp(&a.metadata.score));

    if json {
        println!("{}", serde_json::to_string_pretty(&claims)?);
        return Ok(());
    }

    if claims.is_empty() {
        println!("   No active claims for session \"{session}\".");
        return Ok(());
    }

    println!("🧾 {} active claims in \"{session}\"", claims.len());
    for (i, claim) in claims.iter().enumerate() {
        print_claim(i + 1, claim);
    }

    Ok(())
}

pub async fn prune(session: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine().await?;
    let outcome = engine.prune(session).await?;
    let stats = &outcome.stats;

    println!("✂️  Pruned \"{session}\"");
    println!("  Expired removed:    {}", stats.expired);
    println!("  Evaluator archived: {}", stats.evaluator_archived);
    println!("  Evaluator deleted:  {}", stats.evaluator_deleted);
    println!("  Over cap:           {}", stats.overflow);
    println!("  Kept:               {}", stats.kept);
    println!("  Working memory:     {} claims", outcome.snapshot.len());

    Ok(())
}

fn print_claim(rank: usize, claim: &Claim) {
    let expires = claim
        .expires_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".into());
    println!(
        "  {rank:>2}. [score: {:.2}] [{}] {}",
        claim.metadata.score,
        claim.confidence.as_str(),
        summary_line(claim)
    );
    println!("      id: {}  expires: {expires}", claim.claim_id);
    if let Some(domain) = &claim.metadata.domain {
        println!("      domain: {domain}");
    }
}
