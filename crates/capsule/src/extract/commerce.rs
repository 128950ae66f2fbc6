//! Commerce offers: one candidate per offer, skip-listed by keyword.

use claimcache_core::bundle::{RawOutput, ToolKind};
use claimcache_core::candidate::Candidate;
use claimcache_core::claim::Confidence;
use serde_json::Value;
use tracing::debug;

use super::{COMMERCE_LIMIT, diagnostics, generic, items_of, query_of, str_field};

/// Title words that mark merchandise rather than the product searched for.
const SKIP_WORDS: &[&str] = &[
    "book", "paperback", "hardcover", "poster", "toy", "sticker", "decal", "shirt", "mug",
    "keychain", "figurine", "costume", "plush",
];

pub(crate) fn extract(output: &RawOutput) -> Vec<Candidate> {
    let Some(offers) = items_of(output, &["offers", "results", "products"]) else {
        if output.summary.trim().is_empty() {
            return vec![diagnostics::zero_results(output, ToolKind::Commerce, vec![])];
        }
        return generic::extract(output)
            .into_iter()
            .map(|c| c.with_domain("pricing").with_topic("commerce"))
            .collect();
    };

    let query = query_of(output);
    let query_words = query.as_deref().map(words).unwrap_or_default();

    let mut candidates = Vec::new();
    let mut skipped = 0usize;
    for offer in offers.iter().take(COMMERCE_LIMIT) {
        let Some(title) = str_field(offer, "title").or_else(|| str_field(offer, "name")) else {
            debug!(tool = %output.tool_name, "Skipping malformed offer");
            continue;
        };
        if is_merchandise(title, &query_words) {
            debug!(tool = %output.tool_name, title, "Skipping merchandise offer");
            skipped += 1;
            continue;
        }
        candidates.push(offer_candidate(output, offer, title, query.as_deref()));
    }

    if candidates.is_empty() {
        let extra = if skipped > 0 {
            vec![format!("{skipped} offers filtered as merchandise")]
        } else {
            vec![]
        };
        return vec![diagnostics::zero_results(output, ToolKind::Commerce, extra)];
    }
    candidates
}

fn offer_candidate(output: &RawOutput, offer: &Value, title: &str, query: Option<&str>) -> Candidate {
    let vendor = ["vendor", "source", "merchant", "seller"]
        .iter()
        .find_map(|k| str_field(offer, k));
    let currency = str_field(offer, "currency");
    let price = offer.get("price").and_then(|p| format_price(p, currency));
    let availability = str_field(offer, "availability");
    let url = str_field(offer, "url").or_else(|| str_field(offer, "link"));

    let mut text = title.to_string();
    if let Some(price) = &price {
        text.push_str(": ");
        text.push_str(price);
    }
    if let Some(vendor) = vendor {
        text.push_str(" at ");
        text.push_str(vendor);
    }
    if let Some(availability) = availability {
        text.push_str(&format!(" ({availability})"));
    }

    let verified = offer.get("verified").and_then(Value::as_bool).unwrap_or(false);
    let confidence = if verified {
        Confidence::Verified
    } else if price.is_some() && url.is_some() {
        Confidence::High
    } else {
        Confidence::Medium
    };

    let mut candidate = Candidate::new(text, &output.tool_name)
        .with_evidence(&output.handle)
        .with_confidence(confidence)
        .with_domain("pricing")
        .with_topic("commerce")
        .with_artifact(output.blob.clone())
        .with_meta("title", title);
    if let Some(price) = price {
        candidate = candidate.with_meta("price", price);
    }
    for (key, value) in [
        ("vendor", vendor),
        ("currency", currency),
        ("availability", availability),
        ("url", url),
        ("query", query),
    ] {
        if let Some(value) = value {
            candidate = candidate.with_meta(key, value);
        }
    }
    candidate
}

/// Render a price value with its currency, e.g. `$39.99` or `CHF 12.00`.
fn format_price(price: &Value, currency: Option<&str>) -> Option<String> {
    let amount = match price {
        Value::Number(n) => format!("{:.2}", n.as_f64()?),
        Value::String(s) if !s.trim().is_empty() => return Some(s.trim().to_string()),
        _ => return None,
    };
    Some(match currency.map(str::to_ascii_uppercase).as_deref() {
        Some("USD") | None => format!("${amount}"),
        Some("EUR") => format!("€{amount}"),
        Some("GBP") => format!("£{amount}"),
        Some(code) => format!("{code} {amount}"),
    })
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether a title names skip-listed merchandise the query did not ask for.
fn is_merchandise(title: &str, query_words: &[String]) -> bool {
    words(title).iter().any(|w| {
        let singular = w.strip_suffix('s').unwrap_or(w.as_str());
        SKIP_WORDS.contains(&singular)
            && !query_words
                .iter()
                .any(|q| q.strip_suffix('s').unwrap_or(q.as_str()) == singular)
    })
}
