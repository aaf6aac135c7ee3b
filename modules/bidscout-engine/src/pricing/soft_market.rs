//! Soft-market tier: bid-weighted aggregation over peer listings that share
//! the same identity within the current run.
//!
//! Bid activity is the trust signal. Listings with real bidding wars get a
//! discount factor close to 1.0 and dominate the weighted average; low-bid
//! listings are discounted harder. Zero- and single-bid listings are asking
//! prices, not market evidence — they don't qualify at all. The result is
//! only ever a cap on higher-trust estimates, never a reason to raise one.

use bidscout_common::{BidscoutError, Listing, PriceQuote, PriceSource, RunConfig};

pub fn aggregate(peers: &[&Listing], config: &RunConfig) -> Result<PriceQuote, BidscoutError> {
    let qualifying: Vec<&&Listing> = peers
        .iter()
        .filter(|l| l.bid_count >= config.soft_qualifying_bids)
        .collect();

    if qualifying.len() < config.soft_min_qualifying {
        return Err(BidscoutError::InsufficientEvidence(format!(
            "{} qualifying peer listings, need {}",
            qualifying.len(),
            config.soft_min_qualifying
        )));
    }

    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for listing in &qualifying {
        let factor = if listing.bid_count >= config.soft_high_bid_threshold {
            config.soft_high_bid_factor
        } else {
            config.soft_low_bid_factor
        };
        let weight = f64::from(listing.bid_count);
        weighted_sum += listing.price * factor * weight;
        weight_sum += weight;
    }
    let value = weighted_sum / weight_sum;

    let evidence = qualifying
        .iter()
        .map(|l| format!("peer {} at {:.2} with {} bids", l.id, l.price, l.bid_count))
        .collect();

    Ok(PriceQuote {
        value,
        currency: config.currency.clone(),
        source: PriceSource::SoftMarket,
        sample_size: qualifying.len() as u32,
        confidence: (0.4 + 0.05 * qualifying.len() as f32).min(0.65),
        evidence,
        new_price_reference: None,
    })
}
