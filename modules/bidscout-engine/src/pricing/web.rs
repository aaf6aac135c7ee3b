//! Web-search tier: metered lookup of current new/retail prices across
//! vendors, reduced to a median. Resale derives from the new-price median
//! via the configured used-market factor; the median itself is kept as the
//! reference the sanity cap compares against. Results are cached per
//! identity with the short web-price TTL.

use serde::{Deserialize, Serialize};
use tracing::info;

use bidscout_common::{BidscoutError, MeteredStep, PriceQuote, PriceSource, SearchIdentity};

use crate::budget::OperationCost;
use crate::cache::CacheDomain;
use crate::context::RunContext;
use crate::pricing::median;
use crate::traits::PriceSearcher;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedWebPrice {
    new_price_median: f64,
    vendor_count: u32,
}

pub async fn lookup(
    searcher: &dyn PriceSearcher,
    identity: &SearchIdentity,
    ctx: &RunContext,
) -> Result<PriceQuote, BidscoutError> {
    if let Some(cached) = ctx
        .cache
        .get::<CachedWebPrice>(CacheDomain::WebPrice, identity.as_str())
    {
        return Ok(quote_from(&cached, ctx));
    }

    let lease = ctx
        .governor
        .reserve(MeteredStep::WebSearch, OperationCost::WEB_SEARCH)?;

    match searcher.vendor_prices(identity).await {
        Ok(metered) => {
            lease.settle(metered.cost_cents);

            let prices: Vec<f64> = metered
                .value
                .iter()
                .map(|v| v.price)
                .filter(|p| p.is_finite() && *p > 0.0)
                .collect();
            if prices.is_empty() {
                return Err(BidscoutError::InsufficientEvidence(format!(
                    "web search returned no vendor prices for {identity}"
                )));
            }

            let cached = CachedWebPrice {
                new_price_median: median(&prices),
                vendor_count: prices.len() as u32,
            };
            info!(
                identity = %identity,
                vendors = cached.vendor_count,
                new_median = cached.new_price_median,
                "Web price resolved"
            );
            ctx.cache
                .put(CacheDomain::WebPrice, identity.as_str(), &cached);

            Ok(quote_from(&cached, ctx))
        }
        Err(e) => {
            // Attempted work is billed whether or not the output was usable.
            let reserved = lease.reserved_cents();
            lease.settle(reserved);
            Err(e)
        }
    }
}

fn quote_from(cached: &CachedWebPrice, ctx: &RunContext) -> PriceQuote {
    let factor = ctx.config.web_used_market_factor;
    PriceQuote {
        value: cached.new_price_median * factor,
        currency: ctx.config.currency.clone(),
        source: PriceSource::WebSearch,
        sample_size: cached.vendor_count,
        confidence: 0.7,
        evidence: vec![
            format!(
                "median of {} vendor prices: {:.2} new",
                cached.vendor_count, cached.new_price_median
            ),
            format!("used-market factor {factor:.2}"),
        ],
        new_price_reference: Some(cached.new_price_median),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSearcher;
    use bidscout_common::RunConfig;

    fn ctx() -> RunContext {
        RunContext::new(RunConfig::default())
    }

    #[tokio::test]
    async fn reduces_vendor_prices_to_median_and_derives_resale() {
        let searcher = MockSearcher::new().with_prices(
            "airpods pro gen2",
            &[("alza", 299.0), ("otto", 279.0), ("amazon", 289.0)],
        );
        let identity = SearchIdentity::derive("AirPods Pro 2nd Gen").unwrap();
        let ctx = ctx();

        let quote = lookup(&searcher, &identity, &ctx).await.unwrap();
        assert_eq!(quote.new_price_reference, Some(289.0));
        assert!((quote.value - 289.0 * 0.60).abs() < 1e-9);
        assert_eq!(quote.sample_size, 3);
    }

    #[tokio::test]
    async fn second_lookup_hits_the_cache() {
        let searcher = MockSearcher::new().with_prices("airpods pro gen2", &[("alza", 299.0)]);
        let identity = SearchIdentity::derive("AirPods Pro 2nd Gen").unwrap();
        let ctx = ctx();

        lookup(&searcher, &identity, &ctx).await.unwrap();
        lookup(&searcher, &identity, &ctx).await.unwrap();
        assert_eq!(searcher.calls(), 1);
    }

    #[tokio::test]
    async fn empty_vendor_list_is_insufficient_evidence_but_still_billed() {
        let searcher = MockSearcher::new().with_prices("airpods pro gen2", &[]);
        let identity = SearchIdentity::derive("AirPods Pro 2nd Gen").unwrap();
        let ctx = ctx();

        let result = lookup(&searcher, &identity, &ctx).await;
        assert!(matches!(
            result,
            Err(BidscoutError::InsufficientEvidence(_))
        ));
        // The attempted call hit the ledger anyway.
        assert_eq!(ctx.governor.ledger().len(), 1);
    }

    #[tokio::test]
    async fn budget_denial_propagates_for_tier_fallthrough() {
        let searcher = MockSearcher::new().with_prices("airpods pro gen2", &[("alza", 299.0)]);
        let identity = SearchIdentity::derive("AirPods Pro 2nd Gen").unwrap();
        let config = RunConfig {
            spend_ceiling_cents: 1, // below the web-search estimate
            ..RunConfig::default()
        };
        let ctx = RunContext::new(config);

        let result = lookup(&searcher, &identity, &ctx).await;
        assert!(matches!(result, Err(BidscoutError::BudgetExceeded { .. })));
        assert_eq!(searcher.calls(), 0);
    }
}
