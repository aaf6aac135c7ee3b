//! Price resolution hierarchy.
//!
//! One resale estimate per identity, from the most trusted source available:
//! learned market → web search → soft market → discounted AI estimate →
//! query baseline. Each tier is attempted only if the previous is
//! unavailable; metered tiers re-enter the budget governor and a denial
//! falls through to the next (cheaper) tier instead of aborting. The
//! soft-market figure additionally acts as a cap on whatever tier won —
//! applied after evaluation, downgrade-only.

pub mod estimate;
pub mod learned;
pub mod soft_market;
pub mod web;

use std::sync::Arc;

use tracing::debug;

use bidscout_common::{BidscoutError, Listing, PriceQuote, PriceSource, SearchIdentity};

use crate::context::RunContext;
use crate::traits::{MarketStore, PriceEstimator, PriceSearcher};

/// Per-identity pricing inputs gathered by the run engine.
pub struct PriceContext<'a> {
    /// Other concurrently-scraped listings sharing this identity.
    pub peers: Vec<&'a Listing>,
    /// Category floor from the search query, if the query knows one.
    pub query_baseline: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPrice {
    pub quote: PriceQuote,
    /// Soft-market cap to apply after evaluation. Never raises anything.
    pub soft_cap: Option<f64>,
}

pub struct PriceResolver {
    store: Arc<dyn MarketStore>,
    searcher: Arc<dyn PriceSearcher>,
    estimator: Arc<dyn PriceEstimator>,
}

impl PriceResolver {
    pub fn new(
        store: Arc<dyn MarketStore>,
        searcher: Arc<dyn PriceSearcher>,
        estimator: Arc<dyn PriceEstimator>,
    ) -> Self {
        Self {
            store,
            searcher,
            estimator,
        }
    }

    pub async fn resolve(
        &self,
        identity: &SearchIdentity,
        price_ctx: &PriceContext<'_>,
        ctx: &RunContext,
    ) -> Result<ResolvedPrice, BidscoutError> {
        // Computed up front: it is both tier 3 and the cap on tiers above it.
        let soft = soft_market::aggregate(&price_ctx.peers, &ctx.config).ok();
        let soft_cap = soft.as_ref().map(|q| q.value);
        let mut budget_denied = false;

        // 1. Learned market — observed sale outcomes, ground truth when sampled.
        if let Some(quote) = learned::lookup(self.store.as_ref(), identity, &ctx.config).await {
            return Ok(ResolvedPrice { quote, soft_cap });
        }

        // 2. Web search — current retail, reduced to a median.
        match web::lookup(self.searcher.as_ref(), identity, ctx).await {
            Ok(quote) => return Ok(ResolvedPrice { quote, soft_cap }),
            Err(BidscoutError::BudgetExceeded { .. }) => budget_denied = true,
            Err(e) => debug!(identity = %identity, error = %e, "Web tier unavailable"),
        }

        // 3. Soft market as the estimate itself — no cap against itself.
        if let Some(quote) = soft {
            return Ok(ResolvedPrice {
                quote,
                soft_cap: None,
            });
        }

        // 4. Discounted AI estimate.
        match estimate::lookup(self.estimator.as_ref(), identity, ctx).await {
            Ok(quote) => return Ok(ResolvedPrice { quote, soft_cap }),
            Err(BidscoutError::BudgetExceeded { .. }) => budget_denied = true,
            Err(e) => debug!(identity = %identity, error = %e, "Estimate tier unavailable"),
        }

        // 5. Query baseline — last-resort category floor.
        if let Some(baseline) = price_ctx.query_baseline {
            return Ok(ResolvedPrice {
                quote: PriceQuote {
                    value: baseline,
                    currency: ctx.config.currency.clone(),
                    source: PriceSource::QueryBaseline,
                    sample_size: 0,
                    confidence: 0.1,
                    evidence: vec![format!("category baseline {baseline:.2}")],
                    new_price_reference: None,
                },
                soft_cap,
            });
        }

        if budget_denied {
            return Err(BidscoutError::BudgetExceeded {
                requested_cents: 0,
                remaining_cents: ctx.governor.remaining_cents(),
            });
        }
        Err(BidscoutError::InsufficientEvidence(format!(
            "no pricing tier available for {identity}"
        )))
    }
}

/// Median of an unsorted, non-empty slice.
pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even_counts() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[7.0]), 7.0);
    }
}
