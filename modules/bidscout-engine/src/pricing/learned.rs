//! Learned-market tier: robust central tendency over prior observed sale
//! outcomes, read from the store. Trusted as ground truth once the sample
//! count clears the configured minimum; below that it falls through rather
//! than pricing off anecdotes.

use tracing::{debug, warn};

use bidscout_common::{PriceQuote, PriceSource, RunConfig, SearchIdentity};

use crate::traits::MarketStore;

pub async fn lookup(
    store: &dyn MarketStore,
    identity: &SearchIdentity,
    config: &RunConfig,
) -> Option<PriceQuote> {
    let learned = match store.learned_market(identity).await {
        Ok(learned) => learned?,
        Err(e) => {
            // A store hiccup must not abort pricing — lower tiers still work.
            warn!(identity = %identity, error = %e, "Learned-market read failed");
            return None;
        }
    };

    if learned.sample_size < config.learned_min_samples {
        debug!(
            identity = %identity,
            sample_size = learned.sample_size,
            min = config.learned_min_samples,
            "Learned market below minimum sample size"
        );
        return None;
    }

    Some(PriceQuote {
        value: learned.median_price,
        currency: config.currency.clone(),
        source: PriceSource::LearnedMarket,
        sample_size: learned.sample_size,
        confidence: 0.9,
        evidence: vec![format!(
            "median of {} observed sales: {:.2} (as of {})",
            learned.sample_size,
            learned.median_price,
            learned.updated_at.format("%Y-%m-%d")
        )],
        new_price_reference: learned.new_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockMarketStore;
    use bidscout_common::LearnedMarket;
    use chrono::Utc;

    fn learned_market(samples: u32) -> LearnedMarket {
        LearnedMarket {
            identity: "airpods pro gen2".to_string(),
            median_price: 180.0,
            sample_size: samples,
            new_price: Some(279.0),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trusted_at_minimum_sample_size() {
        let store = MockMarketStore::new().with_learned(learned_market(3));
        let identity = SearchIdentity::derive("AirPods Pro 2nd Gen").unwrap();

        let quote = lookup(&store, &identity, &RunConfig::default()).await.unwrap();
        assert_eq!(quote.source, PriceSource::LearnedMarket);
        assert_eq!(quote.value, 180.0);
        assert_eq!(quote.new_price_reference, Some(279.0));
    }

    #[tokio::test]
    async fn below_minimum_falls_through() {
        let store = MockMarketStore::new().with_learned(learned_market(2));
        let identity = SearchIdentity::derive("AirPods Pro 2nd Gen").unwrap();

        assert!(lookup(&store, &identity, &RunConfig::default()).await.is_none());
    }

    #[tokio::test]
    async fn unknown_identity_falls_through() {
        let store = MockMarketStore::new();
        let identity = SearchIdentity::derive("Sony WH-1000XM4").unwrap();

        assert!(lookup(&store, &identity, &RunConfig::default()).await.is_none());
    }
}
