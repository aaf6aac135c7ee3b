//! Web-search-backed price lookup: asks the model to research current
//! new/retail prices across vendors with server-side web search and report
//! them as structured rows. Search spend is billed per search on top of
//! token usage.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use ai_client::claude::Claude;
use bidscout_common::{BidscoutError, SearchIdentity};

use crate::extractor::map_ai_err;
use crate::traits::{Metered, PriceSearcher, VendorPrice};

/// Cents billed per server-side web search, on top of token usage.
const CENTS_PER_SEARCH: u64 = 1;

#[derive(Debug, Deserialize, JsonSchema)]
struct VendorPricesResponse {
    /// One row per vendor with a current price for the exact product.
    #[serde(default)]
    prices: Vec<VendorPrice>,
}

const SEARCH_SYSTEM_PROMPT: &str = "You research current NEW retail prices for consumer products. \
Search the web for the exact product across multiple vendors. Report only prices for the product \
itself — new, not used, not accessories, not bundles. If you cannot find the exact product, \
report an empty list rather than a guess.";

pub struct ClaudePriceSearcher {
    claude: Claude,
    max_searches: u32,
    currency: String,
}

impl ClaudePriceSearcher {
    pub fn new(api_key: &str, model: &str, max_searches: u32, currency: &str) -> Self {
        Self {
            claude: Claude::new(api_key, model),
            max_searches,
            currency: currency.to_string(),
        }
    }
}

#[async_trait]
impl PriceSearcher for ClaudePriceSearcher {
    async fn vendor_prices(
        &self,
        identity: &SearchIdentity,
    ) -> Result<Metered<Vec<VendorPrice>>, BidscoutError> {
        let prompt = format!(
            "Find current new retail prices in {} for: {identity}\nReport each vendor and its price.",
            self.currency
        );

        let result = self
            .claude
            .search_extract::<VendorPricesResponse>(SEARCH_SYSTEM_PROMPT, &prompt, self.max_searches)
            .await
            .map_err(map_ai_err)?;

        debug!(
            identity = %identity,
            vendors = result.value.prices.len(),
            searches = result.searches_performed,
            "Vendor price lookup complete"
        );

        Ok(Metered {
            value: result.value.prices,
            cost_cents: result.usage.estimated_cents
                + u64::from(result.searches_performed) * CENTS_PER_SEARCH,
        })
    }
}
