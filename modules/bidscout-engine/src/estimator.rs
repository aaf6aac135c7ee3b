//! Model-backed plausibility pricing, the next-to-last tier. The resolver
//! discounts whatever comes back; this module just asks the question.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use ai_client::claude::Claude;
use bidscout_common::{BidscoutError, SearchIdentity};

use crate::extractor::map_ai_err;
use crate::traits::{Metered, PriceEstimator};

#[derive(Debug, Deserialize, JsonSchema)]
struct EstimateResponse {
    /// Typical used-market price for the product, or 0 if unknown.
    used_price: f64,
}

const ESTIMATE_SYSTEM_PROMPT: &str = "Estimate what a used unit of the given product typically \
sells for on consumer marketplaces. Report a single figure. If you do not recognize the product, \
report 0 — never guess a number for something you cannot identify.";

pub struct ClaudeEstimator {
    claude: Claude,
    currency: String,
}

impl ClaudeEstimator {
    pub fn new(api_key: &str, model: &str, currency: &str) -> Self {
        Self {
            claude: Claude::new(api_key, model),
            currency: currency.to_string(),
        }
    }
}

#[async_trait]
impl PriceEstimator for ClaudeEstimator {
    async fn estimate(&self, identity: &SearchIdentity) -> Result<Metered<f64>, BidscoutError> {
        let prompt = format!("Product: {identity}\nCurrency: {}", self.currency);

        let result = self
            .claude
            .extract::<EstimateResponse>(ESTIMATE_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(map_ai_err)?;

        Ok(Metered {
            value: result.value.used_price,
            cost_cents: result.usage.estimated_cents,
        })
    }
}
