//! AI-estimate tier: a model-generated plausibility price, always discounted
//! by the configured factor before use — it has no grounding in observed
//! transactions and optimistic model numbers are how fantasy profits happen.

use bidscout_common::{BidscoutError, MeteredStep, PriceQuote, PriceSource, SearchIdentity};

use crate::budget::OperationCost;
use crate::context::RunContext;
use crate::traits::PriceEstimator;

pub async fn lookup(
    estimator: &dyn PriceEstimator,
    identity: &SearchIdentity,
    ctx: &RunContext,
) -> Result<PriceQuote, BidscoutError> {
    let lease = ctx
        .governor
        .reserve(MeteredStep::AiEstimate, OperationCost::AI_ESTIMATE)?;

    match estimator.estimate(identity).await {
        Ok(metered) => {
            lease.settle(metered.cost_cents);

            let raw = metered.value;
            if !raw.is_finite() || raw <= 0.0 {
                return Err(BidscoutError::InsufficientEvidence(format!(
                    "model estimate unusable for {identity}: {raw}"
                )));
            }

            let discount = ctx.config.ai_estimate_discount;
            Ok(PriceQuote {
                value: raw * discount,
                currency: ctx.config.currency.clone(),
                source: PriceSource::AiEstimate,
                sample_size: 0,
                confidence: 0.3,
                evidence: vec![format!(
                    "model estimate {raw:.2} discounted by {discount:.2}"
                )],
                new_price_reference: None,
            })
        }
        Err(e) => {
            let reserved = lease.reserved_cents();
            lease.settle(reserved);
            Err(e)
        }
    }
}
