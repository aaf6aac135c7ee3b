//! Deal evaluator.
//!
//! Combines purchase price, resolved resale price and fees/shipping into
//! profit, margin and a discrete recommendation. Sanity caps are enforced
//! here: a resale estimate above the configured fraction of the new price,
//! or a margin above the configured ceiling, forces `skip` with an explicit
//! "unrealistic" reason — the number is never clamped and presented.

use bidscout_common::{
    DealEvaluation, Listing, PriceQuote, RunConfig, SearchIdentity, Strategy,
};

pub struct DealEvaluator {
    config: RunConfig,
}

impl DealEvaluator {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        listing: &Listing,
        identity: &SearchIdentity,
        quote: &PriceQuote,
    ) -> DealEvaluation {
        let resale = quote.value;
        let purchase = listing.price;
        let shipping = listing
            .shipping_cost
            .unwrap_or(self.config.default_shipping_cost);
        let fees = resale * self.config.platform_fee_pct / 100.0;

        let cost = purchase + shipping;
        let profit = resale - cost - fees;
        let margin_pct = if cost > 0.0 { profit / cost * 100.0 } else { 0.0 };

        let base = DealEvaluation {
            listing_id: listing.id.clone(),
            search_identity: identity.as_str().to_string(),
            purchase_price: purchase,
            resolved_resale_price: resale,
            price_source: quote.source,
            expected_profit: profit,
            profit_margin_pct: margin_pct,
            confidence: quote.confidence,
            recommended_strategy: Strategy::Skip,
            strategy_reason: String::new(),
        };

        // Sanity caps: used goods never sell above a ceiling relative to new,
        // and no real flip clears the margin ceiling. Breaching either means
        // the estimate is wrong, not that the deal is great.
        if let Some(new_price) = quote.new_price_reference {
            if resale > self.config.resale_cap_vs_new * new_price {
                return DealEvaluation {
                    strategy_reason: format!(
                        "unrealistic_resale_vs_new: {:.2} > {:.0}% of {:.2}",
                        resale,
                        self.config.resale_cap_vs_new * 100.0,
                        new_price
                    ),
                    ..base
                };
            }
        }
        if margin_pct > self.config.margin_ceiling_pct {
            return DealEvaluation {
                strategy_reason: format!(
                    "unrealistic_margin: {margin_pct:.0}% > {:.0}% ceiling",
                    self.config.margin_ceiling_pct
                ),
                ..base
            };
        }

        let (strategy, reason) = self.recommend(listing, profit, margin_pct);
        DealEvaluation {
            recommended_strategy: strategy,
            strategy_reason: reason,
            ..base
        }
    }

    fn recommend(&self, listing: &Listing, profit: f64, margin_pct: f64) -> (Strategy, String) {
        if profit >= self.config.min_profit && margin_pct >= self.config.min_margin_pct {
            if listing.buy_now {
                (
                    Strategy::BuyNow,
                    format!("profit {profit:.2} at {margin_pct:.0}% margin, buy-now available"),
                )
            } else {
                (
                    Strategy::Bid,
                    format!("profit {profit:.2} at {margin_pct:.0}% margin, auction headroom"),
                )
            }
        } else if profit >= self.config.min_profit / 2.0
            && margin_pct >= self.config.min_margin_pct / 2.0
        {
            (
                Strategy::Watch,
                format!("marginal: profit {profit:.2} at {margin_pct:.0}% margin"),
            )
        } else {
            (
                Strategy::Skip,
                format!("insufficient_margin: profit {profit:.2} at {margin_pct:.0}% margin"),
            )
        }
    }

    /// Re-evaluate under the soft-market cap. Downgrade-only: the capped
    /// evaluation may lower resale, profit and strategy but never raise
    /// any of them above the original.
    pub fn apply_soft_cap(
        &self,
        original: &DealEvaluation,
        listing: &Listing,
        identity: &SearchIdentity,
        quote: &PriceQuote,
        cap: f64,
    ) -> DealEvaluation {
        if cap >= original.resolved_resale_price {
            return original.clone();
        }

        let mut capped_quote = quote.clone();
        capped_quote.value = cap;
        capped_quote
            .evidence
            .push(format!("capped by soft market at {cap:.2}"));

        let capped = self.evaluate(listing, identity, &capped_quote);

        DealEvaluation {
            resolved_resale_price: capped.resolved_resale_price.min(original.resolved_resale_price),
            expected_profit: capped.expected_profit.min(original.expected_profit),
            profit_margin_pct: capped.profit_margin_pct.min(original.profit_margin_pct),
            recommended_strategy: capped
                .recommended_strategy
                .min(original.recommended_strategy),
            ..capped
        }
    }
}
