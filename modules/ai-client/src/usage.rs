//! Token usage and cost estimation for metered calls.
//!
//! Every response carries a `CallUsage` so callers can settle their cost
//! ledger with actuals instead of estimates. Prices are cents per million
//! tokens, rounded up — the provider charges for attempted work, so a
//! failed-but-billed call still produces a non-zero figure.

use serde::{Deserialize, Serialize};

/// Cents per million input/output tokens by model family.
/// Matched by prefix so dated model ids resolve without a table update.
const MODEL_PRICES: &[(&str, u64, u64)] = &[
    ("claude-haiku", 100, 500),
    ("claude-sonnet", 300, 1500),
    ("claude-opus", 1500, 7500),
];

/// Fallback for unrecognized models: price as sonnet, never as free.
const DEFAULT_PRICE: (u64, u64) = (300, 1500);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CallUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated cost in USD cents, rounded up to at least 1.
    pub estimated_cents: u64,
}

impl CallUsage {
    pub fn from_tokens(model: &str, input_tokens: u32, output_tokens: u32) -> Self {
        let (in_price, out_price) = MODEL_PRICES
            .iter()
            .find(|(prefix, _, _)| model.starts_with(prefix))
            .map(|(_, i, o)| (*i, *o))
            .unwrap_or(DEFAULT_PRICE);

        let raw = u64::from(input_tokens) * in_price + u64::from(output_tokens) * out_price;
        let estimated_cents = raw.div_ceil(1_000_000).max(1);

        Self {
            input_tokens,
            output_tokens,
            estimated_cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haiku_call_rounds_up_to_one_cent() {
        let usage = CallUsage::from_tokens("claude-haiku-4-5-20251001", 1000, 200);
        assert_eq!(usage.estimated_cents, 1);
    }

    #[test]
    fn large_sonnet_call_scales() {
        let usage = CallUsage::from_tokens("claude-sonnet-4-20250514", 1_000_000, 100_000);
        // 300 input + 150 output cents
        assert_eq!(usage.estimated_cents, 450);
    }

    #[test]
    fn unknown_model_is_never_free() {
        let usage = CallUsage::from_tokens("mystery-model", 10, 10);
        assert!(usage.estimated_cents >= 1);
    }
}
