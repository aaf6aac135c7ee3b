use std::env;
use std::str::FromStr;

/// How aggressively a run may spend.
///
/// Cost-constrained runs disable retries entirely and are the default for
/// scheduled/test execution; full runs permit the single bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    CostConstrained,
    Full,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cost_constrained" | "cost-constrained" => Ok(Self::CostConstrained),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Run configuration, resolved once at run start and passed by reference.
/// Pricing policy knobs live here rather than at call sites — the hierarchy's
/// shape (trust order, cap-only soft market, skip-not-clamp) is fixed in
/// code, the constants are not.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: ExecutionMode,
    /// Per-run spend ceiling in USD cents. 0 = unlimited.
    pub spend_ceiling_cents: u64,
    /// Master retry switch; effective only in `Full` mode.
    pub retries_enabled: bool,

    // Extraction
    /// Safe per-call batch size, tuned to the response-size budget.
    pub max_batch_size: usize,
    /// Confidence at or above which the gate accepts without escalation.
    pub accept_confidence: f32,

    // Price resolution
    /// Learned-market aggregates below this sample count are not trusted.
    pub learned_min_samples: u32,
    /// Bids at or above this count make a peer listing a qualifying sample.
    pub soft_qualifying_bids: u32,
    /// Soft-market aggregation needs at least this many qualifying listings.
    pub soft_min_qualifying: usize,
    /// Bid count from which the high-trust discount tier applies.
    pub soft_high_bid_threshold: u32,
    pub soft_high_bid_factor: f64,
    pub soft_low_bid_factor: f64,
    /// AI estimates have no grounding in observed transactions.
    pub ai_estimate_discount: f64,
    /// Used-market resale as a fraction of the new-price median.
    pub web_used_market_factor: f64,
    pub max_web_searches: u32,

    // Sanity caps — breaching either forces a skip, never a clamp.
    pub resale_cap_vs_new: f64,
    pub margin_ceiling_pct: f64,

    // Evaluation
    pub min_profit: f64,
    pub min_margin_pct: f64,
    /// Fee fraction the resale platform takes on a sale.
    pub platform_fee_pct: f64,
    /// Assumed shipping when the listing doesn't state one.
    pub default_shipping_cost: f64,
    pub currency: String,

    // Providers
    pub extraction_model: String,
    pub pricing_model: String,
    pub anthropic_api_key: String,
    pub database_url: Option<String>,
}

impl RunConfig {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            mode: env_or("BIDSCOUT_MODE", ExecutionMode::CostConstrained),
            spend_ceiling_cents: env_or("BIDSCOUT_SPEND_CEILING_CENTS", 200),
            retries_enabled: env_or("BIDSCOUT_RETRIES_ENABLED", true),
            max_batch_size: env_or("BIDSCOUT_MAX_BATCH_SIZE", 15),
            accept_confidence: env_or("BIDSCOUT_ACCEPT_CONFIDENCE", 0.7),
            learned_min_samples: env_or("BIDSCOUT_LEARNED_MIN_SAMPLES", 3),
            soft_qualifying_bids: env_or("BIDSCOUT_SOFT_QUALIFYING_BIDS", 2),
            soft_min_qualifying: env_or("BIDSCOUT_SOFT_MIN_QUALIFYING", 2),
            soft_high_bid_threshold: env_or("BIDSCOUT_SOFT_HIGH_BID_THRESHOLD", 3),
            soft_high_bid_factor: env_or("BIDSCOUT_SOFT_HIGH_BID_FACTOR", 0.90),
            soft_low_bid_factor: env_or("BIDSCOUT_SOFT_LOW_BID_FACTOR", 0.70),
            ai_estimate_discount: env_or("BIDSCOUT_AI_ESTIMATE_DISCOUNT", 0.50),
            web_used_market_factor: env_or("BIDSCOUT_WEB_USED_MARKET_FACTOR", 0.60),
            max_web_searches: env_or("BIDSCOUT_MAX_WEB_SEARCHES", 3),
            resale_cap_vs_new: env_or("BIDSCOUT_RESALE_CAP_VS_NEW", 0.70),
            margin_ceiling_pct: env_or("BIDSCOUT_MARGIN_CEILING_PCT", 80.0),
            min_profit: env_or("BIDSCOUT_MIN_PROFIT", 10.0),
            min_margin_pct: env_or("BIDSCOUT_MIN_MARGIN_PCT", 25.0),
            platform_fee_pct: env_or("BIDSCOUT_PLATFORM_FEE_PCT", 10.0),
            default_shipping_cost: env_or("BIDSCOUT_DEFAULT_SHIPPING", 5.0),
            currency: env::var("BIDSCOUT_CURRENCY").unwrap_or_else(|_| "EUR".to_string()),
            extraction_model: env::var("BIDSCOUT_EXTRACTION_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            pricing_model: env::var("BIDSCOUT_PRICING_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            database_url: env::var("DATABASE_URL").ok(),
        }
    }

    /// Whether the retry policy permits a second attempt at all.
    /// Cost-constrained runs never retry, whatever the switch says.
    pub fn retries_permitted(&self) -> bool {
        self.retries_enabled && self.mode == ExecutionMode::Full
    }
}

impl Default for RunConfig {
    /// Offline defaults for tests and dry runs: unlimited budget, full mode,
    /// no credentials.
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Full,
            spend_ceiling_cents: 0,
            retries_enabled: true,
            max_batch_size: 15,
            accept_confidence: 0.7,
            learned_min_samples: 3,
            soft_qualifying_bids: 2,
            soft_min_qualifying: 2,
            soft_high_bid_threshold: 3,
            soft_high_bid_factor: 0.90,
            soft_low_bid_factor: 0.70,
            ai_estimate_discount: 0.50,
            web_used_market_factor: 0.60,
            max_web_searches: 3,
            resale_cap_vs_new: 0.70,
            margin_ceiling_pct: 80.0,
            min_profit: 10.0,
            min_margin_pct: 25.0,
            platform_fee_pct: 10.0,
            default_shipping_cost: 5.0,
            currency: "EUR".to_string(),
            extraction_model: "claude-haiku-4-5-20251001".to_string(),
            pricing_model: "claude-haiku-4-5-20251001".to_string(),
            anthropic_api_key: String::new(),
            database_url: None,
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} could not be parsed: {raw}")),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_constrained_mode_never_retries() {
        let config = RunConfig {
            mode: ExecutionMode::CostConstrained,
            retries_enabled: true,
            ..RunConfig::default()
        };
        assert!(!config.retries_permitted());
    }

    #[test]
    fn full_mode_honors_retry_switch() {
        let config = RunConfig::default();
        assert!(config.retries_permitted());

        let config = RunConfig {
            retries_enabled: false,
            ..RunConfig::default()
        };
        assert!(!config.retries_permitted());
    }
}
