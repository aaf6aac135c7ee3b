use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// --- Listings ---

/// A raw scraped auction listing. Owned by the scraping collaborator,
/// read-only to the core once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    /// Current price: highest bid, or the asking price for buy-now listings.
    pub price: f64,
    pub currency: String,
    pub buy_now: bool,
    pub bid_count: u32,
    pub ends_at: Option<DateTime<Utc>>,
    pub platform: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

/// One configured marketplace search, owned by the run-config collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Known category floor price, the pricing tier of last resort.
    #[serde(default)]
    pub baseline_price: Option<f64>,
}

// --- Extraction ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Single,
    Bundle,
    Accessory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BundleComponent {
    pub name: String,
    pub quantity: u32,
}

/// Structured interpretation of one listing. Failed extractions keep a
/// record with `Failed` status so downstream stages can exclude them
/// deterministically — an extraction is never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedProduct {
    pub listing_id: String,
    pub name: String,
    pub quantity: u32,
    pub kind: ProductKind,
    pub components: Vec<BundleComponent>,
    pub confidence: f32,
    pub status: ExtractionStatus,
    pub failure_reason: Option<String>,
    pub has_defect: bool,
}

impl ExtractedProduct {
    pub fn failed(listing_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            name: String::new(),
            quantity: 0,
            kind: ProductKind::Single,
            components: Vec::new(),
            confidence: 0.0,
            status: ExtractionStatus::Failed,
            failure_reason: Some(reason.into()),
            has_defect: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExtractionStatus::Ok
    }
}

// --- Pricing ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    LearnedMarket,
    WebSearch,
    SoftMarket,
    AiEstimate,
    QueryBaseline,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriceSource::LearnedMarket => "learned_market",
            PriceSource::WebSearch => "web_search",
            PriceSource::SoftMarket => "soft_market",
            PriceSource::AiEstimate => "ai_estimate",
            PriceSource::QueryBaseline => "query_baseline",
        };
        write!(f, "{s}")
    }
}

/// One resolved resale-price estimate with its chain of trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub value: f64,
    pub currency: String,
    pub source: PriceSource,
    pub sample_size: u32,
    pub confidence: f32,
    /// Human-auditable evidence lines ("median of 5 vendor prices", ...).
    pub evidence: Vec<String>,
    /// New/retail reference price, when a tier learned one. The sanity cap
    /// compares resale against this.
    pub new_price_reference: Option<f64>,
}

/// Prior observed sale outcomes for one identity, read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedMarket {
    pub identity: String,
    pub median_price: f64,
    pub sample_size: u32,
    pub new_price: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

// --- Evaluation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Skip,
    Watch,
    Bid,
    BuyNow,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::Skip => "skip",
            Strategy::Watch => "watch",
            Strategy::Bid => "bid",
            Strategy::BuyNow => "buy_now",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealEvaluation {
    pub listing_id: String,
    pub search_identity: String,
    pub purchase_price: f64,
    pub resolved_resale_price: f64,
    pub price_source: PriceSource,
    pub expected_profit: f64,
    pub profit_margin_pct: f64,
    pub confidence: f32,
    pub recommended_strategy: Strategy,
    pub strategy_reason: String,
}

// --- Run bookkeeping ---

/// Metered call categories the governor tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeteredStep {
    Extraction,
    DetailExtraction,
    WebSearch,
    Vision,
    AiEstimate,
}

impl std::fmt::Display for MeteredStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MeteredStep::Extraction => "extraction",
            MeteredStep::DetailExtraction => "detail_extraction",
            MeteredStep::WebSearch => "web_search",
            MeteredStep::Vision => "vision",
            MeteredStep::AiEstimate => "ai_estimate",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub step: MeteredStep,
    pub calls: u32,
    pub usd_cents: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    Accepted,
    Skipped,
}

/// Terminal disposition for one listing. Every listing leaves the run with
/// one of these — including `budget_exhausted` when spend ran out mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingOutcome {
    pub listing_id: String,
    pub state: OutcomeState,
    pub reason: String,
    pub evaluation: Option<DealEvaluation>,
}

// --- Escalation collaborator payloads ---

/// Enriched attributes from the listing detail page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingDetail {
    pub description: String,
    pub shipping_cost: Option<f64>,
    pub seller_rating: Option<f32>,
    pub pickup_only: bool,
    pub image_urls: Vec<String>,
}

/// Image-derived findings for bundle component counting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionFindings {
    pub component_count: u32,
    pub component_names: Vec<String>,
    pub confidence: f32,
}
