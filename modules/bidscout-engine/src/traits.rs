// Trait abstractions for the engine's collaborator seams.
//
// Scraping, detail/vision fetching, the LLM providers and the persistent
// store are external to the pricing/decision core — everything reaches them
// through these traits. MockExtractor, MockSearcher etc. in `testing` make
// the whole pipeline testable with no network, no database, no API keys.

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use bidscout_common::{
    BidscoutError, BundleComponent, LearnedMarket, LedgerEntry, Listing, ListingDetail,
    ListingOutcome, ProductKind, SearchIdentity, VisionFindings,
};

/// Payload of a metered provider call plus what the attempt cost.
/// Cost is reported even for failed calls — the provider charges for
/// attempted work.
#[derive(Debug)]
pub struct Metered<T> {
    pub value: T,
    pub cost_cents: u64,
}

// ---------------------------------------------------------------------------
// ListingSource — the scraper boundary
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ListingSource: Send + Sync {
    /// All listings scraped for one search query.
    async fn listings(&self, query: &str) -> Result<Vec<Listing>>;
}

// ---------------------------------------------------------------------------
// ProductExtractor — the batch extraction model
// ---------------------------------------------------------------------------

/// One listing handed to the extraction model.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionInput {
    pub listing_id: String,
    pub title: String,
    /// Detail-page text, present on detail-level re-extraction only.
    pub detail_text: Option<String>,
}

impl ExtractionInput {
    pub fn from_listing(listing: &Listing) -> Self {
        Self {
            listing_id: listing.id.clone(),
            title: listing.title.clone(),
            detail_text: None,
        }
    }
}

/// One row the extraction model returns per listing. The model echoes the
/// listing id so a malformed row can be pinned to its item without
/// contaminating the rest of the batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionRow {
    /// The listing id this row answers for, echoed verbatim.
    pub listing_id: String,
    /// Canonical product name: brand and model, no condition or color.
    pub name: String,
    /// How many units of the product the listing contains.
    pub quantity: u32,
    pub kind: ProductKind,
    /// Resolved components, for bundles only.
    #[serde(default)]
    pub components: Vec<BundleComponent>,
    /// Extraction confidence in [0,1].
    pub confidence: f32,
    /// Whether the listing flags the item as defective.
    #[serde(default)]
    pub has_defect: bool,
}

#[async_trait]
pub trait ProductExtractor: Send + Sync {
    /// Extract structured products for a batch of listings. Returns one row
    /// per listing the model managed to answer for; missing or garbled rows
    /// are the orchestrator's problem, a garbled response envelope is a
    /// `ParseFailure`.
    async fn extract_batch(
        &self,
        items: &[ExtractionInput],
    ) -> Result<Metered<Vec<ExtractionRow>>, BidscoutError>;
}

// ---------------------------------------------------------------------------
// Escalation collaborators
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DetailFetcher: Send + Sync {
    /// Fetch enriched attributes from the listing's detail page.
    async fn fetch_detail(&self, listing: &Listing) -> Result<ListingDetail, BidscoutError>;
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Count bundle components visible in a listing image.
    async fn analyze(
        &self,
        image_url: &str,
        product_hint: &str,
    ) -> Result<Metered<VisionFindings>, BidscoutError>;
}

// ---------------------------------------------------------------------------
// Pricing collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VendorPrice {
    pub vendor: String,
    /// Current new/retail price at this vendor.
    pub price: f64,
}

#[async_trait]
pub trait PriceSearcher: Send + Sync {
    /// Look up current new/retail prices across vendors via web search.
    async fn vendor_prices(
        &self,
        identity: &SearchIdentity,
    ) -> Result<Metered<Vec<VendorPrice>>, BidscoutError>;
}

#[async_trait]
pub trait PriceEstimator: Send + Sync {
    /// Model-generated plausibility price for a used unit. Ungrounded —
    /// the resolver discounts it before use.
    async fn estimate(&self, identity: &SearchIdentity) -> Result<Metered<f64>, BidscoutError>;
}

// ---------------------------------------------------------------------------
// MarketStore — the persistence boundary
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Prior learned-market aggregate for an identity, if any.
    async fn learned_market(&self, identity: &SearchIdentity) -> Result<Option<LearnedMarket>>;

    /// Write back per-listing outcomes for audit.
    async fn write_outcomes(&self, run_id: &str, outcomes: &[ListingOutcome]) -> Result<()>;

    /// Write back the run's cost-ledger summary.
    async fn write_ledger(&self, run_id: &str, entries: &[LedgerEntry]) -> Result<()>;
}

#[async_trait]
impl MarketStore for bidscout_store::PgMarketStore {
    async fn learned_market(&self, identity: &SearchIdentity) -> Result<Option<LearnedMarket>> {
        self.learned_market(identity).await
    }

    async fn write_outcomes(&self, run_id: &str, outcomes: &[ListingOutcome]) -> Result<()> {
        self.write_outcomes(run_id, outcomes).await
    }

    async fn write_ledger(&self, run_id: &str, entries: &[LedgerEntry]) -> Result<()> {
        self.write_ledger(run_id, entries).await
    }
}

/// Store used when no database is configured: reads nothing, drops writes.
pub struct NoopMarketStore;

#[async_trait]
impl MarketStore for NoopMarketStore {
    async fn learned_market(&self, _identity: &SearchIdentity) -> Result<Option<LearnedMarket>> {
        Ok(None)
    }

    async fn write_outcomes(&self, _run_id: &str, _outcomes: &[ListingOutcome]) -> Result<()> {
        Ok(())
    }

    async fn write_ledger(&self, _run_id: &str, _entries: &[LedgerEntry]) -> Result<()> {
        Ok(())
    }
}
