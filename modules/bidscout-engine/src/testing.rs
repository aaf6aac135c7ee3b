// Test mocks for the engine pipeline.
//
// One mock per trait boundary, builder-style registration:
// - MockExtractor (ProductExtractor) — echoes titles, scriptable failures
// - MockDetailFetcher (DetailFetcher) — listing_id → ListingDetail
// - MockVisionAnalyzer (VisionAnalyzer) — fixed findings
// - MockSearcher (PriceSearcher) — identity → vendor prices
// - MockEstimator (PriceEstimator) — identity → figure
// - MockMarketStore (MarketStore) — in-memory aggregates, records writes
//
// Plus helpers for constructing listings and quotes. No network, no
// database, no API keys.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use bidscout_common::{
    BidscoutError, LearnedMarket, LedgerEntry, Listing, ListingDetail, ListingOutcome,
    PriceQuote, PriceSource, ProductKind, SearchIdentity, VisionFindings,
};

use crate::traits::{
    DetailFetcher, ExtractionInput, ExtractionRow, MarketStore, Metered, PriceEstimator,
    PriceSearcher, ProductExtractor, VendorPrice, VisionAnalyzer,
};

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

pub fn listing(id: &str, title: &str, price: f64) -> Listing {
    Listing {
        id: id.to_string(),
        title: title.to_string(),
        price,
        currency: "EUR".to_string(),
        buy_now: false,
        bid_count: 0,
        ends_at: None,
        platform: "test-marketplace".to_string(),
        url: format!("https://marketplace.test/item/{id}"),
        description: None,
        shipping_cost: None,
        image_urls: Vec::new(),
    }
}

pub fn listing_with_bids(id: &str, title: &str, price: f64, bid_count: u32) -> Listing {
    Listing {
        bid_count,
        ..listing(id, title, price)
    }
}

pub fn quote(value: f64, source: PriceSource) -> PriceQuote {
    PriceQuote {
        value,
        currency: "EUR".to_string(),
        source,
        sample_size: 3,
        confidence: 0.8,
        evidence: vec!["test quote".to_string()],
        new_price_reference: None,
    }
}

pub fn echo_row(listing_id: &str, name: &str) -> ExtractionRow {
    ExtractionRow {
        listing_id: listing_id.to_string(),
        name: name.to_string(),
        quantity: 1,
        kind: ProductKind::Single,
        components: Vec::new(),
        confidence: 0.9,
        has_defect: false,
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Echoes each listing title back as a confident single product, unless
/// told otherwise: `.with_row()` overrides an item, `.omit()` drops it from
/// the response, `.garble()` returns an unusable row, `.fail_parse_times(n)`
/// fails the first n calls wholesale.
pub struct MockExtractor {
    calls: AtomicU32,
    fail_parse_times: u32,
    confidence: f32,
    overrides: HashMap<String, ExtractionRow>,
    omitted: HashSet<String>,
    garbled: HashSet<String>,
}

impl MockExtractor {
    pub fn echo() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_parse_times: 0,
            confidence: 0.9,
            overrides: HashMap::new(),
            omitted: HashSet::new(),
            garbled: HashSet::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_row(mut self, row: ExtractionRow) -> Self {
        self.overrides.insert(row.listing_id.clone(), row);
        self
    }

    pub fn omit(mut self, listing_id: &str) -> Self {
        self.omitted.insert(listing_id.to_string());
        self
    }

    pub fn garble(mut self, listing_id: &str) -> Self {
        self.garbled.insert(listing_id.to_string());
        self
    }

    pub fn fail_parse_times(mut self, times: u32) -> Self {
        self.fail_parse_times = times;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductExtractor for MockExtractor {
    async fn extract_batch(
        &self,
        items: &[ExtractionInput],
    ) -> Result<Metered<Vec<ExtractionRow>>, BidscoutError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_parse_times {
            return Err(BidscoutError::ParseFailure("mock parse failure".to_string()));
        }

        let rows = items
            .iter()
            .filter(|item| !self.omitted.contains(&item.listing_id))
            .map(|item| {
                if self.garbled.contains(&item.listing_id) {
                    ExtractionRow {
                        name: String::new(),
                        ..echo_row(&item.listing_id, "")
                    }
                } else if let Some(row) = self.overrides.get(&item.listing_id) {
                    row.clone()
                } else {
                    ExtractionRow {
                        confidence: self.confidence,
                        ..echo_row(&item.listing_id, &item.title)
                    }
                }
            })
            .collect();

        Ok(Metered {
            value: rows,
            cost_cents: 2,
        })
    }
}

// ---------------------------------------------------------------------------
// MockDetailFetcher
// ---------------------------------------------------------------------------

pub struct MockDetailFetcher {
    details: HashMap<String, ListingDetail>,
}

impl MockDetailFetcher {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn on_listing(mut self, listing_id: &str, detail: ListingDetail) -> Self {
        self.details.insert(listing_id.to_string(), detail);
        self
    }
}

impl Default for MockDetailFetcher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn detail(description: &str) -> ListingDetail {
    ListingDetail {
        description: description.to_string(),
        shipping_cost: None,
        seller_rating: None,
        pickup_only: false,
        image_urls: Vec::new(),
    }
}

#[async_trait]
impl DetailFetcher for MockDetailFetcher {
    async fn fetch_detail(&self, listing: &Listing) -> Result<ListingDetail, BidscoutError> {
        self.details.get(&listing.id).cloned().ok_or_else(|| {
            BidscoutError::Provider(format!(
                "MockDetailFetcher: no detail registered for {}",
                listing.id
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// MockVisionAnalyzer
// ---------------------------------------------------------------------------

pub struct MockVisionAnalyzer {
    findings: Option<VisionFindings>,
    calls: AtomicU32,
}

impl MockVisionAnalyzer {
    pub fn new() -> Self {
        Self {
            findings: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_findings(mut self, findings: VisionFindings) -> Self {
        self.findings = Some(findings);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockVisionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionAnalyzer for MockVisionAnalyzer {
    async fn analyze(
        &self,
        _image_url: &str,
        _product_hint: &str,
    ) -> Result<Metered<VisionFindings>, BidscoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.findings {
            Some(findings) => Ok(Metered {
                value: findings.clone(),
                cost_cents: 2,
            }),
            None => Err(BidscoutError::Provider(
                "MockVisionAnalyzer: no findings registered".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

pub struct MockSearcher {
    prices: HashMap<String, Vec<VendorPrice>>,
    calls: AtomicU32,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_prices(mut self, identity: &str, prices: &[(&str, f64)]) -> Self {
        self.prices.insert(
            identity.to_string(),
            prices
                .iter()
                .map(|(vendor, price)| VendorPrice {
                    vendor: vendor.to_string(),
                    price: *price,
                })
                .collect(),
        );
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSearcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSearcher for MockSearcher {
    async fn vendor_prices(
        &self,
        identity: &SearchIdentity,
    ) -> Result<Metered<Vec<VendorPrice>>, BidscoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.prices.get(identity.as_str()) {
            Some(prices) => Ok(Metered {
                value: prices.clone(),
                cost_cents: 3,
            }),
            None => Err(BidscoutError::Provider(format!(
                "MockSearcher: no prices registered for {identity}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockEstimator
// ---------------------------------------------------------------------------

pub struct MockEstimator {
    estimates: HashMap<String, f64>,
    calls: AtomicU32,
}

impl MockEstimator {
    pub fn new() -> Self {
        Self {
            estimates: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_estimate(mut self, identity: &str, value: f64) -> Self {
        self.estimates.insert(identity.to_string(), value);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceEstimator for MockEstimator {
    async fn estimate(&self, identity: &SearchIdentity) -> Result<Metered<f64>, BidscoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.estimates.get(identity.as_str()) {
            Some(value) => Ok(Metered {
                value: *value,
                cost_cents: 1,
            }),
            None => Err(BidscoutError::Provider(format!(
                "MockEstimator: no estimate registered for {identity}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockMarketStore
// ---------------------------------------------------------------------------

pub struct MockMarketStore {
    learned: HashMap<String, LearnedMarket>,
    outcomes: Mutex<Vec<ListingOutcome>>,
    ledger: Mutex<Vec<LedgerEntry>>,
}

impl MockMarketStore {
    pub fn new() -> Self {
        Self {
            learned: HashMap::new(),
            outcomes: Mutex::new(Vec::new()),
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn with_learned(mut self, learned: LearnedMarket) -> Self {
        self.learned.insert(learned.identity.clone(), learned);
        self
    }

    pub fn outcomes_written(&self) -> Vec<ListingOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn ledger_written(&self) -> Vec<LedgerEntry> {
        self.ledger.lock().unwrap().clone()
    }
}

impl Default for MockMarketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketStore for MockMarketStore {
    async fn learned_market(&self, identity: &SearchIdentity) -> Result<Option<LearnedMarket>> {
        Ok(self.learned.get(identity.as_str()).cloned())
    }

    async fn write_outcomes(&self, _run_id: &str, outcomes: &[ListingOutcome]) -> Result<()> {
        self.outcomes.lock().unwrap().extend_from_slice(outcomes);
        Ok(())
    }

    async fn write_ledger(&self, _run_id: &str, entries: &[LedgerEntry]) -> Result<()> {
        self.ledger.lock().unwrap().extend_from_slice(entries);
        Ok(())
    }
}
