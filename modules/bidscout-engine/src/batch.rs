//! Batch extraction orchestrator.
//!
//! Turns raw listings into structured products through the extraction model,
//! splitting oversized batches into sequential sub-batches of the safe size.
//! Every call is budget-gated and settled against the ledger whether it
//! succeeds or not. A listing never disappears: parse failures become
//! `Failed` records with machine-readable reasons, and a budget denial marks
//! everything still unprocessed as `budget_exhausted`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bidscout_common::{
    BidscoutError, BundleComponent, ExtractedProduct, ExtractionStatus, Listing, MeteredStep,
    ProductKind, SearchIdentity,
};

use crate::budget::OperationCost;
use crate::cache::CacheDomain;
use crate::context::RunContext;
use crate::traits::{ExtractionInput, ExtractionRow, ProductExtractor};

/// Listing-agnostic extraction result, cached per identity so peer listings
/// of the same product skip the model call entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedExtraction {
    name: String,
    quantity: u32,
    kind: ProductKind,
    components: Vec<BundleComponent>,
    confidence: f32,
    has_defect: bool,
}

impl CachedExtraction {
    fn from_product(product: &ExtractedProduct) -> Self {
        Self {
            name: product.name.clone(),
            quantity: product.quantity,
            kind: product.kind,
            components: product.components.clone(),
            confidence: product.confidence,
            has_defect: product.has_defect,
        }
    }

    fn into_product(self, listing_id: &str) -> ExtractedProduct {
        ExtractedProduct {
            listing_id: listing_id.to_string(),
            name: self.name,
            quantity: self.quantity,
            kind: self.kind,
            components: self.components,
            confidence: self.confidence,
            status: ExtractionStatus::Ok,
            failure_reason: None,
            has_defect: self.has_defect,
        }
    }
}

pub struct BatchOrchestrator {
    extractor: Arc<dyn ProductExtractor>,
}

impl BatchOrchestrator {
    pub fn new(extractor: Arc<dyn ProductExtractor>) -> Self {
        Self { extractor }
    }

    /// Extract all listings, returning one entry per listing id.
    pub async fn extract(
        &self,
        listings: &[Listing],
        ctx: &RunContext,
    ) -> HashMap<String, ExtractedProduct> {
        let mut results: HashMap<String, ExtractedProduct> = HashMap::new();
        let mut pending: Vec<(&Listing, SearchIdentity)> = Vec::new();

        for listing in listings {
            let identity = SearchIdentity::derive_or_singleton(&listing.title, &listing.id);
            match ctx
                .cache
                .get::<CachedExtraction>(CacheDomain::Extraction, identity.as_str())
            {
                Some(cached) => {
                    results.insert(listing.id.clone(), cached.into_product(&listing.id));
                }
                None => pending.push((listing, identity)),
            }
        }

        let cache_hits = results.len();
        info!(
            total = listings.len(),
            cache_hits,
            to_extract = pending.len(),
            "Starting batch extraction"
        );

        // Sub-batches are issued sequentially so the ledger is settled
        // between one call and the next budget check.
        let chunk_size = ctx.config.max_batch_size.max(1);
        let mut budget_exhausted = false;

        for chunk in pending.chunks(chunk_size) {
            if budget_exhausted {
                for (listing, _) in chunk {
                    results.insert(
                        listing.id.clone(),
                        ExtractedProduct::failed(&listing.id, "budget_exhausted"),
                    );
                }
                continue;
            }

            match self.extract_chunk(chunk, ctx).await {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(BidscoutError::BudgetExceeded { .. }) => {
                    warn!(
                        remaining = chunk.len(),
                        "Budget exhausted, terminating extraction early"
                    );
                    budget_exhausted = true;
                    for (listing, _) in chunk {
                        results.insert(
                            listing.id.clone(),
                            ExtractedProduct::failed(&listing.id, "budget_exhausted"),
                        );
                    }
                }
                Err(e) => {
                    // extract_chunk converts call failures into Failed rows;
                    // anything else reaching here is unexpected but still
                    // must not lose the chunk.
                    warn!(error = %e, "Unexpected extraction error, failing chunk");
                    for (listing, _) in chunk {
                        results.insert(
                            listing.id.clone(),
                            ExtractedProduct::failed(&listing.id, "extraction_error"),
                        );
                    }
                }
            }
        }

        results
    }

    /// Re-extract a single listing with its detail-page text. Used by the
    /// escalation path; no retry — a second parse failure here means the
    /// listing is skipped, not re-billed.
    pub async fn reextract_with_detail(
        &self,
        listing: &Listing,
        detail_text: &str,
        ctx: &RunContext,
    ) -> Result<ExtractedProduct, BidscoutError> {
        let lease = ctx
            .governor
            .reserve(MeteredStep::DetailExtraction, OperationCost::DETAIL_EXTRACTION)?;

        let input = ExtractionInput {
            listing_id: listing.id.clone(),
            title: listing.title.clone(),
            detail_text: Some(detail_text.to_string()),
        };

        match self.extractor.extract_batch(std::slice::from_ref(&input)).await {
            Ok(metered) => {
                lease.settle(metered.cost_cents);
                let row = metered
                    .value
                    .into_iter()
                    .find(|r| r.listing_id == listing.id)
                    .ok_or_else(|| {
                        BidscoutError::ParseFailure("missing_from_response".to_string())
                    })?;
                row_to_product(row, listing)
                    .ok_or_else(|| BidscoutError::ParseFailure("item_parse_failed".to_string()))
            }
            Err(e) => {
                let reserved = lease.reserved_cents();
                lease.settle(reserved);
                Err(e)
            }
        }
    }

    /// One sub-batch: budget reserve → call → settle, with at most one
    /// retry and a budget re-check before it. Only a budget denial
    /// propagates; call failures come back as `Failed` rows.
    async fn extract_chunk(
        &self,
        chunk: &[(&Listing, SearchIdentity)],
        ctx: &RunContext,
    ) -> Result<HashMap<String, ExtractedProduct>, BidscoutError> {
        let inputs: Vec<ExtractionInput> = chunk
            .iter()
            .map(|(listing, _)| ExtractionInput::from_listing(listing))
            .collect();

        let mut attempt: u32 = 0;
        loop {
            // Every iteration re-enters the governor — a retry without a
            // budget re-check is the failure mode this loop exists to prevent.
            let lease = ctx
                .governor
                .reserve(MeteredStep::Extraction, OperationCost::EXTRACTION_BATCH)?;

            match self.extractor.extract_batch(&inputs).await {
                Ok(metered) => {
                    lease.settle(metered.cost_cents);
                    return Ok(self.collate(chunk, metered.value, ctx));
                }
                Err(e) => {
                    // The provider charges for attempted work.
                    let reserved = lease.reserved_cents();
                    lease.settle(reserved);

                    attempt += 1;
                    if ctx.governor.retry_allowed(attempt) {
                        warn!(error = %e, attempt, "Sub-batch failed, retrying once");
                        let jitter = rand::rng().random_range(200..800);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                        continue;
                    }

                    let reason = match e {
                        BidscoutError::ParseFailure(_) => "batch_parse_failed",
                        _ => "provider_error",
                    };
                    warn!(reason, items = chunk.len(), "Sub-batch failed terminally");
                    return Ok(chunk
                        .iter()
                        .map(|(listing, _)| {
                            (
                                listing.id.clone(),
                                ExtractedProduct::failed(&listing.id, reason),
                            )
                        })
                        .collect());
                }
            }
        }
    }

    /// Match response rows back to listings by echoed id. A garbled or
    /// missing row fails only its own item — good items in the same
    /// response survive.
    fn collate(
        &self,
        chunk: &[(&Listing, SearchIdentity)],
        rows: Vec<ExtractionRow>,
        ctx: &RunContext,
    ) -> HashMap<String, ExtractedProduct> {
        let mut by_id: HashMap<String, ExtractionRow> = rows
            .into_iter()
            .map(|row| (row.listing_id.clone(), row))
            .collect();

        let mut out = HashMap::new();
        for (listing, identity) in chunk {
            let product = match by_id.remove(&listing.id) {
                Some(row) => match row_to_product(row, listing) {
                    Some(product) => {
                        ctx.cache.put(
                            CacheDomain::Extraction,
                            identity.as_str(),
                            &CachedExtraction::from_product(&product),
                        );
                        product
                    }
                    None => ExtractedProduct::failed(&listing.id, "item_parse_failed"),
                },
                None => ExtractedProduct::failed(&listing.id, "missing_from_response"),
            };
            out.insert(listing.id.clone(), product);
        }
        out
    }
}

/// Validate one row into a product. None if the row is unusable.
fn row_to_product(row: ExtractionRow, listing: &Listing) -> Option<ExtractedProduct> {
    if row.name.trim().is_empty() {
        return None;
    }
    Some(ExtractedProduct {
        listing_id: listing.id.clone(),
        name: row.name,
        quantity: row.quantity.max(1),
        kind: row.kind,
        components: row.components,
        confidence: row.confidence.clamp(0.0, 1.0),
        status: ExtractionStatus::Ok,
        failure_reason: None,
        has_defect: row.has_defect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listing, MockExtractor};
    use bidscout_common::RunConfig;

    fn ctx() -> RunContext {
        RunContext::new(RunConfig::default())
    }

    #[tokio::test]
    async fn forty_eight_listings_make_exactly_four_calls() {
        let listings: Vec<Listing> = (0..48)
            .map(|i| listing(&format!("l{i}"), &format!("Produkt Modell {i}"), 50.0))
            .collect();

        let extractor = Arc::new(MockExtractor::echo());
        let orchestrator = BatchOrchestrator::new(extractor.clone());
        let ctx = ctx();

        let results = orchestrator.extract(&listings, &ctx).await;

        assert_eq!(extractor.calls(), 4); // 15 + 15 + 15 + 3
        assert_eq!(results.len(), 48);
        assert!(results.values().all(|p| p.is_ok()));
    }

    #[tokio::test]
    async fn one_bad_item_does_not_contaminate_the_batch() {
        let listings = vec![
            listing("a", "Sony WH-1000XM4", 80.0),
            listing("b", "Nintendo Switch OLED", 200.0),
            listing("c", "Bosch GSR 12V", 60.0),
        ];

        let extractor = Arc::new(MockExtractor::echo().garble("b"));
        let orchestrator = BatchOrchestrator::new(extractor);

        let results = orchestrator.extract(&listings, &ctx()).await;

        assert!(results["a"].is_ok());
        assert!(!results["b"].is_ok());
        assert_eq!(
            results["b"].failure_reason.as_deref(),
            Some("item_parse_failed")
        );
        assert!(results["c"].is_ok());
    }

    #[tokio::test]
    async fn missing_row_is_failed_not_dropped() {
        let listings = vec![
            listing("a", "Sony WH-1000XM4", 80.0),
            listing("b", "Nintendo Switch OLED", 200.0),
        ];

        let extractor = Arc::new(MockExtractor::echo().omit("b"));
        let orchestrator = BatchOrchestrator::new(extractor);

        let results = orchestrator.extract(&listings, &ctx()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(
            results["b"].failure_reason.as_deref(),
            Some("missing_from_response")
        );
    }

    #[tokio::test]
    async fn parse_failure_retries_exactly_once_then_fails_the_batch() {
        let listings = vec![listing("a", "Sony WH-1000XM4", 80.0)];

        let extractor = Arc::new(MockExtractor::echo().fail_parse_times(99));
        let orchestrator = BatchOrchestrator::new(extractor.clone());
        let ctx = ctx();

        let results = orchestrator.extract(&listings, &ctx).await;

        assert_eq!(extractor.calls(), 2); // initial + single retry
        assert_eq!(
            results["a"].failure_reason.as_deref(),
            Some("batch_parse_failed")
        );
        // Both attempts were billed.
        let ledger = ctx.governor.ledger();
        assert_eq!(ledger[0].calls, 2);
    }

    #[tokio::test]
    async fn retry_is_disabled_in_cost_constrained_mode() {
        use bidscout_common::ExecutionMode;

        let listings = vec![listing("a", "Sony WH-1000XM4", 80.0)];
        let config = RunConfig {
            mode: ExecutionMode::CostConstrained,
            ..RunConfig::default()
        };
        let ctx = RunContext::new(config);

        let extractor = Arc::new(MockExtractor::echo().fail_parse_times(99));
        let orchestrator = BatchOrchestrator::new(extractor.clone());

        orchestrator.extract(&listings, &ctx).await;
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn budget_denial_marks_all_remaining_listings() {
        let listings: Vec<Listing> = (0..30)
            .map(|i| listing(&format!("l{i}"), &format!("Produkt Modell {i}"), 50.0))
            .collect();

        // Enough for one sub-batch call only.
        let config = RunConfig {
            spend_ceiling_cents: OperationCost::EXTRACTION_BATCH,
            ..RunConfig::default()
        };
        let ctx = RunContext::new(config);

        let extractor = Arc::new(MockExtractor::echo());
        let orchestrator = BatchOrchestrator::new(extractor.clone());

        let results = orchestrator.extract(&listings, &ctx).await;

        assert_eq!(extractor.calls(), 1);
        let exhausted = results
            .values()
            .filter(|p| p.failure_reason.as_deref() == Some("budget_exhausted"))
            .count();
        assert_eq!(exhausted, 15);
        assert_eq!(results.len(), 30);
    }

    #[tokio::test]
    async fn same_identity_hits_the_extraction_cache() {
        let first = vec![listing("a", "AirPods Pro 2nd Gen", 150.0)];
        let second = vec![listing("b", "AirPods Pro (2. Generation)", 140.0)];

        let extractor = Arc::new(MockExtractor::echo());
        let orchestrator = BatchOrchestrator::new(extractor.clone());
        let ctx = ctx();

        orchestrator.extract(&first, &ctx).await;
        let results = orchestrator.extract(&second, &ctx).await;

        assert_eq!(extractor.calls(), 1);
        assert!(results["b"].is_ok());
    }
}
