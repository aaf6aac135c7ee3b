//! The run engine: normalize → extract → gate/escalate → price → evaluate.
//!
//! One run, one context. Metered calls settle the ledger between dispatches;
//! when the governor denies further spend, everything still queued leaves
//! the run marked `budget_exhausted` instead of dangling.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use bidscout_common::{
    BidscoutError, BundleComponent, ExtractedProduct, Listing, ListingDetail, ListingOutcome,
    MeteredStep, OutcomeState, ProductKind, RunConfig, SearchIdentity, SearchQuery, Strategy,
};

use crate::batch::BatchOrchestrator;
use crate::budget::OperationCost;
use crate::context::RunContext;
use crate::evaluator::DealEvaluator;
use crate::gate::{DecisionGate, EscalationStage, GateState};
use crate::pricing::{PriceContext, PriceResolver};
use crate::traits::{
    DetailFetcher, MarketStore, PriceEstimator, PriceSearcher, ProductExtractor, VisionAnalyzer,
};

/// Parallel price lookups in flight at once. Each dispatch pre-reserves
/// budget atomically, so the ceiling holds regardless of this number.
const PRICE_LOOKUP_CONCURRENCY: usize = 4;

/// Stats from one run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub listings_seen: u32,
    pub products_extracted: u32,
    pub extraction_failures: u32,
    pub pre_skipped: u32,
    pub detail_escalations: u32,
    pub vision_escalations: u32,
    pub identities_priced: u32,
    pub accepted: u32,
    pub skipped: u32,
    pub budget_exhausted: u32,
    pub by_strategy: [u32; 4], // Skip, Watch, Bid, BuyNow
    pub spent_cents: u64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Bidscout Run Complete ===")?;
        writeln!(f, "Listings seen:        {}", self.listings_seen)?;
        writeln!(f, "Products extracted:   {}", self.products_extracted)?;
        writeln!(f, "Extraction failures:  {}", self.extraction_failures)?;
        writeln!(f, "Pre-skipped:          {} (accessory/defect)", self.pre_skipped)?;
        writeln!(f, "Detail escalations:   {}", self.detail_escalations)?;
        writeln!(f, "Vision escalations:   {}", self.vision_escalations)?;
        writeln!(f, "Identities priced:    {}", self.identities_priced)?;
        writeln!(f, "Accepted:             {}", self.accepted)?;
        writeln!(f, "Skipped:              {}", self.skipped)?;
        writeln!(f, "Budget exhausted:     {}", self.budget_exhausted)?;
        writeln!(f, "\nBy strategy:")?;
        writeln!(f, "  buy_now: {}", self.by_strategy[3])?;
        writeln!(f, "  bid:     {}", self.by_strategy[2])?;
        writeln!(f, "  watch:   {}", self.by_strategy[1])?;
        writeln!(f, "  skip:    {}", self.by_strategy[0])?;
        writeln!(f, "\nSpend: {} cents", self.spent_cents)?;
        Ok(())
    }
}

pub struct RunOutcome {
    /// Accepted outcomes first, ranked by expected profit; skips after.
    pub outcomes: Vec<ListingOutcome>,
    pub stats: RunStats,
}

enum Disposition {
    Accept(ExtractedProduct, Option<ListingDetail>),
    Skip(String),
}

pub struct Engine {
    orchestrator: BatchOrchestrator,
    gate: DecisionGate,
    resolver: PriceResolver,
    evaluator: DealEvaluator,
    detail: Arc<dyn DetailFetcher>,
    vision: Arc<dyn VisionAnalyzer>,
    store: Arc<dyn MarketStore>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        extractor: Arc<dyn ProductExtractor>,
        detail: Arc<dyn DetailFetcher>,
        vision: Arc<dyn VisionAnalyzer>,
        searcher: Arc<dyn PriceSearcher>,
        estimator: Arc<dyn PriceEstimator>,
        store: Arc<dyn MarketStore>,
        config: &RunConfig,
    ) -> Self {
        Self {
            orchestrator: BatchOrchestrator::new(extractor),
            gate: DecisionGate::new(config.accept_confidence),
            resolver: PriceResolver::new(store.clone(), searcher, estimator),
            evaluator: DealEvaluator::new(config.clone()),
            detail,
            vision,
            store,
        }
    }

    pub async fn run(
        &self,
        query: &SearchQuery,
        listings: Vec<Listing>,
        ctx: &RunContext,
    ) -> Result<RunOutcome> {
        let mut stats = RunStats {
            listings_seen: listings.len() as u32,
            ..RunStats::default()
        };
        info!(query = query.query.as_str(), listings = listings.len(), "Run starting");

        // 1. Batch extraction (budget-gated, cache-aware).
        let mut products = self.orchestrator.extract(&listings, ctx).await;

        // 2. Gate every listing, escalating where the gate asks for more.
        let mut outcomes: Vec<ListingOutcome> = Vec::new();
        let mut accepted: Vec<(Listing, ExtractedProduct)> = Vec::new();

        for listing in &listings {
            let product = products
                .remove(&listing.id)
                .unwrap_or_else(|| ExtractedProduct::failed(&listing.id, "missing_from_response"));

            if product.is_ok() {
                stats.products_extracted += 1;
            } else {
                stats.extraction_failures += 1;
            }

            match self.settle_listing(listing, product, ctx, &mut stats).await {
                Disposition::Accept(product, detail) => {
                    accepted.push((listing_with_detail(listing, detail), product));
                }
                Disposition::Skip(reason) => {
                    count_skip(&mut stats, &reason);
                    outcomes.push(ListingOutcome {
                        listing_id: listing.id.clone(),
                        state: OutcomeState::Skipped,
                        reason,
                        evaluation: None,
                    });
                }
            }
        }

        // 3. Group by identity — the extracted name, normalized, so peer
        // listings of one product always aggregate into one market.
        let mut groups: HashMap<SearchIdentity, Vec<(Listing, ExtractedProduct)>> = HashMap::new();
        for (listing, product) in accepted {
            let identity = SearchIdentity::derive_or_singleton(&product.name, &listing.id);
            groups.entry(identity).or_default().push((listing, product));
        }
        stats.identities_priced = groups.len() as u32;

        // 4. Resolve one price per identity. Lookups fan out, but every
        // metered dispatch re-enters the governor first.
        let resolver = &self.resolver;
        let priced: Vec<_> = stream::iter(groups.into_iter().map(|(identity, members)| {
            async move {
                let peers: Vec<&Listing> = members.iter().map(|(l, _)| l).collect();
                let price_ctx = PriceContext {
                    peers,
                    query_baseline: query.baseline_price,
                };
                let resolved = resolver.resolve(&identity, &price_ctx, ctx).await;
                (identity, members, resolved)
            }
        }))
        .buffer_unordered(PRICE_LOOKUP_CONCURRENCY)
        .collect()
        .await;

        // 5. Evaluate every accepted listing against its group's price.
        for (identity, members, resolved) in priced {
            match resolved {
                Ok(resolved) => {
                    for (listing, product) in members {
                        let mut eval =
                            self.evaluator.evaluate(&listing, &identity, &resolved.quote);
                        if let Some(cap) = resolved.soft_cap {
                            eval = self.evaluator.apply_soft_cap(
                                &eval,
                                &listing,
                                &identity,
                                &resolved.quote,
                                cap,
                            );
                        }
                        eval.confidence = eval.confidence.min(product.confidence);

                        let state = if eval.recommended_strategy == Strategy::Skip {
                            stats.skipped += 1;
                            OutcomeState::Skipped
                        } else {
                            stats.accepted += 1;
                            OutcomeState::Accepted
                        };
                        stats.by_strategy[strategy_index(eval.recommended_strategy)] += 1;

                        outcomes.push(ListingOutcome {
                            listing_id: listing.id.clone(),
                            state,
                            reason: eval.strategy_reason.clone(),
                            evaluation: Some(eval),
                        });
                    }
                }
                Err(BidscoutError::BudgetExceeded { .. }) => {
                    warn!(identity = %identity, "Pricing denied, budget exhausted");
                    for (listing, _) in members {
                        stats.budget_exhausted += 1;
                        stats.skipped += 1;
                        outcomes.push(skip_outcome(&listing.id, "budget_exhausted"));
                    }
                }
                Err(e) => {
                    info!(identity = %identity, error = %e, "No price evidence");
                    for (listing, _) in members {
                        stats.skipped += 1;
                        outcomes.push(skip_outcome(&listing.id, "no_price_evidence"));
                    }
                }
            }
        }

        // 6. Rank: accepted by expected profit, skips after.
        outcomes.sort_by(|a, b| {
            let profit = |o: &ListingOutcome| {
                o.evaluation
                    .as_ref()
                    .filter(|_| o.state == OutcomeState::Accepted)
                    .map(|e| e.expected_profit)
            };
            match (profit(a), profit(b)) {
                (Some(pa), Some(pb)) => pb.total_cmp(&pa),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });

        stats.spent_cents = ctx.governor.total_spent_cents();
        ctx.governor.log_status();

        // 7. Write back for audit. A store failure loses the audit trail,
        // not the run's results.
        let run_id = ctx.run_id.to_string();
        if let Err(e) = self.store.write_outcomes(&run_id, &outcomes).await {
            error!(error = %e, "Failed to write outcomes");
        }
        if let Err(e) = self.store.write_ledger(&run_id, &ctx.governor.ledger()).await {
            error!(error = %e, "Failed to write ledger");
        }

        Ok(RunOutcome { outcomes, stats })
    }

    /// Walk one listing through the gate until it is accepted or skipped.
    async fn settle_listing(
        &self,
        listing: &Listing,
        mut product: ExtractedProduct,
        ctx: &RunContext,
        stats: &mut RunStats,
    ) -> Disposition {
        let mut stage = EscalationStage::Initial;
        let mut detail: Option<ListingDetail> = None;

        loop {
            let decision = self.gate.assess(&product, stage);
            match decision.state {
                GateState::Accepted => return Disposition::Accept(product, detail),
                GateState::Skipped => {
                    return Disposition::Skip(
                        decision.reason.unwrap_or_else(|| "skipped".to_string()),
                    );
                }
                GateState::NeedsDetail => {
                    stats.detail_escalations += 1;
                    match self.escalate_detail(listing, ctx).await {
                        Ok((updated, fetched)) => {
                            product = updated;
                            detail = Some(fetched);
                        }
                        Err(BidscoutError::BudgetExceeded { .. }) => {
                            return Disposition::Skip("budget_exhausted".to_string());
                        }
                        Err(e) => {
                            warn!(listing_id = listing.id.as_str(), error = %e, "Detail escalation failed");
                        }
                    }
                    stage = EscalationStage::AfterDetail;
                }
                GateState::NeedsVision => {
                    stats.vision_escalations += 1;
                    match self.escalate_vision(listing, &product, detail.as_ref(), ctx).await {
                        Ok(Some(updated)) => product = updated,
                        Ok(None) => {}
                        Err(BidscoutError::BudgetExceeded { .. }) => {
                            return Disposition::Skip("budget_exhausted".to_string());
                        }
                        Err(e) => {
                            warn!(listing_id = listing.id.as_str(), error = %e, "Vision escalation failed");
                        }
                    }
                    stage = EscalationStage::AfterVision;
                }
                GateState::Extracted => unreachable!("gate never returns Extracted"),
            }
        }
    }

    /// Detail tier: fetch the detail page, re-extract with the richer text.
    async fn escalate_detail(
        &self,
        listing: &Listing,
        ctx: &RunContext,
    ) -> Result<(ExtractedProduct, ListingDetail), BidscoutError> {
        let detail = self.detail.fetch_detail(listing).await?;
        let product = self
            .orchestrator
            .reextract_with_detail(listing, &detail.description, ctx)
            .await?;
        Ok((product, detail))
    }

    /// Vision tier: count bundle components from the first listing image.
    /// One image — more photos are cost without signal.
    async fn escalate_vision(
        &self,
        listing: &Listing,
        product: &ExtractedProduct,
        detail: Option<&ListingDetail>,
        ctx: &RunContext,
    ) -> Result<Option<ExtractedProduct>, BidscoutError> {
        let image_url = detail
            .map(|d| d.image_urls.as_slice())
            .filter(|urls| !urls.is_empty())
            .unwrap_or(&listing.image_urls)
            .first()
            .cloned();
        let Some(image_url) = image_url else {
            info!(listing_id = listing.id.as_str(), "No image for vision escalation");
            return Ok(None);
        };

        let lease = ctx.governor.reserve(MeteredStep::Vision, OperationCost::VISION)?;
        match self.vision.analyze(&image_url, &product.name).await {
            Ok(metered) => {
                lease.settle(metered.cost_cents);
                let findings = metered.value;
                if findings.component_count == 0 {
                    return Ok(None);
                }

                let mut updated = product.clone();
                if updated.kind == ProductKind::Bundle && updated.components.is_empty() {
                    updated.components = findings
                        .component_names
                        .iter()
                        .map(|name| BundleComponent {
                            name: name.clone(),
                            quantity: 1,
                        })
                        .collect();
                }
                updated.confidence = updated.confidence.max(findings.confidence);
                Ok(Some(updated))
            }
            Err(e) => {
                let reserved = lease.reserved_cents();
                lease.settle(reserved);
                Err(e)
            }
        }
    }
}

fn listing_with_detail(listing: &Listing, detail: Option<ListingDetail>) -> Listing {
    let mut enriched = listing.clone();
    if let Some(detail) = detail {
        if enriched.shipping_cost.is_none() {
            enriched.shipping_cost = detail.shipping_cost;
        }
        if enriched.image_urls.is_empty() {
            enriched.image_urls = detail.image_urls;
        }
    }
    enriched
}

fn skip_outcome(listing_id: &str, reason: &str) -> ListingOutcome {
    ListingOutcome {
        listing_id: listing_id.to_string(),
        state: OutcomeState::Skipped,
        reason: reason.to_string(),
        evaluation: None,
    }
}

fn count_skip(stats: &mut RunStats, reason: &str) {
    stats.skipped += 1;
    match reason {
        "accessory_only" | "defect_flagged" => stats.pre_skipped += 1,
        "budget_exhausted" => stats.budget_exhausted += 1,
        _ => {}
    }
}

fn strategy_index(strategy: Strategy) -> usize {
    match strategy {
        Strategy::Skip => 0,
        Strategy::Watch => 1,
        Strategy::Bid => 2,
        Strategy::BuyNow => 3,
    }
}
