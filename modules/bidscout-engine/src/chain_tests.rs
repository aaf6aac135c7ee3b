//! Chain tests — end-to-end engine runs with mocks.
//!
//! Each test follows MOCK → FUNCTION → OUTPUT: set up the fake collaborators,
//! call `Engine::run`, assert on the outcomes. We never reach into the engine
//! and call its internal stages.

use std::sync::Arc;

use chrono::Utc;

use bidscout_common::{
    LearnedMarket, OutcomeState, PriceSource, ProductKind, RunConfig, SearchQuery, Strategy,
};

use crate::budget::OperationCost;
use crate::context::RunContext;
use crate::engine::Engine;
use crate::testing::*;
use crate::traits::ExtractionRow;

fn search_query() -> SearchQuery {
    SearchQuery {
        query: "kopfhörer".to_string(),
        category: Some("audio".to_string()),
        baseline_price: None,
    }
}

fn engine(
    extractor: Arc<MockExtractor>,
    detail: MockDetailFetcher,
    vision: MockVisionAnalyzer,
    searcher: Arc<MockSearcher>,
    estimator: Arc<MockEstimator>,
    store: Arc<MockMarketStore>,
    config: &RunConfig,
) -> Engine {
    Engine::new(
        extractor,
        Arc::new(detail),
        Arc::new(vision),
        searcher,
        estimator,
        store,
        config,
    )
}

// ---------------------------------------------------------------------------
// Chain Test 1: listing → extraction → learned market → buy-now recommendation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn priced_listing_flows_to_buy_now_recommendation() {
    let mut l1 = listing("l1", "AirPods Pro 2nd Gen", 80.0);
    l1.buy_now = true;

    let store = Arc::new(MockMarketStore::new().with_learned(LearnedMarket {
        identity: "airpods pro gen2".to_string(),
        median_price: 140.0,
        sample_size: 5,
        new_price: Some(279.0),
        updated_at: Utc::now(),
    }));

    let config = RunConfig::default();
    let ctx = RunContext::new(config.clone());
    let engine = engine(
        Arc::new(MockExtractor::echo()),
        MockDetailFetcher::new(),
        MockVisionAnalyzer::new(),
        Arc::new(MockSearcher::new()),
        Arc::new(MockEstimator::new()),
        store.clone(),
        &config,
    );

    let result = engine.run(&search_query(), vec![l1], &ctx).await.unwrap();

    assert_eq!(result.outcomes.len(), 1);
    let outcome = &result.outcomes[0];
    assert_eq!(outcome.state, OutcomeState::Accepted);

    let eval = outcome.evaluation.as_ref().unwrap();
    assert_eq!(eval.recommended_strategy, Strategy::BuyNow);
    assert_eq!(eval.price_source, PriceSource::LearnedMarket);
    assert_eq!(eval.search_identity, "airpods pro gen2");
    assert!(eval.expected_profit > 0.0);

    // Audit trail: outcomes and ledger written back.
    assert_eq!(store.outcomes_written().len(), 1);
    assert!(!store.ledger_written().is_empty());
    assert_eq!(result.stats.accepted, 1);
}

// ---------------------------------------------------------------------------
// Chain Test 2: empty bundle → detail re-extraction → still empty → skipped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_bundle_skips_after_detail_reextraction() {
    let b1 = listing("b1", "Konsolen Bundle Konvolut", 150.0);

    let bundle_row = ExtractionRow {
        kind: ProductKind::Bundle,
        ..echo_row("b1", "Konsolen Bundle")
    };
    // Same empty-component row on both the batch call and the detail pass.
    let extractor = Arc::new(MockExtractor::echo().with_row(bundle_row));
    let detail_fetcher =
        MockDetailFetcher::new().on_listing("b1", detail("Verkaufe diverse Konsolen und Spiele"));

    let config = RunConfig::default();
    let ctx = RunContext::new(config.clone());
    let engine = engine(
        extractor.clone(),
        detail_fetcher,
        MockVisionAnalyzer::new(),
        Arc::new(MockSearcher::new()),
        Arc::new(MockEstimator::new()),
        Arc::new(MockMarketStore::new()),
        &config,
    );

    let result = engine.run(&search_query(), vec![b1], &ctx).await.unwrap();

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.state, OutcomeState::Skipped);
    assert_eq!(outcome.reason, "bundle_components_empty_after_detail_scraping");

    // One batch call plus one detail re-extraction, both billed.
    assert_eq!(extractor.calls(), 2);
    assert_eq!(result.stats.detail_escalations, 1);
}

// ---------------------------------------------------------------------------
// Chain Test 3: noisy titles → one identity → soft-market pricing for all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn noisy_titles_aggregate_into_one_soft_market() {
    let l1 = listing_with_bids("l1", "AirPods Pro 2nd Gen NEU", 100.0, 3);
    let l2 = listing_with_bids("l2", "AirPods Pro (2. Generation)", 160.0, 5);
    let l3 = listing("l3", "airpods pro gen 2 gebraucht", 90.0);

    let config = RunConfig::default();
    let ctx = RunContext::new(config.clone());
    let engine = engine(
        Arc::new(MockExtractor::echo()),
        MockDetailFetcher::new(),
        MockVisionAnalyzer::new(),
        Arc::new(MockSearcher::new()), // no web prices registered
        Arc::new(MockEstimator::new()),
        Arc::new(MockMarketStore::new()),
        &config,
    );

    let result = engine
        .run(&search_query(), vec![l1, l2, l3], &ctx)
        .await
        .unwrap();

    // All three priced from the same soft market, one identity.
    let evals: Vec<_> = result
        .outcomes
        .iter()
        .filter_map(|o| o.evaluation.as_ref())
        .collect();
    assert_eq!(evals.len(), 3);
    assert!(evals.iter().all(|e| e.price_source == PriceSource::SoftMarket));
    assert!(evals
        .iter()
        .all(|e| e.search_identity == "airpods pro gen2"));

    // Bid-weighted toward the 5-bid listing: (100·0.9·3 + 160·0.9·5) / 8.
    let expected = (100.0 * 0.9 * 3.0 + 160.0 * 0.9 * 5.0) / 8.0;
    assert!((evals[0].resolved_resale_price - expected).abs() < 1e-9);
    assert_eq!(result.stats.identities_priced, 1);
}

// ---------------------------------------------------------------------------
// Chain Test 4: budget runs out mid-extraction → explicit outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn budget_exhaustion_marks_remaining_listings() {
    let listings: Vec<_> = (0..20)
        .map(|i| listing(&format!("l{i}"), "Sony WH-1000XM4", 80.0))
        .collect();

    let store = Arc::new(MockMarketStore::new().with_learned(LearnedMarket {
        identity: "sony wh 1000xm4".to_string(),
        median_price: 140.0,
        sample_size: 5,
        new_price: Some(280.0),
        updated_at: Utc::now(),
    }));

    // Enough for exactly one extraction sub-batch.
    let config = RunConfig {
        spend_ceiling_cents: OperationCost::EXTRACTION_BATCH,
        ..RunConfig::default()
    };
    let ctx = RunContext::new(config.clone());
    let engine = engine(
        Arc::new(MockExtractor::echo()),
        MockDetailFetcher::new(),
        MockVisionAnalyzer::new(),
        Arc::new(MockSearcher::new()),
        Arc::new(MockEstimator::new()),
        store,
        &config,
    );

    let result = engine.run(&search_query(), listings, &ctx).await.unwrap();

    // First sub-batch of 15 extracted and priced off the learned market;
    // the remaining 5 carry an explicit budget outcome, not an ambiguous one.
    let exhausted: Vec<_> = result
        .outcomes
        .iter()
        .filter(|o| o.reason == "budget_exhausted")
        .collect();
    assert_eq!(exhausted.len(), 5);
    assert_eq!(result.stats.budget_exhausted, 5);
    assert_eq!(result.stats.accepted, 15);

    // The ceiling held.
    assert!(ctx.governor.total_spent_cents() <= OperationCost::EXTRACTION_BATCH);
}

// ---------------------------------------------------------------------------
// Chain Test 5: accessory/defect short-circuit before any pricing spend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accessory_and_defect_listings_never_reach_pricing() {
    let a = listing("a", "Hülle für AirPods Pro", 10.0);
    let b = listing("b", "Sony WH-1000XM4 defekt", 40.0);

    let extractor = Arc::new(
        MockExtractor::echo()
            .with_row(ExtractionRow {
                kind: ProductKind::Accessory,
                ..echo_row("a", "AirPods Pro Hülle")
            })
            .with_row(ExtractionRow {
                has_defect: true,
                ..echo_row("b", "Sony WH-1000XM4")
            }),
    );
    let searcher = Arc::new(MockSearcher::new());
    let estimator = Arc::new(MockEstimator::new());

    let config = RunConfig::default();
    let ctx = RunContext::new(config.clone());
    let engine = engine(
        extractor,
        MockDetailFetcher::new(),
        MockVisionAnalyzer::new(),
        searcher.clone(),
        estimator.clone(),
        Arc::new(MockMarketStore::new()),
        &config,
    );

    let result = engine.run(&search_query(), vec![a, b], &ctx).await.unwrap();

    let reasons: Vec<&str> = result.outcomes.iter().map(|o| o.reason.as_str()).collect();
    assert!(reasons.contains(&"accessory_only"));
    assert!(reasons.contains(&"defect_flagged"));
    assert_eq!(result.stats.pre_skipped, 2);

    // No pricing collaborator was ever called for them.
    assert_eq!(searcher.calls(), 0);
    assert_eq!(estimator.calls(), 0);
}

// ---------------------------------------------------------------------------
// Chain Test 6: thin learned data falls through to the web tier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn thin_learned_market_falls_through_to_web_search() {
    let l1 = listing("l1", "Nintendo Switch OLED", 150.0);

    // Only one observed sale — below the trust minimum.
    let store = Arc::new(MockMarketStore::new().with_learned(LearnedMarket {
        identity: "nintendo switch oled".to_string(),
        median_price: 500.0,
        sample_size: 1,
        new_price: None,
        updated_at: Utc::now(),
    }));
    let searcher = Arc::new(MockSearcher::new().with_prices(
        "nintendo switch oled",
        &[("otto", 330.0), ("saturn", 350.0), ("amazon", 340.0)],
    ));

    let config = RunConfig::default();
    let ctx = RunContext::new(config.clone());
    let engine = engine(
        Arc::new(MockExtractor::echo()),
        MockDetailFetcher::new(),
        MockVisionAnalyzer::new(),
        searcher.clone(),
        Arc::new(MockEstimator::new()),
        store,
        &config,
    );

    let result = engine.run(&search_query(), vec![l1], &ctx).await.unwrap();

    let eval = result.outcomes[0].evaluation.as_ref().unwrap();
    assert_eq!(eval.price_source, PriceSource::WebSearch);
    // Resale = median(330, 340, 350) × used-market factor.
    assert!((eval.resolved_resale_price - 340.0 * 0.60).abs() < 1e-9);
    assert_eq!(searcher.calls(), 1);
}

// ---------------------------------------------------------------------------
// Chain Test 7: low confidence walks detail → vision → accepted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn low_confidence_escalates_through_vision_and_recovers() {
    let mut l1 = listing("l1", "Konvolut Elektronik alt", 55.0);
    l1.image_urls = vec!["https://marketplace.test/img/l1.jpg".to_string()];

    let vague_row = ExtractionRow {
        confidence: 0.3,
        ..echo_row("l1", "Sony WH-1000XM4")
    };
    let extractor = Arc::new(MockExtractor::echo().with_row(vague_row));
    let detail_fetcher =
        MockDetailFetcher::new().on_listing("l1", detail("Alte Elektronik, Kopfhörer Sony"));
    let vision = MockVisionAnalyzer::new().with_findings(bidscout_common::VisionFindings {
        component_count: 1,
        component_names: vec!["Sony WH-1000XM4".to_string()],
        confidence: 0.9,
    });

    let store = Arc::new(MockMarketStore::new().with_learned(LearnedMarket {
        identity: "sony wh 1000xm4".to_string(),
        median_price: 90.0,
        sample_size: 4,
        new_price: Some(280.0),
        updated_at: Utc::now(),
    }));

    let config = RunConfig::default();
    let ctx = RunContext::new(config.clone());
    let engine = engine(
        extractor,
        detail_fetcher,
        vision,
        Arc::new(MockSearcher::new()),
        Arc::new(MockEstimator::new()),
        store,
        &config,
    );

    let result = engine.run(&search_query(), vec![l1], &ctx).await.unwrap();

    assert_eq!(result.stats.detail_escalations, 1);
    assert_eq!(result.stats.vision_escalations, 1);

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.state, OutcomeState::Accepted);
    // Vision confidence propagated into the evaluation's ceiling.
    let eval = outcome.evaluation.as_ref().unwrap();
    assert_eq!(eval.price_source, PriceSource::LearnedMarket);
}
