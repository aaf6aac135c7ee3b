use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bidscout_common::{BidscoutError, Listing, ListingDetail, RunConfig, SearchQuery};
use bidscout_engine::context::RunContext;
use bidscout_engine::engine::Engine;
use bidscout_engine::estimator::ClaudeEstimator;
use bidscout_engine::extractor::{ClaudeExtractor, ClaudeVision};
use bidscout_engine::searcher::ClaudePriceSearcher;
use bidscout_engine::traits::{DetailFetcher, ListingSource, MarketStore, NoopMarketStore};

#[derive(Parser)]
#[command(name = "bidscout", about = "Price scraped auction listings and rank buy/skip recommendations")]
struct Args {
    /// JSON file of scraped listings (the scraper collaborator's output).
    #[arg(long)]
    listings: PathBuf,

    /// Search query the listings came from.
    #[arg(long)]
    query: String,

    /// Query category, used for shop selection and the baseline floor.
    #[arg(long)]
    category: Option<String>,

    /// Known category floor price (pricing tier of last resort).
    #[arg(long)]
    baseline: Option<f64>,

    /// Override the per-run spend ceiling in cents (0 = unlimited).
    #[arg(long)]
    ceiling_cents: Option<u64>,

    /// Override the execution mode: cost_constrained | full.
    #[arg(long)]
    mode: Option<String>,
}

/// Listing source over a JSON file of scraped listings. The live scraper is
/// an external collaborator; file-driven runs replay its captured output.
struct FileListingSource {
    path: PathBuf,
}

#[async_trait]
impl ListingSource for FileListingSource {
    async fn listings(&self, _query: &str) -> Result<Vec<Listing>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw).context("Malformed listings file")
    }
}

/// Detail "fetcher" over data the scraper already captured on the listing.
/// The live detail-page fetcher is an external collaborator; runs driven
/// from a listings file fall back to the embedded description.
struct EmbeddedDetailFetcher;

#[async_trait]
impl DetailFetcher for EmbeddedDetailFetcher {
    async fn fetch_detail(&self, listing: &Listing) -> Result<ListingDetail, BidscoutError> {
        let description = listing.description.clone().ok_or_else(|| {
            BidscoutError::Provider(format!("no embedded description for {}", listing.id))
        })?;
        Ok(ListingDetail {
            description,
            shipping_cost: listing.shipping_cost,
            seller_rating: None,
            pickup_only: false,
            image_urls: listing.image_urls.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bidscout=info".parse()?))
        .init();

    info!("Bidscout starting...");

    let args = Args::parse();
    let mut config = RunConfig::from_env();
    if let Some(ceiling) = args.ceiling_cents {
        config.spend_ceiling_cents = ceiling;
    }
    if let Some(mode) = &args.mode {
        config.mode = mode.parse().map_err(|e: String| anyhow!(e))?;
    }

    let source = FileListingSource {
        path: args.listings.clone(),
    };
    let listings = source.listings(&args.query).await?;
    info!(listings = listings.len(), "Listings loaded");

    let store: Arc<dyn MarketStore> = match &config.database_url {
        Some(url) => Arc::new(bidscout_store::PgMarketStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set — learned-market tier disabled, results not persisted");
            Arc::new(NoopMarketStore)
        }
    };

    let extractor = Arc::new(ClaudeExtractor::new(
        &config.anthropic_api_key,
        &config.extraction_model,
    ));
    let vision = Arc::new(ClaudeVision::new(
        &config.anthropic_api_key,
        &config.extraction_model,
    ));
    let searcher = Arc::new(ClaudePriceSearcher::new(
        &config.anthropic_api_key,
        &config.pricing_model,
        config.max_web_searches,
        &config.currency,
    ));
    let estimator = Arc::new(ClaudeEstimator::new(
        &config.anthropic_api_key,
        &config.pricing_model,
        &config.currency,
    ));

    let query = SearchQuery {
        query: args.query,
        category: args.category,
        baseline_price: args.baseline,
    };

    let ctx = RunContext::new(config.clone());
    let engine = Engine::new(
        extractor,
        Arc::new(EmbeddedDetailFetcher),
        vision,
        searcher,
        estimator,
        store,
        &config,
    );

    let result = engine.run(&query, listings, &ctx).await?;
    info!("{}", result.stats);

    for outcome in result.outcomes.iter().take(10) {
        if let Some(eval) = &outcome.evaluation {
            if outcome.state == bidscout_common::OutcomeState::Accepted {
                info!(
                    listing_id = outcome.listing_id.as_str(),
                    strategy = %eval.recommended_strategy,
                    resale = eval.resolved_resale_price,
                    profit = eval.expected_profit,
                    source = %eval.price_source,
                    "Recommendation"
                );
            }
        }
    }

    Ok(())
}
