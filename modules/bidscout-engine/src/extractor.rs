//! LLM-backed extraction providers: the batch product extractor and the
//! vision analyzer for bundle component counting.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use ai_client::claude::Claude;
use ai_client::AiError;
use bidscout_common::{BidscoutError, VisionFindings};

use crate::traits::{ExtractionInput, ExtractionRow, Metered, ProductExtractor, VisionAnalyzer};

/// Map provider-layer errors into the engine taxonomy: unusable or garbled
/// output is a `ParseFailure` (recorded, retried at most once), everything
/// else is a `Provider` failure.
pub(crate) fn map_ai_err(e: AiError) -> BidscoutError {
    match e {
        AiError::NoUsableOutput => BidscoutError::ParseFailure("no_usable_output".to_string()),
        AiError::Malformed(detail) => BidscoutError::ParseFailure(detail),
        other => BidscoutError::Provider(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Batch product extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct BatchExtractionResponse {
    /// One row per submitted listing, echoing its id.
    #[serde(default)]
    products: Vec<ExtractionRow>,
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract structured product identities from marketplace auction listing titles (German and English mixed).

For EVERY listing submitted, return one row echoing its listing_id exactly.

## Fields
- **name**: canonical product name — brand and model only. Strip condition (neu, gebraucht, defekt, OVP), colors, storage sizes, and seller noise. "Apple AirPods Pro 2. Gen NEU OVP!!!" → "Apple AirPods Pro 2nd Gen".
- **quantity**: units of the main product. "2x Nintendo Switch Controller" → 2.
- **kind**: "single" for one product, "bundle" for multiple distinct products sold together, "accessory" when the listing is ONLY accessories (cases, cables, chargers, straps) with no main product.
- **components**: for bundles, each distinct product with its quantity. Leave empty when you cannot tell what is in the bundle from the title alone.
- **confidence**: 0.0-1.0 — how certain you are the name identifies the real product. Vague titles ("Konvolut Elektronik") are low confidence.
- **has_defect**: true when the listing flags damage ("defekt", "Bastler", "kaputt", "cracked", "for parts").

Never invent products. A title you cannot interpret still gets a row: empty components, low confidence."#;

pub struct ClaudeExtractor {
    claude: Claude,
}

impl ClaudeExtractor {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            claude: Claude::new(api_key, model),
        }
    }
}

#[async_trait]
impl ProductExtractor for ClaudeExtractor {
    async fn extract_batch(
        &self,
        items: &[ExtractionInput],
    ) -> Result<Metered<Vec<ExtractionRow>>, BidscoutError> {
        let mut prompt = String::from("Listings:\n");
        for item in items {
            prompt.push_str(&format!("- listing_id: {}\n  title: {}\n", item.listing_id, item.title));
            if let Some(detail) = &item.detail_text {
                prompt.push_str(&format!("  detail: {detail}\n"));
            }
        }

        debug!(items = items.len(), "Extraction batch request");

        let extracted = self
            .claude
            .extract::<BatchExtractionResponse>(EXTRACTION_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(map_ai_err)?;

        Ok(Metered {
            value: extracted.value.products,
            cost_cents: extracted.usage.estimated_cents,
        })
    }
}

// ---------------------------------------------------------------------------
// Vision analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct VisionResponse {
    /// Distinct sellable products visible in the photo.
    component_count: u32,
    component_names: Vec<String>,
    /// 0.0-1.0 confidence in the count.
    confidence: f32,
}

const VISION_PROMPT: &str = "Count the distinct sellable products visible in this auction photo. \
Ignore packaging, manuals and background objects. Name each product as specifically as you can.";

pub struct ClaudeVision {
    claude: Claude,
    http: reqwest::Client,
}

impl ClaudeVision {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            claude: Claude::new(api_key, model),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VisionAnalyzer for ClaudeVision {
    async fn analyze(
        &self,
        image_url: &str,
        product_hint: &str,
    ) -> Result<Metered<VisionFindings>, BidscoutError> {
        let response = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(|e| BidscoutError::Provider(format!("image fetch failed: {e}")))?;

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BidscoutError::Provider(format!("image read failed: {e}")))?;

        let prompt = format!("{VISION_PROMPT}\nThe listing claims to contain: {product_hint}");
        let extracted = self
            .claude
            .extract_from_image::<VisionResponse>(&bytes, &mime, &prompt)
            .await
            .map_err(map_ai_err)?;

        Ok(Metered {
            value: VisionFindings {
                component_count: extracted.value.component_count,
                component_names: extracted.value.component_names,
                confidence: extracted.value.confidence.clamp(0.0, 1.0),
            },
            cost_cents: extracted.usage.estimated_cents,
        })
    }
}
