//! Decision gate — the escalation state machine.
//!
//! Decides, per extracted product, whether to accept it for pricing,
//! escalate to a richer (and costlier) information source, or skip it.
//! Escalation is strictly detail → vision, never skipping a tier. Accessory
//! and defect skips run before any budget-gated call is made for the item —
//! they exist to avoid spend, not to classify.

use bidscout_common::{ExtractedProduct, ProductKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Extracted,
    NeedsDetail,
    NeedsVision,
    Accepted,
    Skipped,
}

/// Where in the escalation ladder the product currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStage {
    /// Fresh from batch extraction.
    Initial,
    /// After detail-page re-extraction.
    AfterDetail,
    /// After image analysis.
    AfterVision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub state: GateState,
    /// Present on every skip, queryable downstream.
    pub reason: Option<String>,
}

impl GateDecision {
    fn accept() -> Self {
        Self {
            state: GateState::Accepted,
            reason: None,
        }
    }

    fn skip(reason: &str) -> Self {
        Self {
            state: GateState::Skipped,
            reason: Some(reason.to_string()),
        }
    }

    fn escalate(state: GateState, reason: &str) -> Self {
        Self {
            state,
            reason: Some(reason.to_string()),
        }
    }
}

pub struct DecisionGate {
    accept_confidence: f32,
}

impl DecisionGate {
    pub fn new(accept_confidence: f32) -> Self {
        Self { accept_confidence }
    }

    pub fn assess(&self, product: &ExtractedProduct, stage: EscalationStage) -> GateDecision {
        if !product.is_ok() {
            let reason = product
                .failure_reason
                .as_deref()
                .unwrap_or("extraction_failed");
            return GateDecision::skip(reason);
        }

        // Cost-avoidance short-circuits: no pricing work for these.
        if product.kind == ProductKind::Accessory {
            return GateDecision::skip("accessory_only");
        }
        if product.has_defect {
            return GateDecision::skip("defect_flagged");
        }

        // A bundle with no resolved components cannot be priced as-is.
        if product.kind == ProductKind::Bundle && product.components.is_empty() {
            return match stage {
                EscalationStage::Initial => {
                    GateDecision::escalate(GateState::NeedsDetail, "bundle_components_empty")
                }
                EscalationStage::AfterDetail => {
                    GateDecision::skip("bundle_components_empty_after_detail_scraping")
                }
                EscalationStage::AfterVision => {
                    GateDecision::skip("bundle_components_empty_after_vision")
                }
            };
        }

        if product.confidence < self.accept_confidence {
            return match stage {
                EscalationStage::Initial => {
                    GateDecision::escalate(GateState::NeedsDetail, "low_confidence")
                }
                EscalationStage::AfterDetail => {
                    GateDecision::escalate(GateState::NeedsVision, "low_confidence_after_detail")
                }
                EscalationStage::AfterVision => GateDecision::skip("low_confidence_after_vision"),
            };
        }

        GateDecision::accept()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidscout_common::{BundleComponent, ExtractedProduct, ExtractionStatus};

    fn product(kind: ProductKind, confidence: f32) -> ExtractedProduct {
        ExtractedProduct {
            listing_id: "l1".to_string(),
            name: "AirPods Pro".to_string(),
            quantity: 1,
            kind,
            components: Vec::new(),
            confidence,
            status: ExtractionStatus::Ok,
            failure_reason: None,
            has_defect: false,
        }
    }

    #[test]
    fn confident_single_is_accepted() {
        let gate = DecisionGate::new(0.7);
        let decision = gate.assess(&product(ProductKind::Single, 0.9), EscalationStage::Initial);
        assert_eq!(decision.state, GateState::Accepted);
    }

    #[test]
    fn accessory_is_skipped_before_any_pricing() {
        let gate = DecisionGate::new(0.7);
        let decision = gate.assess(
            &product(ProductKind::Accessory, 0.95),
            EscalationStage::Initial,
        );
        assert_eq!(decision.state, GateState::Skipped);
        assert_eq!(decision.reason.as_deref(), Some("accessory_only"));
    }

    #[test]
    fn defect_is_skipped_before_any_pricing() {
        let gate = DecisionGate::new(0.7);
        let mut p = product(ProductKind::Single, 0.95);
        p.has_defect = true;
        let decision = gate.assess(&p, EscalationStage::Initial);
        assert_eq!(decision.reason.as_deref(), Some("defect_flagged"));
    }

    #[test]
    fn empty_bundle_escalates_to_detail_then_skips() {
        let gate = DecisionGate::new(0.7);
        let bundle = product(ProductKind::Bundle, 0.9);

        let first = gate.assess(&bundle, EscalationStage::Initial);
        assert_eq!(first.state, GateState::NeedsDetail);

        let second = gate.assess(&bundle, EscalationStage::AfterDetail);
        assert_eq!(second.state, GateState::Skipped);
        assert_eq!(
            second.reason.as_deref(),
            Some("bundle_components_empty_after_detail_scraping")
        );
    }

    #[test]
    fn resolved_bundle_is_accepted() {
        let gate = DecisionGate::new(0.7);
        let mut bundle = product(ProductKind::Bundle, 0.9);
        bundle.components.push(BundleComponent {
            name: "Nintendo Switch".to_string(),
            quantity: 1,
        });
        let decision = gate.assess(&bundle, EscalationStage::Initial);
        assert_eq!(decision.state, GateState::Accepted);
    }

    #[test]
    fn low_confidence_escalates_tier_by_tier_never_skipping_one() {
        let gate = DecisionGate::new(0.7);
        let p = product(ProductKind::Single, 0.4);

        assert_eq!(
            gate.assess(&p, EscalationStage::Initial).state,
            GateState::NeedsDetail
        );
        assert_eq!(
            gate.assess(&p, EscalationStage::AfterDetail).state,
            GateState::NeedsVision
        );
        let last = gate.assess(&p, EscalationStage::AfterVision);
        assert_eq!(last.state, GateState::Skipped);
        assert_eq!(last.reason.as_deref(), Some("low_confidence_after_vision"));
    }

    #[test]
    fn failed_extraction_skips_with_its_recorded_reason() {
        let gate = DecisionGate::new(0.7);
        let p = ExtractedProduct::failed("l9", "batch_parse_failed");
        let decision = gate.assess(&p, EscalationStage::Initial);
        assert_eq!(decision.state, GateState::Skipped);
        assert_eq!(decision.reason.as_deref(), Some("batch_parse_failed"));
    }
}
