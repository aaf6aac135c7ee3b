//! Budget governor and cost ledger.
//!
//! Every metered call (extraction batch, web search, vision, estimate) must
//! reserve spend here before dispatch and settle or refund afterwards.
//! Reservation is atomic, so concurrent in-flight calls cannot jointly
//! exceed the ceiling. The governor is the sole mutator of the ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use bidscout_common::{BidscoutError, LedgerEntry, MeteredStep};

/// Estimated cost per operation in cents, rounded up. Used for the
/// pre-flight reservation; the lease is settled with actuals afterwards.
pub struct OperationCost;

impl OperationCost {
    pub const EXTRACTION_BATCH: u64 = 2; // per sub-batch call
    pub const DETAIL_EXTRACTION: u64 = 1; // single-item re-extraction
    pub const WEB_SEARCH: u64 = 3; // per lookup, up to 3 searches
    pub const VISION: u64 = 2; // image tokens dominate
    pub const AI_ESTIMATE: u64 = 1;
}

pub struct BudgetGovernor {
    /// Per-run ceiling in cents. 0 = unlimited.
    ceiling_cents: u64,
    /// Cumulative spend including outstanding reservations.
    spent_cents: AtomicU64,
    retries_permitted: bool,
    ledger: Mutex<HashMap<MeteredStep, LedgerEntry>>,
}

/// An approved reservation for one in-flight call. Must be resolved:
/// `settle` once the call was attempted (the provider charges for attempted
/// work, success or not), `refund` only if the call was never issued.
#[must_use = "a lease must be settled or refunded"]
pub struct BudgetLease<'a> {
    governor: &'a BudgetGovernor,
    step: MeteredStep,
    reserved_cents: u64,
}

impl BudgetGovernor {
    pub fn new(ceiling_cents: u64, retries_permitted: bool) -> Self {
        Self {
            ceiling_cents,
            spent_cents: AtomicU64::new(0),
            retries_permitted,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-flight check: atomically reserve `estimated_cents` against the
    /// ceiling. Denial is a hard stop for that call — callers fall through
    /// to a cheaper tier or an explicit skip, never an exception that
    /// aborts the run.
    pub fn reserve(
        &self,
        step: MeteredStep,
        estimated_cents: u64,
    ) -> Result<BudgetLease<'_>, BidscoutError> {
        let cost = estimated_cents.max(1);
        let prev = self.spent_cents.fetch_add(cost, Ordering::SeqCst);

        if self.ceiling_cents > 0 && prev + cost > self.ceiling_cents {
            self.spent_cents.fetch_sub(cost, Ordering::SeqCst);
            let remaining = self.ceiling_cents.saturating_sub(prev);
            warn!(
                step = %step,
                requested_cents = cost,
                remaining_cents = remaining,
                "Budget denied"
            );
            return Err(BidscoutError::BudgetExceeded {
                requested_cents: cost,
                remaining_cents: remaining,
            });
        }

        Ok(BudgetLease {
            governor: self,
            step,
            reserved_cents: cost,
        })
    }

    /// Whether another attempt of a logical operation is allowed.
    /// Attempt 0 is the initial call; attempt 1 is the single permitted
    /// retry (only when the execution mode allows retries); anything
    /// beyond that is never allowed.
    pub fn retry_allowed(&self, attempt: u32) -> bool {
        match attempt {
            0 => true,
            1 => self.retries_permitted,
            _ => false,
        }
    }

    pub fn total_spent_cents(&self) -> u64 {
        self.spent_cents.load(Ordering::SeqCst)
    }

    /// Remaining budget (u64::MAX if unlimited).
    pub fn remaining_cents(&self) -> u64 {
        if self.ceiling_cents == 0 {
            return u64::MAX;
        }
        self.ceiling_cents
            .saturating_sub(self.spent_cents.load(Ordering::SeqCst))
    }

    pub fn is_limited(&self) -> bool {
        self.ceiling_cents > 0
    }

    /// Ledger snapshot, ordered by step.
    pub fn ledger(&self) -> Vec<LedgerEntry> {
        let ledger = self.ledger.lock().expect("ledger lock poisoned");
        let mut entries: Vec<LedgerEntry> = ledger.values().cloned().collect();
        entries.sort_by_key(|e| e.step);
        entries
    }

    pub fn log_status(&self) {
        if self.is_limited() {
            info!(
                spent_cents = self.total_spent_cents(),
                remaining_cents = self.remaining_cents(),
                ceiling_cents = self.ceiling_cents,
                "Budget status"
            );
        }
    }

    fn record(&self, step: MeteredStep, actual_cents: u64) {
        let mut ledger = self.ledger.lock().expect("ledger lock poisoned");
        let entry = ledger.entry(step).or_insert(LedgerEntry {
            step,
            calls: 0,
            usd_cents: 0,
        });
        entry.calls += 1;
        entry.usd_cents += actual_cents;
    }
}

impl BudgetLease<'_> {
    /// The call was attempted: replace the reservation with the actual cost
    /// and append to the ledger. Actuals above the reservation are recorded
    /// even if they land past the ceiling — the money is already spent.
    pub fn settle(self, actual_cents: u64) {
        let actual = actual_cents.max(1);
        if actual >= self.reserved_cents {
            let over = actual - self.reserved_cents;
            let total = self.governor.spent_cents.fetch_add(over, Ordering::SeqCst) + over;
            if self.governor.ceiling_cents > 0 && total > self.governor.ceiling_cents {
                warn!(
                    step = %self.step,
                    spent_cents = total,
                    ceiling_cents = self.governor.ceiling_cents,
                    "Actual cost pushed spend past the ceiling"
                );
            }
        } else {
            self.governor
                .spent_cents
                .fetch_sub(self.reserved_cents - actual, Ordering::SeqCst);
        }
        self.governor.record(self.step, actual);
    }

    /// The call was never issued: release the reservation. Nothing hits
    /// the ledger.
    pub fn refund(self) {
        self.governor
            .spent_cents
            .fetch_sub(self.reserved_cents, Ordering::SeqCst);
    }

    pub fn reserved_cents(&self) -> u64 {
        self.reserved_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_budget_always_reserves() {
        let governor = BudgetGovernor::new(0, true);
        let lease = governor.reserve(MeteredStep::Extraction, 1000).unwrap();
        lease.settle(1000);
        assert!(!governor.is_limited());
        assert_eq!(governor.total_spent_cents(), 1000);
    }

    #[test]
    fn spend_never_exceeds_ceiling_through_reservations() {
        let governor = BudgetGovernor::new(100, true);
        let a = governor.reserve(MeteredStep::Extraction, 60).unwrap();
        // Second reservation would jointly exceed the ceiling.
        assert!(governor.reserve(MeteredStep::WebSearch, 60).is_err());
        a.settle(60);
        assert_eq!(governor.total_spent_cents(), 60);
        assert_eq!(governor.remaining_cents(), 40);
    }

    #[test]
    fn no_call_after_denial_without_recheck() {
        let governor = BudgetGovernor::new(10, true);
        governor.reserve(MeteredStep::Extraction, 8).unwrap().settle(8);
        assert!(governor.reserve(MeteredStep::Extraction, 5).is_err());
        // A cheaper re-check may still pass — the denial was per-call.
        let lease = governor.reserve(MeteredStep::AiEstimate, 2).unwrap();
        lease.settle(2);
        assert_eq!(governor.total_spent_cents(), 10);
    }

    #[test]
    fn refund_releases_the_reservation() {
        let governor = BudgetGovernor::new(10, true);
        let lease = governor.reserve(MeteredStep::WebSearch, 8).unwrap();
        lease.refund();
        assert_eq!(governor.total_spent_cents(), 0);
        assert!(governor.ledger().is_empty());
        assert!(governor.reserve(MeteredStep::WebSearch, 8).is_ok());
    }

    #[test]
    fn settle_with_lower_actual_returns_the_difference() {
        let governor = BudgetGovernor::new(10, true);
        let lease = governor.reserve(MeteredStep::Vision, 5).unwrap();
        lease.settle(2);
        assert_eq!(governor.total_spent_cents(), 2);
        assert_eq!(governor.remaining_cents(), 8);
    }

    #[test]
    fn ledger_tracks_calls_and_cents_per_step() {
        let governor = BudgetGovernor::new(0, true);
        governor.reserve(MeteredStep::Extraction, 2).unwrap().settle(2);
        governor.reserve(MeteredStep::Extraction, 2).unwrap().settle(3);
        governor.reserve(MeteredStep::WebSearch, 3).unwrap().settle(3);

        let ledger = governor.ledger();
        assert_eq!(ledger.len(), 2);
        let extraction = ledger
            .iter()
            .find(|e| e.step == MeteredStep::Extraction)
            .unwrap();
        assert_eq!(extraction.calls, 2);
        assert_eq!(extraction.usd_cents, 5);
    }

    #[test]
    fn retry_ceiling_is_one_and_mode_gated() {
        let governor = BudgetGovernor::new(0, true);
        assert!(governor.retry_allowed(0));
        assert!(governor.retry_allowed(1));
        assert!(!governor.retry_allowed(2));

        let no_retries = BudgetGovernor::new(0, false);
        assert!(no_retries.retry_allowed(0));
        assert!(!no_retries.retry_allowed(1));
    }
}
