use thiserror::Error;

#[derive(Error, Debug)]
pub enum BidscoutError {
    /// Malformed structured output. Recorded on the item, retried at most once.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// The governor denied further spend. A hard stop for the call, never
    /// a run-fatal exception — callers fall through to a cheaper tier or skip.
    #[error("budget exceeded: requested {requested_cents} cents, {remaining_cents} remaining")]
    BudgetExceeded {
        requested_cents: u64,
        remaining_cents: u64,
    },

    /// Normalization could not produce a stable key. The listing prices as a
    /// singleton market, never silently merged into another identity.
    #[error("identity ambiguous for title: {0}")]
    IdentityAmbiguous(String),

    /// A sanity cap was breached. Forces a skip, never a clamp-and-present.
    #[error("unrealistic estimate: {0}")]
    UnrealisticEstimate(String),

    /// Fewer than the minimum samples for a pricing tier. Falls through.
    #[error("insufficient evidence: {0}")]
    InsufficientEvidence(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
