//! Postgres-backed market store.
//!
//! Three tables, keyed by the canonical search identity:
//!
//! ```sql
//! CREATE TABLE learned_market (
//!     identity     TEXT PRIMARY KEY,
//!     median_price DOUBLE PRECISION NOT NULL,
//!     sample_size  INTEGER NOT NULL,
//!     new_price    DOUBLE PRECISION,
//!     updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE deal_outcome (
//!     id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     run_id      UUID NOT NULL,
//!     listing_id  TEXT NOT NULL,
//!     state       TEXT NOT NULL,
//!     reason      TEXT NOT NULL,
//!     evaluation  JSONB,
//!     created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE cost_ledger (
//!     run_id     UUID NOT NULL,
//!     step       TEXT NOT NULL,
//!     calls      INTEGER NOT NULL,
//!     usd_cents  BIGINT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     PRIMARY KEY (run_id, step)
//! );
//! ```
//!
//! Schema is applied by the operator; migrations are outside this crate.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use bidscout_common::{LearnedMarket, LedgerEntry, ListingOutcome, SearchIdentity};

#[derive(Clone)]
pub struct PgMarketStore {
    pool: PgPool,
}

impl PgMarketStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("Connected to Postgres market store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Prior learned-market aggregate for an identity, if any.
    pub async fn learned_market(
        &self,
        identity: &SearchIdentity,
    ) -> Result<Option<LearnedMarket>> {
        let row = sqlx::query(
            "SELECT identity, median_price, sample_size, new_price, updated_at
             FROM learned_market WHERE identity = $1",
        )
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| LearnedMarket {
            identity: row.get("identity"),
            median_price: row.get("median_price"),
            sample_size: row.get::<i32, _>("sample_size") as u32,
            new_price: row.get("new_price"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        }))
    }

    /// Upsert a learned-market aggregate after a run observed new outcomes.
    pub async fn upsert_learned_market(&self, learned: &LearnedMarket) -> Result<()> {
        sqlx::query(
            "INSERT INTO learned_market (identity, median_price, sample_size, new_price, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (identity)
             DO UPDATE SET median_price = EXCLUDED.median_price,
                          sample_size = EXCLUDED.sample_size,
                          new_price = EXCLUDED.new_price,
                          updated_at = EXCLUDED.updated_at",
        )
        .bind(&learned.identity)
        .bind(learned.median_price)
        .bind(learned.sample_size as i32)
        .bind(learned.new_price)
        .bind(learned.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write per-listing outcomes for audit.
    pub async fn write_outcomes(&self, run_id: &str, outcomes: &[ListingOutcome]) -> Result<()> {
        let run_uuid = Uuid::parse_str(run_id)?;
        for outcome in outcomes {
            let evaluation = outcome
                .evaluation
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?;
            sqlx::query(
                "INSERT INTO deal_outcome (run_id, listing_id, state, reason, evaluation)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(run_uuid)
            .bind(&outcome.listing_id)
            .bind(state_str(outcome))
            .bind(&outcome.reason)
            .bind(evaluation)
            .execute(&self.pool)
            .await?;
        }
        info!(run_id, count = outcomes.len(), "Outcomes written");
        Ok(())
    }

    /// Write the run's cost-ledger summary.
    pub async fn write_ledger(&self, run_id: &str, entries: &[LedgerEntry]) -> Result<()> {
        let run_uuid = Uuid::parse_str(run_id)?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO cost_ledger (run_id, step, calls, usd_cents)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (run_id, step)
                 DO UPDATE SET calls = EXCLUDED.calls, usd_cents = EXCLUDED.usd_cents",
            )
            .bind(run_uuid)
            .bind(entry.step.to_string())
            .bind(entry.calls as i32)
            .bind(entry.usd_cents as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

fn state_str(outcome: &ListingOutcome) -> &'static str {
    match outcome.state {
        bidscout_common::OutcomeState::Accepted => "accepted",
        bidscout_common::OutcomeState::Skipped => "skipped",
    }
}
