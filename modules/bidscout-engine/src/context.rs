//! Run-scoped mutable state, owned explicitly and passed by reference.
//! One ledger and one cache per run — injected, never a hidden singleton.

use uuid::Uuid;

use bidscout_common::RunConfig;

use crate::budget::BudgetGovernor;
use crate::cache::RunCache;

pub struct RunContext {
    pub run_id: Uuid,
    pub config: RunConfig,
    pub governor: BudgetGovernor,
    pub cache: RunCache,
}

impl RunContext {
    pub fn new(config: RunConfig) -> Self {
        let governor = BudgetGovernor::new(config.spend_ceiling_cents, config.retries_permitted());
        Self {
            run_id: Uuid::new_v4(),
            config,
            governor,
            cache: RunCache::new(),
        }
    }
}
