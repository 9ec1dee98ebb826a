//! Per-run context.
//!
//! Everything a batch run shares is held here and passed down explicitly:
//! the platform client handle, the as-of date, the dry-run switch and the
//! void-status memo. Nothing is kept in module-level state between runs.

use crate::{accounting::AccountingClient, config::EngineConfig, error::InterestResult};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

pub struct RunContext<'a> {
    pub client:  &'a mut dyn AccountingClient,
    pub engine:  &'a EngineConfig,
    pub as_of:   NaiveDate,
    /// Timestamp stamped on every ledger entry of this run.
    pub now:     DateTime<Utc>,
    pub dry_run: bool,
    void_cache:  HashMap<String, bool>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        client: &'a mut dyn AccountingClient,
        engine: &'a EngineConfig,
        as_of: NaiveDate,
        dry_run: bool,
    ) -> Self {
        Self {
            client,
            engine,
            as_of,
            now: Utc::now(),
            dry_run,
            void_cache: HashMap::new(),
        }
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Void status of an interest invoice, asked of the platform at most once
    /// per run.
    pub fn is_interest_invoice_voided(&mut self, invoice_id: &str) -> InterestResult<bool> {
        if let Some(&voided) = self.void_cache.get(invoice_id) {
            return Ok(voided);
        }
        let voided = self.client.is_voided(invoice_id)?;
        self.void_cache.insert(invoice_id.to_string(), voided);
        Ok(voided)
    }

    /// Forget a cached status after this run changed the invoice itself.
    pub fn forget_void_status(&mut self, invoice_id: &str) {
        self.void_cache.remove(invoice_id);
    }

    pub fn void_lookups_cached(&self) -> usize {
        self.void_cache.len()
    }
}
