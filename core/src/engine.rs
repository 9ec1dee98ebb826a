//! The batch engine: one pass over every active client.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Load active client configs from the ledger store.
//!   2. For each config, in store order: validate, then reconcile in the
//!      client's billing mode (running or monthly).
//!   3. Live runs stamp the config's last-run bookkeeping.
//!
//! RULES:
//!   - One client at a time, one invoice at a time. Two engines must never
//!     run against the same ledger concurrently: the read-then-append of
//!     ledger deltas is not isolated.
//!   - A client's failure is recorded on its report and the run moves on.
//!     Only fatal errors (auth, unreachable) stop the run.
//!   - All runs of one batch share a single `RunContext`.

use crate::{
    accounting::AccountingClient,
    config::{BillingMode, EngineConfig, InterestConfig},
    context::RunContext,
    error::{InterestError, InterestResult},
    ledger::LedgerStore,
    monthly::run_monthly,
    reconcile::{run_reconciliation, ReconciliationSummary},
};
use chrono::NaiveDate;
use serde::Serialize;

/// What happened to one client during a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRunReport {
    pub config_id:    String,
    pub contact_id:   String,
    pub contact_name: String,
    pub mode:         BillingMode,
    pub summary:      Option<ReconciliationSummary>,
    pub error:        Option<String>,
}

impl ClientRunReport {
    fn new(config: &InterestConfig) -> Self {
        Self {
            config_id: config.config_id.clone(),
            contact_id: config.contact_id.clone(),
            contact_name: config.contact_name.clone(),
            mode: config.mode,
            summary: None,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct InterestEngine<'s, L: LedgerStore> {
    ledger: &'s L,
    config: EngineConfig,
}

impl<'s, L: LedgerStore> InterestEngine<'s, L> {
    pub fn new(ledger: &'s L, config: EngineConfig) -> Self {
        Self { ledger, config }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconcile every active client as of `as_of`.
    pub fn run(
        &self,
        client: &mut dyn AccountingClient,
        as_of: NaiveDate,
        dry_run: bool,
    ) -> InterestResult<Vec<ClientRunReport>> {
        let mut ctx = RunContext::new(client, &self.config, as_of, dry_run);
        self.run_with(&mut ctx)
    }

    /// Same as `run`, with a caller-built context (fixed timestamps in tests).
    pub fn run_with(&self, ctx: &mut RunContext<'_>) -> InterestResult<Vec<ClientRunReport>> {
        let configs = self.ledger.active_configs()?;
        log::info!(
            "interest run as of {} over {} clients{}",
            ctx.as_of,
            configs.len(),
            if ctx.dry_run { " (dry run)" } else { "" }
        );

        let mut reports = Vec::with_capacity(configs.len());
        for config in &configs {
            let mut report = ClientRunReport::new(config);
            match self.run_client(ctx, config) {
                Ok(summary) => {
                    if !ctx.dry_run {
                        if let Err(e) = self.ledger.update_config_last_run(
                            &config.config_id,
                            ctx.now,
                            summary.last_invoice_id(),
                        ) {
                            log::warn!("{}: last-run bookkeeping failed: {e}", config.contact_name);
                            report.error = Some(e.to_string());
                        }
                    }
                    report.summary = Some(summary);
                }
                Err(e) if e.is_fatal() => {
                    log::error!("{}: run aborted: {e}", config.contact_name);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("{}: skipped: {e}", config.contact_name);
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        log::info!(
            "interest run done: {} ok, {} failed, {} void lookups",
            reports.iter().filter(|r| r.is_ok()).count(),
            reports.iter().filter(|r| !r.is_ok()).count(),
            ctx.void_lookups_cached()
        );
        Ok(reports)
    }

    /// Reconcile one client in its billing mode.
    pub fn run_client(
        &self,
        ctx: &mut RunContext<'_>,
        config: &InterestConfig,
    ) -> InterestResult<ReconciliationSummary> {
        config.validate().map_err(InterestError::Config)?;
        match config.mode {
            BillingMode::Running => run_reconciliation(ctx, self.ledger, config),
            BillingMode::Monthly => run_monthly(ctx, self.ledger, config),
        }
    }
}
