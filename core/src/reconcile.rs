//! Reconciliation engine, running-total mode.
//!
//! Per overdue invoice of a client: compute what should be owed with the
//! timeline calculator, read what has already been charged from the ledger,
//! classify the difference. A live run realizes the net change on one
//! consolidated interest invoice and appends one ledger entry per changed
//! source invoice.
//!
//! RULES:
//!   - The charged amount is only ever the sum of ledger deltas.
//!   - |delta| < 0.01 is NoChange: no entry, no mutation.
//!   - A failure on one invoice is recorded on its result and the batch
//!     continues. Only fatal errors (auth, unreachable) abort.

use crate::{
    accounting::{CreatedDocument, InterestInvoiceRef},
    config::{BillingMode, EngineConfig, InterestConfig},
    context::RunContext,
    dates::add_days,
    error::{InterestError, InterestResult},
    invoice::{LineItem, SourceInvoice},
    ledger::{InterestLedgerEntry, LedgerAction, LedgerStore, PeriodKey, ReasonCode},
    money::{is_negligible, round_money, sum_money},
    orchestrator::{self, AppliedChange, ChangeOutcome, ChangeRequest},
    timeline::compute_timeline_interest,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Result types ──────────────────────────────────────────────────

/// Corrective action decided for one (source invoice, period).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    NoChange,
    Created,
    Updated,
    Credited,
    AdditionalCharge,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::NoChange         => "no_change",
            ReconcileAction::Created          => "created",
            ReconcileAction::Updated          => "updated",
            ReconcileAction::Credited         => "credited",
            ReconcileAction::AdditionalCharge => "additional_charge",
        }
    }

    /// Ledger action recorded for this outcome. `None` for NoChange.
    pub fn ledger_action(&self) -> Option<LedgerAction> {
        match self {
            ReconcileAction::NoChange         => None,
            ReconcileAction::Created          => Some(LedgerAction::Created),
            ReconcileAction::Updated          => Some(LedgerAction::Updated),
            ReconcileAction::Credited         => Some(LedgerAction::Credited),
            ReconcileAction::AdditionalCharge => Some(LedgerAction::AdditionalCharge),
        }
    }

    pub fn is_change(&self) -> bool {
        *self != ReconcileAction::NoChange
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceReconciliation {
    pub source_invoice_id:     String,
    pub source_invoice_number: String,
    pub period:                PeriodKey,
    pub should_owe:            f64,
    pub previously_charged:    f64,
    pub delta:                 f64,
    pub action:                ReconcileAction,
    pub reason:                ReasonCode,
    pub days_overdue:          i64,
    pub source_due_date:       Option<NaiveDate>,
    pub source_amount_due:     f64,
    pub error:                 Option<String>,
}

impl InvoiceReconciliation {
    /// Result for an invoice that could not be evaluated. What was charged
    /// stays charged.
    pub fn failed(
        source_invoice_id: &str,
        source_invoice_number: &str,
        period: PeriodKey,
        previously_charged: f64,
        error: &InterestError,
    ) -> Self {
        Self {
            source_invoice_id: source_invoice_id.to_string(),
            source_invoice_number: source_invoice_number.to_string(),
            period,
            should_owe: previously_charged,
            previously_charged,
            delta: 0.0,
            action: ReconcileAction::NoChange,
            reason: ReasonCode::DailyAccrual,
            days_overdue: 0,
            source_due_date: None,
            source_amount_due: 0.0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of reconciling one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationSummary {
    pub contact_id:               String,
    pub contact_name:             String,
    pub mode:                     BillingMode,
    pub as_of:                    NaiveDate,
    pub dry_run:                  bool,
    pub results:                  Vec<InvoiceReconciliation>,
    pub total_should_owe:         f64,
    pub total_previously_charged: f64,
    pub net_change:               f64,
    pub applied:                  Vec<AppliedChange>,
    pub credit_notes:             Vec<CreatedDocument>,
    pub created_invoices:         Vec<CreatedDocument>,
    pub entries_written:          usize,
    pub errors:                   Vec<String>,
}

impl ReconciliationSummary {
    pub fn new(config: &InterestConfig, mode: BillingMode, as_of: NaiveDate, dry_run: bool) -> Self {
        Self {
            contact_id: config.contact_id.clone(),
            contact_name: config.contact_name.clone(),
            mode,
            as_of,
            dry_run,
            results: Vec::new(),
            total_should_owe: 0.0,
            total_previously_charged: 0.0,
            net_change: 0.0,
            applied: Vec::new(),
            credit_notes: Vec::new(),
            created_invoices: Vec::new(),
            entries_written: 0,
            errors: Vec::new(),
        }
    }

    pub fn changed(&self) -> impl Iterator<Item = &InvoiceReconciliation> {
        self.results.iter().filter(|r| r.action.is_change())
    }

    /// Invoice carrying the most recently applied change.
    pub fn last_invoice_id(&self) -> Option<&str> {
        self.applied.last().map(|a| a.invoice_id.as_str())
    }

    pub(crate) fn finish_totals(&mut self) {
        self.total_should_owe = sum_money(self.results.iter().map(|r| r.should_owe));
        self.total_previously_charged = sum_money(self.results.iter().map(|r| r.previously_charged));
        self.net_change = sum_money(self.changed().map(|r| r.delta));
    }
}

// ── Classification ────────────────────────────────────────────────

/// Why the charge moved, checked in priority order against the last entry.
///
/// A cancelled source is reported before the amount checks: voiding an
/// invoice also changes its amount due.
pub fn classify_reason(invoice: &SourceInvoice, latest: Option<&InterestLedgerEntry>) -> ReasonCode {
    let Some(last) = latest else {
        return ReasonCode::Initial;
    };
    if invoice.status.is_cancelled() {
        return ReasonCode::SourceVoided;
    }
    if invoice.due_date != last.source_due_date {
        return ReasonCode::DueDateChanged;
    }
    let change = round_money(invoice.amount_due - last.source_amount_due);
    if is_negligible(change) {
        ReasonCode::DailyAccrual
    } else if change < 0.0 {
        ReasonCode::PartialPayment
    } else {
        ReasonCode::PrincipalChanged
    }
}

pub fn classify_action(should_owe: f64, previously_charged: f64, delta: f64) -> ReconcileAction {
    if is_negligible(delta) {
        ReconcileAction::NoChange
    } else if delta > 0.0 {
        if is_negligible(previously_charged) {
            ReconcileAction::Created
        } else {
            ReconcileAction::Updated
        }
    } else if is_negligible(should_owe) {
        ReconcileAction::Credited
    } else {
        ReconcileAction::Updated
    }
}

/// Interest owed on `invoice` under the running model, after the
/// minimum-charge floor. Cancelled and settled sources owe nothing: interest
/// is only collected while the principal is outstanding.
pub fn running_should_owe(invoice: &SourceInvoice, config: &InterestConfig, as_of: NaiveDate) -> f64 {
    if invoice.status.is_cancelled() || invoice.is_settled() {
        return 0.0;
    }
    let timeline = compute_timeline_interest(invoice, &config.rate(), as_of);
    config.chargeable(timeline.total_interest)
}

/// Pure comparison of an owed amount against what the ledger says was charged.
pub(crate) fn evaluate(
    invoice: &SourceInvoice,
    period: PeriodKey,
    should_owe: f64,
    latest: Option<&InterestLedgerEntry>,
    previously_charged: f64,
    as_of: NaiveDate,
) -> InvoiceReconciliation {
    let should_owe = round_money(should_owe);
    let previously_charged = round_money(previously_charged);
    let delta = round_money(should_owe - previously_charged);
    InvoiceReconciliation {
        source_invoice_id: invoice.id.clone(),
        source_invoice_number: invoice.number.clone(),
        period,
        should_owe,
        previously_charged,
        delta,
        action: classify_action(should_owe, previously_charged, delta),
        reason: classify_reason(invoice, latest),
        days_overdue: invoice.days_overdue(as_of),
        source_due_date: Some(invoice.due_date),
        source_amount_due: invoice.amount_due,
        error: None,
    }
}

/// Running-mode evaluation of one invoice given its ledger state.
pub fn evaluate_invoice(
    invoice: &SourceInvoice,
    config: &InterestConfig,
    latest: Option<&InterestLedgerEntry>,
    previously_charged: f64,
    as_of: NaiveDate,
) -> InvoiceReconciliation {
    let should_owe = running_should_owe(invoice, config, as_of);
    evaluate(invoice, PeriodKey::Running, should_owe, latest, previously_charged, as_of)
}

// ── Ledger entries ────────────────────────────────────────────────

/// Interest document an entry is booked against.
pub(crate) struct EntryTarget<'a> {
    pub invoice_id:     &'a str,
    pub invoice_number: &'a str,
    pub credit_note:    Option<&'a CreatedDocument>,
}

pub(crate) fn entry_for(
    result: &InvoiceReconciliation,
    invoice: &SourceInvoice,
    config: &InterestConfig,
    target: &EntryTarget<'_>,
    action: LedgerAction,
    now: DateTime<Utc>,
) -> InterestLedgerEntry {
    InterestLedgerEntry {
        id: None,
        source_invoice_id: invoice.id.clone(),
        source_invoice_number: invoice.number.clone(),
        interest_invoice_id: target.invoice_id.to_string(),
        interest_invoice_number: target.invoice_number.to_string(),
        period: result.period.clone(),
        action,
        previous_amount: result.previously_charged,
        new_amount: result.should_owe,
        delta: result.delta,
        reason: result.reason,
        source_due_date: invoice.due_date,
        source_amount_due: invoice.amount_due,
        days_overdue: result.days_overdue,
        annual_rate: config.annual_rate,
        credit_note_id: target.credit_note.map(|c| c.id.clone()),
        credit_note_number: target.credit_note.map(|c| c.number.clone()),
        contact_id: config.contact_id.clone(),
        contact_name: config.contact_name.clone(),
        created_at: now,
        notes: None,
    }
}

/// Entry zeroing a charge whose interest invoice was voided on the platform.
fn void_reset_entry(
    last: &InterestLedgerEntry,
    invoice: &SourceInvoice,
    config: &InterestConfig,
    period: &PeriodKey,
    charged: f64,
    ctx: &RunContext<'_>,
) -> InterestLedgerEntry {
    InterestLedgerEntry {
        id: None,
        source_invoice_id: invoice.id.clone(),
        source_invoice_number: invoice.number.clone(),
        interest_invoice_id: last.interest_invoice_id.clone(),
        interest_invoice_number: last.interest_invoice_number.clone(),
        period: period.clone(),
        action: LedgerAction::Credited,
        previous_amount: charged,
        new_amount: 0.0,
        delta: round_money(-charged),
        reason: ReasonCode::ManualAdjustment,
        source_due_date: invoice.due_date,
        source_amount_due: invoice.amount_due,
        days_overdue: invoice.days_overdue(ctx.as_of),
        annual_rate: config.annual_rate,
        credit_note_id: None,
        credit_note_number: None,
        contact_id: config.contact_id.clone(),
        contact_name: config.contact_name.clone(),
        created_at: ctx.now,
        notes: Some(format!(
            "interest invoice {} was voided outside the engine; charge reset",
            last.interest_invoice_number
        )),
    }
}

// ── Single invoice ────────────────────────────────────────────────

/// Reconcile one invoice against the ledger and append an entry when the
/// charge moved. Failures land in the result's `error` field.
pub fn reconcile_invoice(
    ledger: &dyn LedgerStore,
    invoice: &SourceInvoice,
    config: &InterestConfig,
    interest_invoice: &InterestInvoiceRef,
    as_of: NaiveDate,
    now: DateTime<Utc>,
) -> InvoiceReconciliation {
    let attempt = || -> InterestResult<InvoiceReconciliation> {
        let latest = ledger.latest_entry_for_invoice(&invoice.id, None)?;
        let charged = ledger.sum_deltas_for_invoice(&invoice.id, None)?;
        let result = evaluate_invoice(invoice, config, latest.as_ref(), charged, as_of);
        if let Some(action) = result.action.ledger_action() {
            let target = EntryTarget {
                invoice_id: &interest_invoice.id,
                invoice_number: &interest_invoice.number,
                credit_note: None,
            };
            ledger.create_entry(&entry_for(&result, invoice, config, &target, action, now))?;
        }
        Ok(result)
    };
    attempt().unwrap_or_else(|e| {
        log::warn!("reconciling {} failed: {e}", invoice.number);
        let charged = ledger.sum_deltas_for_invoice(&invoice.id, None).unwrap_or(0.0);
        InvoiceReconciliation::failed(&invoice.id, &invoice.number, PeriodKey::Running, charged, &e)
    })
}

// ── Batch ─────────────────────────────────────────────────────────

/// An invoice evaluated against the ledger, ready to commit.
pub(crate) struct Evaluated {
    pub invoice: SourceInvoice,
    pub result:  InvoiceReconciliation,
    /// Reset for a charge on an interest invoice voided out of band.
    pub reset:   Option<InterestLedgerEntry>,
}

/// Whether the interest invoice behind `last` has been voided. Lookup
/// failures other than fatal ones count as "not voided".
fn interest_invoice_voided(ctx: &mut RunContext<'_>, last: &InterestLedgerEntry) -> InterestResult<bool> {
    if last.interest_invoice_id.is_empty() {
        return Ok(false);
    }
    match ctx.is_interest_invoice_voided(&last.interest_invoice_id) {
        Ok(voided) => Ok(voided),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log::warn!(
                "could not verify interest invoice {}: {e}; assuming it stands",
                last.interest_invoice_number
            );
            Ok(false)
        }
    }
}

/// Read the ledger state of `(invoice, period)`, self-heal against a voided
/// interest invoice and compare with `should_owe`.
///
/// `ledger_period = None` reads across every period.
pub(crate) fn evaluate_against_ledger(
    ctx: &mut RunContext<'_>,
    ledger: &dyn LedgerStore,
    config: &InterestConfig,
    invoice: SourceInvoice,
    period: &PeriodKey,
    ledger_period: Option<&PeriodKey>,
    should_owe: f64,
) -> InterestResult<Evaluated> {
    let latest = ledger.latest_entry_for_invoice(&invoice.id, ledger_period)?;
    let mut charged = ledger.sum_deltas_for_invoice(&invoice.id, ledger_period)?;

    let mut reset = None;
    if let Some(last) = latest.as_ref().filter(|_| !is_negligible(charged)) {
        if interest_invoice_voided(ctx, last)? {
            log::info!(
                "{}: interest invoice {} voided out of band, resetting {charged:.2}",
                invoice.number,
                last.interest_invoice_number
            );
            reset = Some(void_reset_entry(last, &invoice, config, period, charged, ctx));
            charged = 0.0;
        }
    }

    let result = evaluate(&invoice, period.clone(), should_owe, latest.as_ref(), charged, ctx.as_of);
    Ok(Evaluated { invoice, result, reset })
}

/// Full line set for an interest invoice: one line per source invoice that
/// owes interest. Failed invoices keep their current charge.
pub(crate) fn interest_lines(
    evaluated: &[Evaluated],
    failed: &[InvoiceReconciliation],
    config: &InterestConfig,
    engine: &EngineConfig,
) -> Vec<LineItem> {
    let line = |description: String, amount: f64, source: &str| LineItem {
        description,
        quantity: 1.0,
        unit_amount: amount,
        account_code: engine.account_code.clone(),
        source_invoice_id: Some(source.to_string()),
    };
    let owed = evaluated
        .iter()
        .filter(|e| e.result.should_owe > 0.0)
        .map(|e| {
            line(
                format!(
                    "Interest on overdue invoice {} ({} days overdue at {:.2}% p.a.)",
                    e.invoice.number, e.result.days_overdue, config.annual_rate
                ),
                e.result.should_owe,
                &e.invoice.id,
            )
        });
    let carried = failed.iter().filter(|f| f.previously_charged > 0.0).map(|f| {
        line(
            format!("Interest on overdue invoice {} (carried forward)", f.source_invoice_number),
            f.previously_charged,
            &f.source_invoice_id,
        )
    });
    owed.chain(carried).collect()
}

/// Append pending void resets. Live mode only.
pub(crate) fn write_resets(
    ledger: &dyn LedgerStore,
    evaluated: &mut [Evaluated],
    summary: &mut ReconciliationSummary,
) -> InterestResult<()> {
    for e in evaluated.iter_mut() {
        if let Some(reset) = e.reset.take() {
            ledger.create_entry(&reset)?;
            summary.entries_written += 1;
        }
    }
    Ok(())
}

/// One period's worth of changes to realize.
pub(crate) struct PeriodCommit<'a> {
    pub period:       &'a PeriodKey,
    pub evaluated:    &'a [Evaluated],
    pub failed:       &'a [InvoiceReconciliation],
    pub invoice_date: NaiveDate,
    pub due_date:     NaiveDate,
    pub reauthorize:  bool,
}

/// Realize a period's net change on the platform and append ledger entries
/// for every changed invoice. Non-fatal platform failures are recorded on
/// the summary and leave the ledger untouched.
pub(crate) fn commit_period(
    ctx: &mut RunContext<'_>,
    ledger: &dyn LedgerStore,
    config: &InterestConfig,
    commit: &PeriodCommit<'_>,
    summary: &mut ReconciliationSummary,
) -> InterestResult<()> {
    let changed: Vec<&Evaluated> = commit
        .evaluated
        .iter()
        .filter(|e| e.result.action.is_change())
        .collect();
    if changed.is_empty() {
        log::debug!("{} {}: nothing to change", config.contact_name, commit.period);
        return Ok(());
    }

    let target = match orchestrator::get_or_create_interest_invoice(
        ctx,
        config,
        commit.period,
        commit.invoice_date,
        commit.due_date,
    ) {
        Ok(t) => t,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            log::warn!("{} {}: interest invoice unavailable: {e}", config.contact_name, commit.period);
            summary.errors.push(format!("{}: {e}", commit.period));
            return Ok(());
        }
    };
    if target.is_new {
        summary.created_invoices.push(CreatedDocument {
            id: target.id.clone(),
            number: target.number.clone(),
        });
    }

    let net_change = sum_money(changed.iter().map(|e| e.result.delta));
    let request = ChangeRequest {
        config,
        period: commit.period,
        target: &target,
        line_items: interest_lines(commit.evaluated, commit.failed, config, ctx.engine),
        net_change,
        invoice_date: commit.invoice_date,
        due_date: commit.due_date,
        reauthorize: commit.reauthorize,
    };
    let applied = match orchestrator::apply_change(ctx, &request) {
        Ok(a) => a,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            log::warn!("{} {}: change not applied: {e}", config.contact_name, commit.period);
            summary.errors.push(format!("{}: {e}", commit.period));
            return Ok(());
        }
    };

    let supplemental = matches!(applied.outcome, ChangeOutcome::Supplemental { .. });
    for e in &changed {
        let (action, booked) = if supplemental && e.result.delta > 0.0 {
            (
                LedgerAction::AdditionalCharge,
                EntryTarget {
                    invoice_id: &applied.invoice_id,
                    invoice_number: &applied.invoice_number,
                    credit_note: None,
                },
            )
        } else if supplemental {
            (
                entry_action(&e.result),
                EntryTarget {
                    invoice_id: &target.id,
                    invoice_number: &target.number,
                    credit_note: None,
                },
            )
        } else {
            (
                entry_action(&e.result),
                EntryTarget {
                    invoice_id: &applied.invoice_id,
                    invoice_number: &applied.invoice_number,
                    credit_note: applied.credit_note().filter(|_| e.result.delta < 0.0),
                },
            )
        };
        let entry = entry_for(&e.result, &e.invoice, config, &booked, action, ctx.now);
        match ledger.create_entry(&entry) {
            Ok(_) => summary.entries_written += 1,
            Err(err) => {
                log::error!("ledger entry for {} not written: {err}", e.invoice.number);
                summary.errors.push(format!("{}: {err}", e.invoice.number));
            }
        }
    }

    if let Some(note) = applied.credit_note() {
        summary.credit_notes.push(note.clone());
    }
    if let Some(created) = applied.created_invoice() {
        summary.created_invoices.push(created);
    }
    log::info!(
        "{} {}: {} via {} (net {:.2})",
        config.contact_name,
        commit.period,
        changed.len(),
        applied.invoice_number,
        applied.net_change
    );
    summary.applied.push(applied);
    Ok(())
}

fn entry_action(result: &InvoiceReconciliation) -> LedgerAction {
    result.action.ledger_action().unwrap_or(LedgerAction::Updated)
}

/// Split outcomes into evaluated invoices and failures, propagating fatal
/// errors.
pub(crate) fn collect(
    outcome: InterestResult<Evaluated>,
    fallback: impl FnOnce(&InterestError) -> InvoiceReconciliation,
    evaluated: &mut Vec<Evaluated>,
    failed: &mut Vec<InvoiceReconciliation>,
) -> InterestResult<()> {
    match outcome {
        Ok(e) => evaluated.push(e),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            let result = fallback(&e);
            log::warn!("{} skipped: {e}", result.source_invoice_number);
            failed.push(result);
        }
    }
    Ok(())
}

/// Reconcile every overdue invoice of one client in running-total mode.
pub fn run_reconciliation(
    ctx: &mut RunContext<'_>,
    ledger: &dyn LedgerStore,
    config: &InterestConfig,
) -> InterestResult<ReconciliationSummary> {
    let period = PeriodKey::Running;
    let mut summary = ReconciliationSummary::new(config, BillingMode::Running, ctx.as_of, ctx.dry_run);

    let mut invoices = ctx.client.get_overdue_invoices(
        &config.contact_id,
        config.grace_days,
        config.currency.as_deref(),
        ctx.as_of,
    )?;
    log::debug!("{}: {} overdue invoices", config.contact_name, invoices.len());

    let mut evaluated = Vec::new();
    let mut failed = Vec::new();

    // Charged invoices that dropped out of the overdue list were settled or
    // cancelled since the last run.
    let seen: HashSet<String> = invoices.iter().map(|i| i.id.clone()).collect();
    for id in ledger.sources_with_balance(&config.contact_id, &period)? {
        if seen.contains(&id) {
            continue;
        }
        match ctx.client.get_invoice(&id) {
            Ok(invoice) => invoices.push(invoice),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let number = ledger
                    .latest_entry_for_invoice(&id, None)?
                    .map(|l| l.source_invoice_number)
                    .unwrap_or_default();
                let charged = ledger.sum_deltas_for_invoice(&id, None)?;
                log::warn!("follow-up of {number} failed: {e}");
                failed.push(InvoiceReconciliation::failed(&id, &number, period.clone(), charged, &e));
            }
        }
    }

    for invoice in invoices {
        let (id, number) = (invoice.id.clone(), invoice.number.clone());
        let should_owe = running_should_owe(&invoice, config, ctx.as_of);
        let outcome = evaluate_against_ledger(ctx, ledger, config, invoice, &period, None, should_owe);
        let charged = || ledger.sum_deltas_for_invoice(&id, None).unwrap_or(0.0);
        collect(
            outcome,
            |e| InvoiceReconciliation::failed(&id, &number, period.clone(), charged(), e),
            &mut evaluated,
            &mut failed,
        )?;
    }

    for e in &evaluated {
        let r = &e.result;
        log::debug!(
            "{}: owe {:.2}, charged {:.2}, delta {:.2} ({} / {})",
            r.source_invoice_number,
            r.should_owe,
            r.previously_charged,
            r.delta,
            r.action.as_str(),
            r.reason.as_str()
        );
    }

    if !ctx.dry_run {
        write_resets(ledger, &mut evaluated, &mut summary)?;
        let commit = PeriodCommit {
            period: &period,
            evaluated: &evaluated,
            failed: &failed,
            invoice_date: ctx.as_of,
            due_date: add_days(ctx.as_of, ctx.engine.invoice_due_days),
            reauthorize: false,
        };
        commit_period(ctx, ledger, config, &commit, &mut summary)?;
    }

    summary.errors.extend(failed.iter().filter_map(|f| {
        f.error.as_ref().map(|e| format!("{}: {e}", f.source_invoice_number))
    }));
    summary.results = evaluated.into_iter().map(|e| e.result).chain(failed).collect();
    summary.finish_totals();
    log::info!(
        "{}: owe {:.2}, charged {:.2}, net {:.2}{}",
        config.contact_name,
        summary.total_should_owe,
        summary.total_previously_charged,
        summary.net_change,
        if ctx.dry_run { " (dry run)" } else { "" }
    );
    Ok(summary)
}
