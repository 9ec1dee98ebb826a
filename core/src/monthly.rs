//! Monthly billing variant.
//!
//! Interest is bucketed by calendar month. Each (source invoice, month) key
//! carries its own ledger balance and each month gets its own interest
//! invoice, dated the last day of that month.
//!
//! RULES:
//!   - A month charges the flat current amount due over its days past grace.
//!     Payment history is not replayed.
//!   - Every month is recomputed on every run; settled months only move when
//!     the amount due or the terms move. Charged invoices that left the
//!     overdue list are looked up again, so full and partial settlement
//!     are treated alike.
//!   - Months with nothing owed and no ledger history are skipped, so silent
//!     months never produce an empty invoice.

use crate::{
    config::{BillingMode, InterestConfig},
    context::RunContext,
    dates::{add_days, last_of_month, month_starts, next_month_start, overlap_days},
    error::InterestResult,
    invoice::SourceInvoice,
    ledger::{LedgerStore, PeriodKey},
    money::{is_negligible, simple_interest},
    reconcile::{
        collect, commit_period, evaluate_against_ledger, write_resets, Evaluated,
        InvoiceReconciliation, PeriodCommit, ReconciliationSummary,
    },
    timeline::grace_end,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Interest accrued on `invoice` within the month starting `month_start`,
/// counting days up to (not including) `as_of`.
pub fn month_interest(
    invoice: &SourceInvoice,
    config: &InterestConfig,
    month_start: NaiveDate,
    as_of: NaiveDate,
) -> f64 {
    if invoice.status.is_cancelled() || invoice.is_settled() {
        return 0.0;
    }
    let from = grace_end(invoice.due_date, &config.rate());
    let days = overlap_days(month_start, next_month_start(month_start), from, as_of);
    config.chargeable(simple_interest(invoice.amount_due.max(0.0), config.annual_rate, days))
}

#[derive(Default)]
struct MonthBucket {
    evaluated: Vec<Evaluated>,
    failed:    Vec<InvoiceReconciliation>,
}

/// Months to evaluate for one invoice: every month past grace up to `as_of`
/// plus every month the ledger already holds charges for.
fn months_for(
    ledger: &dyn LedgerStore,
    invoice: &SourceInvoice,
    config: &InterestConfig,
    as_of: NaiveDate,
) -> InterestResult<(BTreeSet<NaiveDate>, BTreeSet<NaiveDate>)> {
    let accruing: BTreeSet<NaiveDate> =
        month_starts(grace_end(invoice.due_date, &config.rate()), as_of).into_iter().collect();
    let charged: BTreeSet<NaiveDate> = ledger
        .charged_by_period(&invoice.id)?
        .into_iter()
        .filter_map(|(period, _)| period.month_start())
        .collect();
    Ok((accruing, charged))
}

/// Reconcile every overdue invoice of one client month by month.
pub fn run_monthly(
    ctx: &mut RunContext<'_>,
    ledger: &dyn LedgerStore,
    config: &InterestConfig,
) -> InterestResult<ReconciliationSummary> {
    let mut summary = ReconciliationSummary::new(config, BillingMode::Monthly, ctx.as_of, ctx.dry_run);

    let mut invoices = ctx.client.get_overdue_invoices(
        &config.contact_id,
        config.grace_days,
        config.currency.as_deref(),
        ctx.as_of,
    )?;
    log::debug!("{}: {} overdue invoices (monthly)", config.contact_name, invoices.len());

    let mut buckets: BTreeMap<NaiveDate, MonthBucket> = BTreeMap::new();
    let mut unbucketed = Vec::new();

    // Charged invoices that dropped out of the overdue list were settled or
    // cancelled since the last run. A failed lookup keeps every charged month.
    let seen: HashSet<String> = invoices.iter().map(|i| i.id.clone()).collect();
    for id in ledger.sources_with_any_balance(&config.contact_id)? {
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
                log::warn!("follow-up of {number} failed: {e}");
                for (period, charged) in ledger.charged_by_period(&id)? {
                    let Some(month) = period.month_start() else { continue };
                    if is_negligible(charged) {
                        continue;
                    }
                    buckets
                        .entry(month)
                        .or_default()
                        .failed
                        .push(InvoiceReconciliation::failed(&id, &number, period, charged, &e));
                }
            }
        }
    }

    for invoice in invoices {
        let (accruing, charged) = match months_for(ledger, &invoice, config, ctx.as_of) {
            Ok(m) => m,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("{} skipped: {e}", invoice.number);
                let period = PeriodKey::month(ctx.as_of);
                unbucketed.push(InvoiceReconciliation::failed(&invoice.id, &invoice.number, period, 0.0, &e));
                continue;
            }
        };

        for month in accruing.union(&charged) {
            let should_owe = month_interest(&invoice, config, *month, ctx.as_of);
            if should_owe <= 0.0 && !charged.contains(month) {
                continue;
            }
            let period = PeriodKey::month(*month);
            let outcome = evaluate_against_ledger(
                ctx,
                ledger,
                config,
                invoice.clone(),
                &period,
                Some(&period),
                should_owe,
            );
            let bucket = buckets.entry(*month).or_default();
            let charged_now = || ledger.sum_deltas_for_invoice(&invoice.id, Some(&period)).unwrap_or(0.0);
            collect(
                outcome,
                |e| InvoiceReconciliation::failed(&invoice.id, &invoice.number, period.clone(), charged_now(), e),
                &mut bucket.evaluated,
                &mut bucket.failed,
            )?;
        }
    }

    if !ctx.dry_run {
        for (month, bucket) in buckets.iter_mut() {
            write_resets(ledger, &mut bucket.evaluated, &mut summary)?;
            let period = PeriodKey::month(*month);
            let invoice_date = last_of_month(*month);
            let commit = PeriodCommit {
                period: &period,
                evaluated: &bucket.evaluated,
                failed: &bucket.failed,
                invoice_date,
                due_date: add_days(invoice_date, ctx.engine.invoice_due_days),
                reauthorize: true,
            };
            commit_period(ctx, ledger, config, &commit, &mut summary)?;
        }
    }

    let mut results = Vec::new();
    for bucket in buckets.into_values() {
        results.extend(bucket.evaluated.into_iter().map(|e| e.result));
        results.extend(bucket.failed);
    }
    results.extend(unbucketed);
    summary.errors.extend(results.iter().filter_map(|r| {
        r.error.as_ref().map(|e| format!("{} {}: {e}", r.source_invoice_number, r.period))
    }));
    summary.results = results;
    summary.finish_totals();

    log::info!(
        "{}: {} months, owe {:.2}, charged {:.2}, net {:.2}{}",
        config.contact_name,
        summary.results.iter().map(|r| &r.period).collect::<BTreeSet<_>>().len(),
        summary.total_should_owe,
        summary.total_previously_charged,
        summary.net_change,
        if ctx.dry_run { " (dry run)" } else { "" }
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceStatus;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn config(grace_days: i64) -> InterestConfig {
        InterestConfig {
            config_id: "cfg-m".into(),
            contact_id: "c-m".into(),
            contact_name: "Monthly Ltd".into(),
            annual_rate: 36.5,
            grace_days,
            min_charge_amount: 0.0,
            currency: None,
            active: true,
            mode: BillingMode::Monthly,
            last_run_at: None,
            last_invoice_id: None,
            notes: None,
        }
    }

    fn invoice(amount_due: f64) -> SourceInvoice {
        SourceInvoice {
            id: "src-m".into(),
            number: "INV-M".into(),
            contact_id: "c-m".into(),
            status: InvoiceStatus::Authorised,
            issue_date: d(2024, 12, 1),
            due_date: d(2025, 1, 1),
            total: 10_000.0,
            amount_due,
            amount_paid: 10_000.0 - amount_due,
            currency: None,
            payments: Vec::new(),
            credit_notes: Vec::new(),
        }
    }

    #[test]
    fn month_interest_counts_days_inside_the_month() {
        // 36.5 % on 10 000 is 10.00 a day.
        let inv = invoice(10_000.0);
        let cfg = config(0);
        assert_eq!(month_interest(&inv, &cfg, d(2025, 1, 1), d(2025, 3, 31)), 310.0);
        assert_eq!(month_interest(&inv, &cfg, d(2025, 2, 1), d(2025, 3, 31)), 280.0);
        assert_eq!(month_interest(&inv, &cfg, d(2025, 3, 1), d(2025, 3, 31)), 300.0);
        assert_eq!(month_interest(&inv, &cfg, d(2025, 4, 1), d(2025, 3, 31)), 0.0);
    }

    #[test]
    fn grace_is_cut_from_the_first_month() {
        let inv = invoice(10_000.0);
        assert_eq!(month_interest(&inv, &config(10), d(2025, 1, 1), d(2025, 3, 31)), 210.0);
    }

    #[test]
    fn uses_current_amount_due() {
        assert_eq!(month_interest(&invoice(5_000.0), &config(0), d(2025, 2, 1), d(2025, 3, 31)), 140.0);
        let mut voided = invoice(10_000.0);
        voided.status = InvoiceStatus::Voided;
        assert_eq!(month_interest(&voided, &config(0), d(2025, 2, 1), d(2025, 3, 31)), 0.0);
    }
}
