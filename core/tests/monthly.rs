//! Integration tests for monthly billing.
//!
//! Tests verify:
//! 1. One ledger entry and one interest invoice per overdue month
//! 2. Rerunning the same batch is idempotent
//! 3. The open month grows and a new month opens as time passes
//! 4. Months with nothing to charge produce no invoice
//! 5. Full and partial settlement recompute every charged month alike

use chrono::NaiveDate;
use interest_core::{
    config::{BillingMode, EngineConfig, InterestConfig},
    context::RunContext,
    invoice::{InvoiceStatus, SourceInvoice},
    ledger::{LedgerStore, PeriodKey},
    monthly::run_monthly,
    reconcile::{ReconcileAction, ReconciliationSummary},
    sandbox::SandboxAccounting,
    store::InterestStore,
};

struct Harness {
    store:   InterestStore,
    sandbox: SandboxAccounting,
    engine:  EngineConfig,
    config:  InterestConfig,
}

impl Harness {
    fn run_at(&mut self, as_of: NaiveDate, dry_run: bool) -> ReconciliationSummary {
        let mut ctx = RunContext::new(&mut self.sandbox, &self.engine, as_of, dry_run);
        run_monthly(&mut ctx, &self.store, &self.config).expect("monthly run failed")
    }

    fn run(&mut self, as_of: NaiveDate) -> ReconciliationSummary {
        self.run_at(as_of, false)
    }
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// 10 000 due 2025-01-01 at 36.5 %: exactly 10.00 a day, no grace.
fn build() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = InterestStore::in_memory_migrated().expect("store");
    let config = InterestConfig {
        config_id: "cfg-m".into(),
        contact_id: "c-m".into(),
        contact_name: "Kauri Build Co".into(),
        annual_rate: 36.5,
        grace_days: 0,
        min_charge_amount: 0.0,
        currency: None,
        active: true,
        mode: BillingMode::Monthly,
        last_run_at: None,
        last_invoice_id: None,
        notes: None,
    };
    store.insert_config(&config).unwrap();
    let mut sandbox = SandboxAccounting::new();
    sandbox.put_source(SourceInvoice {
        id: "src-m".into(),
        number: "INV-2001".into(),
        contact_id: "c-m".into(),
        status: InvoiceStatus::Authorised,
        issue_date: d(2024, 12, 1),
        due_date: d(2025, 1, 1),
        total: 10_000.0,
        amount_due: 10_000.0,
        amount_paid: 0.0,
        currency: None,
        payments: Vec::new(),
        credit_notes: Vec::new(),
    });
    Harness {
        store,
        sandbox,
        engine: EngineConfig::default_test(),
        config,
    }
}

fn month(key: &str) -> PeriodKey {
    PeriodKey::Month(key.into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: three overdue months, three entries, three invoices
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn three_months_produce_three_invoices() {
    let mut h = build();
    let summary = h.run(d(2025, 3, 31));

    assert_eq!(summary.mode, BillingMode::Monthly);
    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.entries_written, 3);
    assert!(summary.results.iter().all(|r| r.action == ReconcileAction::Created));
    assert_eq!(summary.total_should_owe, 890.0);

    let charged = h.store.charged_by_period("src-m").unwrap();
    assert_eq!(
        charged,
        vec![(month("2025-01"), 310.0), (month("2025-02"), 280.0), (month("2025-03"), 300.0)]
    );

    let invoices = h.sandbox.invoices();
    assert_eq!(invoices.len(), 3);
    let references: Vec<_> = invoices.iter().filter_map(|i| i.reference.clone()).collect();
    assert_eq!(
        references,
        vec!["INTEREST-c-m-2025-01", "INTEREST-c-m-2025-02", "INTEREST-c-m-2025-03"]
    );

    let feb = h.sandbox.invoice_by_reference("INTEREST-c-m-2025-02").unwrap();
    assert_eq!(feb.status, InvoiceStatus::Authorised);
    assert_eq!(feb.invoice_date, d(2025, 2, 28));
    assert_eq!(feb.due_date, d(2025, 3, 30));
    assert_eq!(feb.total(), 280.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: idempotence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rerun_writes_nothing() {
    let mut h = build();
    h.run(d(2025, 3, 31));
    let again = h.run(d(2025, 3, 31));

    assert_eq!(again.entries_written, 0);
    assert!(again.applied.is_empty());
    assert!(again.results.iter().all(|r| r.action == ReconcileAction::NoChange));
    assert_eq!(h.store.ledger_entry_count().unwrap(), 3);
    assert_eq!(h.sandbox.invoices().len(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: time moves on
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn open_month_grows_and_next_month_opens() {
    let mut h = build();
    h.run(d(2025, 3, 31));
    let later = h.run(d(2025, 4, 10));

    let changed: Vec<_> = later.changed().collect();
    assert_eq!(changed.len(), 2);
    assert_eq!(changed[0].period, month("2025-03"));
    assert_eq!(changed[0].delta, 10.0);
    assert_eq!(changed[0].action, ReconcileAction::Updated);
    assert_eq!(changed[1].period, month("2025-04"));
    assert_eq!(changed[1].should_owe, 90.0);
    assert_eq!(changed[1].action, ReconcileAction::Created);

    let march = h.sandbox.invoice_by_reference("INTEREST-c-m-2025-03").unwrap();
    assert_eq!(march.total(), 310.0);
    assert_eq!(march.status, InvoiceStatus::Authorised, "patched and re-authorised");
    assert_eq!(h.sandbox.invoices().len(), 4);
    assert_eq!(h.store.ledger_entry_count().unwrap(), 5);
}

#[test]
fn paid_month_is_corrected_with_credit_note() {
    let mut h = build();
    h.run(d(2025, 3, 31));
    let jan = h.sandbox.invoice_by_reference("INTEREST-c-m-2025-01").unwrap().id.clone();
    h.sandbox.pay_invoice(&jan).unwrap();
    // Half the principal is paid off; every month is recomputed at the new
    // amount due.
    h.sandbox.record_payment("src-m", d(2025, 3, 31), 5_000.0).unwrap();

    let summary = h.run(d(2025, 3, 31));
    assert_eq!(summary.credit_notes.len(), 1);
    assert_eq!(h.sandbox.credit_notes()[0].total(), 155.0);
    assert_eq!(
        h.store.charged_by_period("src-m").unwrap(),
        vec![(month("2025-01"), 155.0), (month("2025-02"), 140.0), (month("2025-03"), 150.0)]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: silent months
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn months_below_minimum_charge_get_no_invoice() {
    let mut h = build();
    h.config.min_charge_amount = 295.0;
    let summary = h.run(d(2025, 3, 31));

    assert_eq!(summary.results.len(), 2, "February is silent");
    assert_eq!(h.sandbox.invoices().len(), 2);
    assert!(h.sandbox.invoice_by_reference("INTEREST-c-m-2025-02").is_none());
}

#[test]
fn dry_run_creates_no_invoices() {
    let mut h = build();
    let summary = h.run_at(d(2025, 3, 31), true);
    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.net_change, 890.0);
    assert!(h.sandbox.invoices().is_empty());
    assert_eq!(h.store.ledger_entry_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: settlement
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn full_settlement_credits_every_month() {
    let mut h = build();
    h.run(d(2025, 3, 31));
    h.sandbox.record_payment("src-m", d(2025, 3, 31), 10_000.0).unwrap();

    let summary = h.run(d(2025, 4, 1));
    let credited = summary.results.iter().filter(|r| r.action == ReconcileAction::Credited).count();
    assert_eq!(credited, 3, "paid invoice is looked up again");
    assert_eq!(summary.net_change, -890.0);
    assert_eq!(
        h.store.charged_by_period("src-m").unwrap(),
        vec![(month("2025-01"), 0.0), (month("2025-02"), 0.0), (month("2025-03"), 0.0)]
    );

    let again = h.run(d(2025, 4, 2));
    assert_eq!(again.entries_written, 0);
}

#[test]
fn partial_settlement_keeps_only_the_interest_on_what_is_left() {
    let mut h = build();
    h.run(d(2025, 3, 31));
    h.sandbox.record_payment("src-m", d(2025, 3, 31), 9_999.0).unwrap();

    let summary = h.run(d(2025, 4, 1));
    assert_eq!(summary.net_change, -889.91);
    assert_eq!(
        h.store.charged_by_period("src-m").unwrap(),
        vec![(month("2025-01"), 0.03), (month("2025-02"), 0.03), (month("2025-03"), 0.03)]
    );
}
