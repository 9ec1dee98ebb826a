//! Integration tests for the invoice mutation orchestrator.
//!
//! Tests verify the state machine over the interest invoice:
//! 1. Modifiable invoices are patched; rejected patches fall back to a
//!    replacement invoice that takes over the reference
//! 2. Paid invoices get a credit note (net negative) or a supplemental
//!    invoice (net positive)
//! 3. Voided invoices are replaced when there is something to charge and
//!    left alone otherwise
//! 4. The reference string is the idempotency key

use chrono::NaiveDate;
use interest_core::{
    accounting::{AccountingClient, InterestInvoiceRef},
    config::{BillingMode, EngineConfig, InterestConfig},
    context::RunContext,
    error::InterestError,
    invoice::{InvoiceStatus, LineItem, SourceInvoice},
    ledger::{LedgerAction, LedgerStore, PeriodKey},
    orchestrator::{apply_change, get_or_create_interest_invoice, interest_reference, ChangeOutcome, ChangeRequest},
    reconcile::{run_reconciliation, ReconcileAction},
    sandbox::SandboxAccounting,
    store::InterestStore,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn config() -> InterestConfig {
    InterestConfig {
        config_id: "cfg-1".into(),
        contact_id: "c-1".into(),
        contact_name: "Acme Ltd".into(),
        annual_rate: 24.0,
        grace_days: 30,
        min_charge_amount: 0.0,
        currency: None,
        active: true,
        mode: BillingMode::Running,
        last_run_at: None,
        last_invoice_id: None,
        notes: None,
    }
}

fn line(amount: f64) -> LineItem {
    LineItem {
        description: "Interest on overdue invoice INV-100".into(),
        quantity: 1.0,
        unit_amount: amount,
        account_code: Some("260".into()),
        source_invoice_id: Some("src-1".into()),
    }
}

/// Sandbox holding one fresh draft interest invoice for the running period.
fn build() -> (SandboxAccounting, EngineConfig, InterestInvoiceRef) {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = EngineConfig::default_test();
    let mut sandbox = SandboxAccounting::new();
    let target = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        get_or_create_interest_invoice(&mut ctx, &config(), &PeriodKey::Running, d(2025, 3, 1), d(2025, 3, 31))
            .expect("interest invoice")
    };
    (sandbox, engine, target)
}

fn request<'r>(
    config: &'r InterestConfig,
    period: &'r PeriodKey,
    target: &'r InterestInvoiceRef,
    line_items: Vec<LineItem>,
    net_change: f64,
) -> ChangeRequest<'r> {
    ChangeRequest {
        config,
        period,
        target,
        line_items,
        net_change,
        invoice_date: d(2025, 3, 1),
        due_date: d(2025, 3, 31),
        reauthorize: false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Get-or-create
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reference_is_the_idempotency_key() {
    let (mut sandbox, engine, first) = build();
    assert!(first.is_new);

    let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 2), false);
    let again = get_or_create_interest_invoice(&mut ctx, &config(), &PeriodKey::Running, d(2025, 3, 2), d(2025, 4, 1))
        .unwrap();
    assert!(!again.is_new);
    assert_eq!(again.id, first.id);

    let monthly = get_or_create_interest_invoice(
        &mut ctx,
        &config(),
        &PeriodKey::Month("2025-02".into()),
        d(2025, 2, 28),
        d(2025, 3, 30),
    )
    .unwrap();
    assert!(monthly.is_new);
    assert_ne!(monthly.id, first.id);

    assert_eq!(sandbox.invoices().len(), 2);
    let placeholder = &sandbox.invoices()[0].line_items;
    assert_eq!(placeholder.len(), 1);
    assert_eq!(placeholder[0].unit_amount, 0.0);
    assert_eq!(
        interest_reference("INTEREST", "c-1", &PeriodKey::Month("2025-02".into())),
        "INTEREST-c-1-2025-02"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Modifiable invoices
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn draft_is_patched_in_place() {
    let (mut sandbox, engine, target) = build();
    let cfg = config();
    let period = PeriodKey::Running;
    let applied = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(120.0)], 120.0)).unwrap()
    };
    assert_eq!(applied.outcome, ChangeOutcome::Patched);
    assert_eq!(applied.invoice_id, target.id);
    assert_eq!(sandbox.invoice(&target.id).unwrap().total(), 120.0);
}

#[test]
fn empty_line_set_leaves_a_placeholder() {
    let (mut sandbox, engine, target) = build();
    let cfg = config();
    let period = PeriodKey::Running;
    {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(120.0)], 120.0)).unwrap();
        apply_change(&mut ctx, &request(&cfg, &period, &target, Vec::new(), -120.0)).unwrap();
    }
    let invoice = sandbox.invoice(&target.id).unwrap();
    assert_eq!(invoice.line_items.len(), 1);
    assert_eq!(invoice.total(), 0.0);
    assert_eq!(invoice.line_items[0].description, engine.placeholder_description);
}

#[test]
fn authorised_invoice_is_redrafted_and_reauthorised() {
    let (mut sandbox, engine, target) = build();
    let cfg = config();
    let period = PeriodKey::Month("2025-02".into());
    let mut req = request(&cfg, &period, &target, vec![line(80.0)], 80.0);
    req.reauthorize = true;
    req.invoice_date = d(2025, 2, 28);
    req.due_date = d(2025, 3, 30);
    {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        ctx.client.authorize(&target.id).unwrap();
        let applied = apply_change(&mut ctx, &req).unwrap();
        assert_eq!(applied.outcome, ChangeOutcome::Patched);
    }
    let invoice = sandbox.invoice(&target.id).unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Authorised);
    assert_eq!(invoice.invoice_date, d(2025, 2, 28));
    assert_eq!(invoice.due_date, d(2025, 3, 30));
    assert_eq!(invoice.total(), 80.0);
}

#[test]
fn rejected_update_falls_back_to_replacement() {
    let (mut sandbox, engine, target) = build();
    sandbox.reject_updates_for(&target.id);
    let cfg = config();
    let period = PeriodKey::Running;
    let applied = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(150.0), line(50.0)], 200.0)).unwrap()
    };

    let ChangeOutcome::Replaced { replaced_number, reason } = &applied.outcome else {
        panic!("expected a replacement, got {:?}", applied.outcome);
    };
    assert_eq!(replaced_number, &target.number);
    assert!(reason.contains("validation error"));
    assert_ne!(applied.invoice_id, target.id);

    let replacement = sandbox.invoice(&applied.invoice_id).unwrap();
    assert_eq!(replacement.total(), 200.0, "replacement carries the full total");
    assert!(replacement.history[0].contains(&target.number));
    let live = sandbox.invoice_by_reference("INTEREST-c-1-running").unwrap();
    assert_eq!(live.id, replacement.id, "newest invoice owns the reference");
}

// ─────────────────────────────────────────────────────────────────────────────
// Paid and voided invoices
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn paid_invoice_with_negative_net_gets_credit_note() {
    let (mut sandbox, engine, target) = build();
    let cfg = config();
    let period = PeriodKey::Running;
    {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(300.0)], 300.0)).unwrap();
    }
    sandbox.pay_invoice(&target.id).unwrap();

    let applied = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 5), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(180.0)], -120.0)).unwrap()
    };
    let note = applied.credit_note().expect("credit note");
    let stored = &sandbox.credit_notes()[0];
    assert_eq!(stored.id, note.id);
    assert_eq!(stored.total(), 120.0);
    assert_eq!(stored.date, d(2025, 3, 5));
    assert!(stored.history[0].contains(&target.number));
    assert_eq!(sandbox.invoice(&target.id).unwrap().total(), 300.0, "paid invoice untouched");
}

#[test]
fn paid_invoice_with_positive_net_gets_supplemental_invoice() {
    let (mut sandbox, engine, target) = build();
    let cfg = config();
    let period = PeriodKey::Running;
    {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(300.0)], 300.0)).unwrap();
    }
    sandbox.pay_invoice(&target.id).unwrap();

    let applied = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 5), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(345.5)], 45.5)).unwrap()
    };
    let created = applied.created_invoice().expect("supplemental invoice");
    let supplemental = sandbox.invoice(&created.id).unwrap();
    assert_eq!(supplemental.total(), 45.5);
    assert_eq!(supplemental.status, InvoiceStatus::Authorised);
    assert_eq!(supplemental.due_date, d(2025, 3, 19));
    assert!(supplemental.history[0].contains("Additional charges"));
    assert!(supplemental.history[0].contains(&target.number));
    assert_ne!(supplemental.reference.as_deref(), Some("INTEREST-c-1-running"));
}

#[test]
fn locked_invoice_with_no_net_change_is_left_alone() {
    let (mut sandbox, engine, target) = build();
    sandbox.pay_invoice(&target.id).unwrap();
    let cfg = config();
    let period = PeriodKey::Running;
    let applied = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(10.0)], 0.004)).unwrap()
    };
    assert_eq!(applied.outcome, ChangeOutcome::NoOp);
    assert_eq!(sandbox.invoices().len(), 1);
    assert!(sandbox.credit_notes().is_empty());
}

#[test]
fn voided_invoice_with_change_is_replaced() {
    let (mut sandbox, engine, target) = build();
    sandbox.void_invoice(&target.id).unwrap();
    let cfg = config();
    let period = PeriodKey::Running;
    let applied = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(75.0)], 75.0)).unwrap()
    };
    assert!(matches!(applied.outcome, ChangeOutcome::Replaced { .. }));
    assert_eq!(sandbox.invoice(&applied.invoice_id).unwrap().total(), 75.0);
}

#[test]
fn auth_failure_during_patch_propagates() {
    let (mut sandbox, engine, target) = build();
    sandbox.expire_auth();
    let cfg = config();
    let period = PeriodKey::Running;
    let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
    let err = apply_change(&mut ctx, &request(&cfg, &period, &target, vec![line(75.0)], 75.0)).unwrap_err();
    assert!(matches!(err, InterestError::Auth(_)));
    assert!(err.is_fatal());
}

// ─────────────────────────────────────────────────────────────────────────────
// Through the batch
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn supplemental_charges_are_booked_as_additional_charge() {
    let store = InterestStore::in_memory_migrated().unwrap();
    let engine = EngineConfig::default_test();
    let cfg = config();
    let mut sandbox = SandboxAccounting::new();
    sandbox.put_source(SourceInvoice {
        id: "src-1".into(),
        number: "INV-100".into(),
        contact_id: "c-1".into(),
        status: InvoiceStatus::Authorised,
        issue_date: d(2024, 12, 1),
        due_date: d(2025, 1, 1),
        total: 100_000.0,
        amount_due: 100_000.0,
        amount_paid: 0.0,
        currency: None,
        payments: Vec::new(),
        credit_notes: Vec::new(),
    });

    {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        run_reconciliation(&mut ctx, &store, &cfg).unwrap();
    }
    let original = sandbox.invoices()[0].id.clone();
    sandbox.pay_invoice(&original).unwrap();

    let summary = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 2), false);
        run_reconciliation(&mut ctx, &store, &cfg).unwrap()
    };
    assert_eq!(summary.results[0].action, ReconcileAction::Updated);
    assert_eq!(summary.created_invoices.len(), 1);

    let entry = store.latest_entry_for_invoice("src-1", None).unwrap().unwrap();
    assert_eq!(entry.action, LedgerAction::AdditionalCharge);
    assert_eq!(entry.delta, 65.75);
    assert_eq!(entry.interest_invoice_id, summary.created_invoices[0].id);
    assert_ne!(entry.interest_invoice_id, original);
    assert_eq!(store.sum_deltas_for_invoice("src-1", None).unwrap(), 1972.60);
}

#[test]
fn rejected_patch_in_batch_books_against_replacement() {
    let store = InterestStore::in_memory_migrated().unwrap();
    let engine = EngineConfig::default_test();
    let cfg = config();
    let mut sandbox = SandboxAccounting::new();
    sandbox.put_source(SourceInvoice {
        id: "src-1".into(),
        number: "INV-100".into(),
        contact_id: "c-1".into(),
        status: InvoiceStatus::Authorised,
        issue_date: d(2024, 12, 1),
        due_date: d(2025, 1, 1),
        total: 100_000.0,
        amount_due: 100_000.0,
        amount_paid: 0.0,
        currency: None,
        payments: Vec::new(),
        credit_notes: Vec::new(),
    });
    {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 1), false);
        run_reconciliation(&mut ctx, &store, &cfg).unwrap();
    }
    let original = sandbox.invoices()[0].id.clone();
    sandbox.reject_updates_for(&original);

    let summary = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 2), false);
        run_reconciliation(&mut ctx, &store, &cfg).unwrap()
    };
    let replacement = &summary.created_invoices[0];
    let entry = store.latest_entry_for_invoice("src-1", None).unwrap().unwrap();
    assert_eq!(entry.interest_invoice_id, replacement.id);
    assert_eq!(sandbox.invoice(&replacement.id).unwrap().total(), 1972.60);

    // The next run patches the replacement, which now owns the reference.
    let next = {
        let mut ctx = RunContext::new(&mut sandbox, &engine, d(2025, 3, 3), false);
        run_reconciliation(&mut ctx, &store, &cfg).unwrap()
    };
    assert_eq!(next.applied[0].outcome, ChangeOutcome::Patched);
    assert_eq!(next.applied[0].invoice_id, replacement.id);
}
