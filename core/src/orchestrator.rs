//! Invoice mutation orchestrator.
//!
//! Turns a computed line-item set and net change into platform mutations.
//! What is possible depends on the interest invoice's state:
//!
//!   - modifiable (draft, or authorised with nothing paid or allocated):
//!     overwrite the lines; on rejection, issue a replacement invoice
//!   - paid or allocated, net negative: credit note
//!   - paid or allocated, net positive: supplemental invoice
//!   - voided or deleted: replacement invoice, or nothing if no net change
//!
//! RULE: a locked invoice never fails the batch. There is always a
//! compensating document unless the change is below one cent.

use crate::{
    accounting::{CreatedDocument, InterestInvoiceRef, Modifiability, NewCreditNote, NewInvoice},
    config::{EngineConfig, InterestConfig},
    context::RunContext,
    dates::add_days,
    error::InterestResult,
    invoice::{lines_total, InvoiceStatus, LineItem},
    ledger::PeriodKey,
    money::{is_negligible, round_money},
};
use chrono::NaiveDate;
use serde::Serialize;

/// Deterministic reference tagging a client's interest invoice for a period.
/// It is the idempotency key across repeated runs.
pub fn interest_reference(prefix: &str, contact_id: &str, period: &PeriodKey) -> String {
    format!("{prefix}-{contact_id}-{period}")
}

fn placeholder(engine: &EngineConfig) -> LineItem {
    LineItem::placeholder(engine.placeholder_description.clone(), engine.account_code.clone())
}

/// Find the live interest invoice for `period`, or create a draft for it.
pub fn get_or_create_interest_invoice(
    ctx: &mut RunContext<'_>,
    config: &InterestConfig,
    period: &PeriodKey,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
) -> InterestResult<InterestInvoiceRef> {
    let reference = interest_reference(&ctx.engine.reference_prefix, &config.contact_id, period);
    let placeholder = placeholder(ctx.engine);
    ctx.client.get_or_create_interest_invoice(
        &config.contact_id,
        &config.contact_name,
        &reference,
        invoice_date,
        due_date,
        config.currency.as_deref(),
        placeholder,
    )
}

/// Everything needed to realize one period's change.
#[derive(Debug, Clone)]
pub struct ChangeRequest<'r> {
    pub config:       &'r InterestConfig,
    pub period:       &'r PeriodKey,
    pub target:       &'r InterestInvoiceRef,
    /// Full computed line set; empty means nothing is owed.
    pub line_items:   Vec<LineItem>,
    pub net_change:   f64,
    pub invoice_date: NaiveDate,
    pub due_date:     NaiveDate,
    /// Set dates and re-authorise after patching (monthly invoices).
    pub reauthorize:  bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeOutcome {
    NoOp,
    Patched,
    Replaced { replaced_number: String, reason: String },
    CreditNote { credit_note: CreatedDocument },
    Supplemental { invoice: CreatedDocument },
}

/// What was committed on the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedChange {
    pub period:         PeriodKey,
    pub outcome:        ChangeOutcome,
    /// Invoice that now carries the period's charge.
    pub invoice_id:     String,
    pub invoice_number: String,
    pub net_change:     f64,
}

impl AppliedChange {
    pub fn credit_note(&self) -> Option<&CreatedDocument> {
        match &self.outcome {
            ChangeOutcome::CreditNote { credit_note } => Some(credit_note),
            _ => None,
        }
    }

    /// Invoice created by this change, if any.
    pub fn created_invoice(&self) -> Option<CreatedDocument> {
        match &self.outcome {
            ChangeOutcome::Replaced { .. } => Some(CreatedDocument {
                id: self.invoice_id.clone(),
                number: self.invoice_number.clone(),
            }),
            ChangeOutcome::Supplemental { invoice } => Some(invoice.clone()),
            _ => None,
        }
    }
}

/// Realize `req` on the platform.
pub fn apply_change(ctx: &mut RunContext<'_>, req: &ChangeRequest<'_>) -> InterestResult<AppliedChange> {
    let state = ctx.client.can_modify_invoice(&req.target.id)?;
    let net = round_money(req.net_change);

    let applied = |outcome: ChangeOutcome, id: &str, number: &str| AppliedChange {
        period: req.period.clone(),
        outcome,
        invoice_id: id.to_string(),
        invoice_number: number.to_string(),
        net_change: net,
    };

    if state.can_modify {
        return match patch(ctx, req, &state) {
            Ok(()) => {
                log::debug!("patched {} for {} (net {net:.2})", req.target.number, req.period);
                Ok(applied(ChangeOutcome::Patched, &req.target.id, &req.target.number))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!(
                    "update of {} rejected ({e}); issuing replacement invoice",
                    req.target.number
                );
                let reason = e.to_string();
                let doc = replace(ctx, req, &reason)?;
                Ok(applied(
                    ChangeOutcome::Replaced {
                        replaced_number: req.target.number.clone(),
                        reason,
                    },
                    &doc.id,
                    &doc.number,
                ))
            }
        };
    }

    if is_negligible(net) {
        log::debug!("{} is {} and nothing changed", req.target.number, state.status.as_str());
        return Ok(applied(ChangeOutcome::NoOp, &req.target.id, &req.target.number));
    }

    if state.status.is_cancelled() {
        let reason = format!("invoice was {}", state.status.as_str().to_lowercase());
        log::warn!("{} {reason}; issuing replacement invoice", req.target.number);
        let doc = replace(ctx, req, &reason)?;
        return Ok(applied(
            ChangeOutcome::Replaced {
                replaced_number: req.target.number.clone(),
                reason,
            },
            &doc.id,
            &doc.number,
        ));
    }

    if net < 0.0 {
        let credit_note = issue_credit_note(ctx, req, -net)?;
        log::info!("credit note {} for {:.2} against {}", credit_note.number, -net, req.target.number);
        Ok(applied(ChangeOutcome::CreditNote { credit_note }, &req.target.id, &req.target.number))
    } else {
        let invoice = issue_supplemental(ctx, req, net)?;
        log::info!("supplemental invoice {} for {net:.2} on {}", invoice.number, req.target.number);
        let (id, number) = (invoice.id.clone(), invoice.number.clone());
        Ok(applied(ChangeOutcome::Supplemental { invoice }, &id, &number))
    }
}

/// Lines as they should appear on the invoice: never empty.
fn effective_lines(ctx: &RunContext<'_>, req: &ChangeRequest<'_>) -> Vec<LineItem> {
    if req.line_items.is_empty() {
        vec![placeholder(ctx.engine)]
    } else {
        req.line_items.clone()
    }
}

fn patch(ctx: &mut RunContext<'_>, req: &ChangeRequest<'_>, state: &Modifiability) -> InterestResult<()> {
    let id = &req.target.id;
    if state.status != InvoiceStatus::Draft {
        ctx.client.move_to_draft(id)?;
    }
    let lines = effective_lines(ctx, req);
    ctx.client.update_line_items(id, &lines)?;
    if req.reauthorize {
        ctx.client.update_dates(id, req.invoice_date, req.due_date)?;
        ctx.client.authorize(id)?;
    }
    Ok(())
}

fn replace(ctx: &mut RunContext<'_>, req: &ChangeRequest<'_>, reason: &str) -> InterestResult<CreatedDocument> {
    let lines = effective_lines(ctx, req);
    let total = lines_total(&lines);
    let reference = interest_reference(&ctx.engine.reference_prefix, &req.config.contact_id, req.period);
    let doc = ctx.client.create_invoice(&NewInvoice {
        contact_id: req.config.contact_id.clone(),
        contact_name: req.config.contact_name.clone(),
        reference: Some(reference),
        invoice_date: req.invoice_date,
        due_date: req.due_date,
        currency: req.config.currency.clone(),
        line_items: lines,
        status: if req.reauthorize { InvoiceStatus::Authorised } else { InvoiceStatus::Draft },
    })?;
    note(
        ctx,
        &doc.id,
        &format!(
            "Replaces interest invoice {} ({reason}). Total interest {total:.2}.",
            req.target.number
        ),
    )?;
    ctx.forget_void_status(&req.target.id);
    Ok(doc)
}

fn issue_credit_note(ctx: &mut RunContext<'_>, req: &ChangeRequest<'_>, amount: f64) -> InterestResult<CreatedDocument> {
    let doc = ctx.client.create_credit_note(&NewCreditNote {
        contact_id: req.config.contact_id.clone(),
        contact_name: req.config.contact_name.clone(),
        reference: Some(format!("{} adjustment", req.target.number)),
        date: ctx.as_of,
        currency: req.config.currency.clone(),
        line_items: vec![LineItem {
            description: format!("Interest adjustment for {} ({})", req.target.number, req.period),
            quantity: 1.0,
            unit_amount: round_money(amount),
            account_code: ctx.engine.account_code.clone(),
            source_invoice_id: None,
        }],
    })?;
    note(
        ctx,
        &doc.id,
        &format!(
            "Overpayment correction: {} was paid before interest was reduced by {amount:.2}.",
            req.target.number
        ),
    )?;
    Ok(doc)
}

fn issue_supplemental(ctx: &mut RunContext<'_>, req: &ChangeRequest<'_>, amount: f64) -> InterestResult<CreatedDocument> {
    let doc = ctx.client.create_invoice(&NewInvoice {
        contact_id: req.config.contact_id.clone(),
        contact_name: req.config.contact_name.clone(),
        reference: Some(format!("{} additional", req.target.number)),
        invoice_date: ctx.as_of,
        due_date: add_days(ctx.as_of, ctx.engine.supplemental_due_days),
        currency: req.config.currency.clone(),
        line_items: vec![LineItem {
            description: format!("Additional interest charges for {} ({})", req.target.number, req.period),
            quantity: 1.0,
            unit_amount: round_money(amount),
            account_code: ctx.engine.account_code.clone(),
            source_invoice_id: None,
        }],
        status: InvoiceStatus::Authorised,
    })?;
    note(
        ctx,
        &doc.id,
        &format!("Additional charges: {} was already paid.", req.target.number),
    )?;
    Ok(doc)
}

/// History notes are informational; only fatal errors propagate.
fn note(ctx: &mut RunContext<'_>, id: &str, text: &str) -> InterestResult<()> {
    match ctx.client.add_history_note(id, text) {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log::warn!("history note on {id} failed: {e}");
            Ok(())
        }
    }
}
