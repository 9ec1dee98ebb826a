//! In-memory accounting platform.
//!
//! Enforces the same mutability rules as the real platform (no edits to
//! paid, allocated or voided invoices; at least one line per invoice) so the
//! orchestrator's fallbacks can be exercised offline. The runner loads it
//! from a JSON fixture for dry runs against recorded data.

use crate::{
    accounting::{AccountingClient, CreatedDocument, InvoiceHeader, NewCreditNote, NewInvoice},
    error::{InterestError, InterestResult},
    invoice::{lines_total, BalanceEvent, BalanceEventKind, InvoiceStatus, LineItem, SourceInvoice},
    money::round_money,
    payload::normalize_invoice,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An invoice created through the client (interest, replacement or supplemental).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxInvoice {
    pub id:              String,
    pub number:          String,
    pub contact_id:      String,
    pub contact_name:    String,
    pub status:          InvoiceStatus,
    pub reference:       Option<String>,
    pub invoice_date:    NaiveDate,
    pub due_date:        NaiveDate,
    pub currency:        Option<String>,
    pub line_items:      Vec<LineItem>,
    pub amount_paid:     f64,
    pub has_allocations: bool,
    pub history:         Vec<String>,
}

impl SandboxInvoice {
    pub fn total(&self) -> f64 {
        lines_total(&self.line_items)
    }

    fn header(&self) -> InvoiceHeader {
        InvoiceHeader {
            id: self.id.clone(),
            number: self.number.clone(),
            status: self.status,
            reference: self.reference.clone(),
            total: self.total(),
            amount_paid: self.amount_paid,
            has_allocations: self.has_allocations,
        }
    }

    fn is_locked(&self) -> bool {
        self.status == InvoiceStatus::Paid
            || self.amount_paid > 0.0
            || self.has_allocations
            || self.status.is_cancelled()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxCreditNote {
    pub id:         String,
    pub number:     String,
    pub contact_id: String,
    pub reference:  Option<String>,
    pub date:       NaiveDate,
    pub line_items: Vec<LineItem>,
    pub history:    Vec<String>,
}

impl SandboxCreditNote {
    pub fn total(&self) -> f64 {
        lines_total(&self.line_items)
    }
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    invoices: Vec<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct SandboxAccounting {
    sources:          Vec<SourceInvoice>,
    invoices:         Vec<SandboxInvoice>,
    credit_notes:     Vec<SandboxCreditNote>,
    next_invoice_seq: u32,
    next_credit_seq:  u32,
    reject_updates:   HashSet<String>,
    auth_expired:     bool,
    unreachable:      bool,
}

impl SandboxAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load source invoices from a fixture: `{ "invoices": [ <platform JSON> ] }`.
    pub fn from_fixture_json(json: &str) -> InterestResult<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let mut sandbox = Self::new();
        for value in fixture.invoices {
            sandbox.sources.push(normalize_invoice(value)?);
        }
        Ok(sandbox)
    }

    pub fn from_fixture_file(path: &str) -> InterestResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_fixture_json(&content)
    }

    // ── Source invoices ────────────────────────────────────────────

    /// Insert or replace a source invoice by id.
    pub fn put_source(&mut self, invoice: SourceInvoice) {
        match self.sources.iter_mut().find(|s| s.id == invoice.id) {
            Some(existing) => *existing = invoice,
            None => self.sources.push(invoice),
        }
    }

    pub fn source(&self, id: &str) -> Option<&SourceInvoice> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Apply a payment to a source invoice, marking it paid when settled.
    pub fn record_payment(&mut self, id: &str, date: NaiveDate, amount: f64) -> InterestResult<()> {
        let inv = self
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| InterestError::InvoiceNotFound { id: id.to_string() })?;
        inv.payments.push(BalanceEvent {
            kind: BalanceEventKind::Payment,
            date,
            amount,
        });
        inv.amount_paid = round_money(inv.amount_paid + amount);
        inv.amount_due = round_money((inv.amount_due - amount).max(0.0));
        if inv.amount_due <= 0.0 {
            inv.status = InvoiceStatus::Paid;
        }
        Ok(())
    }

    pub fn set_source_status(&mut self, id: &str, status: InvoiceStatus) -> InterestResult<()> {
        let inv = self
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| InterestError::InvoiceNotFound { id: id.to_string() })?;
        inv.status = status;
        Ok(())
    }

    pub fn set_source_due_date(&mut self, id: &str, due: NaiveDate) -> InterestResult<()> {
        let inv = self
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| InterestError::InvoiceNotFound { id: id.to_string() })?;
        inv.due_date = due;
        Ok(())
    }

    // ── Interest invoices and credit notes ─────────────────────────

    pub fn invoices(&self) -> &[SandboxInvoice] {
        &self.invoices
    }

    pub fn invoice(&self, id: &str) -> Option<&SandboxInvoice> {
        self.invoices.iter().find(|i| i.id == id)
    }

    /// Newest live invoice carrying `reference`.
    pub fn invoice_by_reference(&self, reference: &str) -> Option<&SandboxInvoice> {
        self.invoices
            .iter()
            .rev()
            .find(|i| i.reference.as_deref() == Some(reference) && !i.status.is_cancelled())
    }

    pub fn credit_notes(&self) -> &[SandboxCreditNote] {
        &self.credit_notes
    }

    /// Customer pays an interest invoice in full.
    pub fn pay_invoice(&mut self, id: &str) -> InterestResult<()> {
        let inv = self.invoice_mut(id)?;
        inv.amount_paid = inv.total();
        inv.status = InvoiceStatus::Paid;
        Ok(())
    }

    /// Someone voids an interest invoice directly on the platform.
    pub fn void_invoice(&mut self, id: &str) -> InterestResult<()> {
        self.invoice_mut(id)?.status = InvoiceStatus::Voided;
        Ok(())
    }

    // ── Fault injection ────────────────────────────────────────────

    /// Every later mutation of invoice `id` fails validation.
    pub fn reject_updates_for(&mut self, id: &str) {
        self.reject_updates.insert(id.to_string());
    }

    pub fn expire_auth(&mut self) {
        self.auth_expired = true;
    }

    pub fn go_offline(&mut self) {
        self.unreachable = true;
    }

    fn check_session(&self) -> InterestResult<()> {
        if self.auth_expired {
            return Err(InterestError::Auth("access token expired".into()));
        }
        if self.unreachable {
            return Err(InterestError::Unreachable("connection refused".into()));
        }
        Ok(())
    }

    fn invoice_mut(&mut self, id: &str) -> InterestResult<&mut SandboxInvoice> {
        self.invoices
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| InterestError::InvoiceNotFound { id: id.to_string() })
    }

    /// Mutable access to an invoice that may still be edited.
    fn editable(&mut self, id: &str) -> InterestResult<&mut SandboxInvoice> {
        self.check_session()?;
        if self.reject_updates.contains(id) {
            return Err(InterestError::rejected(id, "validation error"));
        }
        let inv = self.invoice_mut(id)?;
        if inv.is_locked() {
            return Err(InterestError::rejected(
                id,
                format!("invoice is {} and cannot be edited", inv.status.as_str()),
            ));
        }
        Ok(inv)
    }
}

impl AccountingClient for SandboxAccounting {
    fn get_overdue_invoices(
        &mut self,
        contact_id: &str,
        min_days_overdue: i64,
        currency: Option<&str>,
        as_of: NaiveDate,
    ) -> InterestResult<Vec<SourceInvoice>> {
        self.check_session()?;
        Ok(self
            .sources
            .iter()
            .filter(|s| s.contact_id == contact_id)
            .filter(|s| matches!(s.status, InvoiceStatus::Authorised | InvoiceStatus::Submitted))
            .filter(|s| s.amount_due > 0.0)
            .filter(|s| s.days_overdue(as_of) >= min_days_overdue.max(1))
            .filter(|s| currency.map_or(true, |c| s.currency.as_deref() == Some(c)))
            .cloned()
            .collect())
    }

    fn get_invoice(&mut self, id: &str) -> InterestResult<SourceInvoice> {
        self.check_session()?;
        self.source(id)
            .cloned()
            .ok_or_else(|| InterestError::InvoiceNotFound { id: id.to_string() })
    }

    fn find_invoice_by_reference(&mut self, reference: &str) -> InterestResult<Option<InvoiceHeader>> {
        self.check_session()?;
        Ok(self.invoice_by_reference(reference).map(SandboxInvoice::header))
    }

    fn invoice_header(&mut self, id: &str) -> InterestResult<InvoiceHeader> {
        self.check_session()?;
        self.invoice(id)
            .map(SandboxInvoice::header)
            .ok_or_else(|| InterestError::InvoiceNotFound { id: id.to_string() })
    }

    fn move_to_draft(&mut self, id: &str) -> InterestResult<()> {
        self.editable(id)?.status = InvoiceStatus::Draft;
        Ok(())
    }

    fn update_line_items(&mut self, id: &str, lines: &[LineItem]) -> InterestResult<()> {
        if lines.is_empty() {
            return Err(InterestError::rejected(id, "an invoice needs at least one line item"));
        }
        self.editable(id)?.line_items = lines.to_vec();
        Ok(())
    }

    fn update_dates(&mut self, id: &str, invoice_date: NaiveDate, due_date: NaiveDate) -> InterestResult<()> {
        let inv = self.editable(id)?;
        inv.invoice_date = invoice_date;
        inv.due_date = due_date;
        Ok(())
    }

    fn authorize(&mut self, id: &str) -> InterestResult<()> {
        let inv = self.editable(id)?;
        inv.status = InvoiceStatus::Authorised;
        Ok(())
    }

    fn create_invoice(&mut self, invoice: &NewInvoice) -> InterestResult<CreatedDocument> {
        self.check_session()?;
        if invoice.line_items.is_empty() {
            return Err(InterestError::rejected("<new>", "an invoice needs at least one line item"));
        }
        self.next_invoice_seq += 1;
        let seq = self.next_invoice_seq;
        let doc = CreatedDocument {
            id: format!("inv-{seq:04}"),
            number: format!("INV-{seq:04}"),
        };
        self.invoices.push(SandboxInvoice {
            id: doc.id.clone(),
            number: doc.number.clone(),
            contact_id: invoice.contact_id.clone(),
            contact_name: invoice.contact_name.clone(),
            status: invoice.status,
            reference: invoice.reference.clone(),
            invoice_date: invoice.invoice_date,
            due_date: invoice.due_date,
            currency: invoice.currency.clone(),
            line_items: invoice.line_items.clone(),
            amount_paid: 0.0,
            has_allocations: false,
            history: Vec::new(),
        });
        Ok(doc)
    }

    fn create_credit_note(&mut self, note: &NewCreditNote) -> InterestResult<CreatedDocument> {
        self.check_session()?;
        if note.line_items.is_empty() {
            return Err(InterestError::rejected("<new>", "a credit note needs at least one line item"));
        }
        self.next_credit_seq += 1;
        let seq = self.next_credit_seq;
        let doc = CreatedDocument {
            id: format!("cn-{seq:04}"),
            number: format!("CN-{seq:04}"),
        };
        self.credit_notes.push(SandboxCreditNote {
            id: doc.id.clone(),
            number: doc.number.clone(),
            contact_id: note.contact_id.clone(),
            reference: note.reference.clone(),
            date: note.date,
            line_items: note.line_items.clone(),
            history: Vec::new(),
        });
        Ok(doc)
    }

    fn is_voided(&mut self, id: &str) -> InterestResult<bool> {
        self.check_session()?;
        self.invoice(id)
            .map(|i| i.status.is_cancelled())
            .ok_or_else(|| InterestError::InvoiceNotFound { id: id.to_string() })
    }

    fn add_history_note(&mut self, id: &str, text: &str) -> InterestResult<()> {
        self.check_session()?;
        if let Some(inv) = self.invoices.iter_mut().find(|i| i.id == id) {
            inv.history.push(text.to_string());
            return Ok(());
        }
        if let Some(cn) = self.credit_notes.iter_mut().find(|c| c.id == id) {
            cn.history.push(text.to_string());
            return Ok(());
        }
        Err(InterestError::InvoiceNotFound { id: id.to_string() })
    }
}
