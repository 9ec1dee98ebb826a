//! Canonical invoice shapes used inside the engine.
//!
//! Anything coming off the wire is normalized by `payload.rs` first; the
//! engine only ever sees these types.

use crate::money::{round_money, sum_money, to_decimal, to_money};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lifecycle status as reported by the accounting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    Draft,
    Submitted,
    Authorised,
    Paid,
    Voided,
    Deleted,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft      => "DRAFT",
            InvoiceStatus::Submitted  => "SUBMITTED",
            InvoiceStatus::Authorised => "AUTHORISED",
            InvoiceStatus::Paid       => "PAID",
            InvoiceStatus::Voided     => "VOIDED",
            InvoiceStatus::Deleted    => "DELETED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DRAFT"                     => Some(InvoiceStatus::Draft),
            "SUBMITTED"                 => Some(InvoiceStatus::Submitted),
            "AUTHORISED" | "AUTHORIZED" => Some(InvoiceStatus::Authorised),
            "PAID"                      => Some(InvoiceStatus::Paid),
            "VOIDED" | "VOID"           => Some(InvoiceStatus::Voided),
            "DELETED"                   => Some(InvoiceStatus::Deleted),
            _ => None,
        }
    }

    /// Voided and deleted invoices no longer carry a receivable.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvoiceStatus::Voided | InvoiceStatus::Deleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceEventKind {
    Payment,
    CreditNote,
}

/// Anything that reduced the outstanding balance of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub kind:   BalanceEventKind,
    pub date:   NaiveDate,
    pub amount: f64,
}

/// An overdue receivable on the accounting platform. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInvoice {
    pub id:           String,
    pub number:       String,
    pub contact_id:   String,
    pub status:       InvoiceStatus,
    pub issue_date:   NaiveDate,
    pub due_date:     NaiveDate,
    pub total:        f64,
    pub amount_due:   f64,
    pub amount_paid:  f64,
    pub currency:     Option<String>,
    pub payments:     Vec<BalanceEvent>,
    pub credit_notes: Vec<BalanceEvent>,
}

impl SourceInvoice {
    /// Payments and applied credit notes merged and sorted by date.
    /// The sort is stable, so same-day events keep payment-first order.
    pub fn balance_events(&self) -> Vec<BalanceEvent> {
        let mut events: Vec<BalanceEvent> = self
            .payments
            .iter()
            .chain(self.credit_notes.iter())
            .cloned()
            .collect();
        events.sort_by_key(|e| e.date);
        events
    }

    /// Paid in full: nothing is outstanding any more.
    pub fn is_settled(&self) -> bool {
        self.status == InvoiceStatus::Paid || round_money(self.amount_due) <= 0.0
    }

    pub fn days_overdue(&self, as_of: NaiveDate) -> i64 {
        crate::dates::days_between(self.due_date, as_of).max(0)
    }
}

/// One line on an interest invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description:  String,
    pub quantity:     f64,
    pub unit_amount:  f64,
    pub account_code: Option<String>,
    /// Source invoice the line charges interest for; `None` on placeholders.
    pub source_invoice_id: Option<String>,
}

impl LineItem {
    pub fn amount(&self) -> f64 {
        to_money(to_decimal(self.quantity) * to_decimal(self.unit_amount))
    }

    /// Zero-value line; an invoice must always carry at least one line.
    pub fn placeholder(description: impl Into<String>, account_code: Option<String>) -> Self {
        Self {
            description: description.into(),
            quantity: 1.0,
            unit_amount: 0.0,
            account_code,
            source_invoice_id: None,
        }
    }
}

pub fn lines_total(lines: &[LineItem]) -> f64 {
    sum_money(lines.iter().map(LineItem::amount))
}
