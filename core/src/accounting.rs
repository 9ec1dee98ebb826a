//! The accounting-platform boundary.
//!
//! RULE: the engine only talks to the platform through `AccountingClient`.
//! Implementations own transport, auth and payload mapping; the engine sees
//! canonical types only.

use crate::{
    error::InterestResult,
    invoice::{InvoiceStatus, LineItem, SourceInvoice},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Summary of an invoice the engine owns (an interest invoice).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub id:          String,
    pub number:      String,
    pub status:      InvoiceStatus,
    pub reference:   Option<String>,
    pub total:       f64,
    pub amount_paid: f64,
    /// A credit note has been allocated against this invoice.
    pub has_allocations: bool,
}

/// Result of `get_or_create_interest_invoice`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestInvoiceRef {
    pub id:     String,
    pub number: String,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiability {
    pub can_modify: bool,
    pub status:     InvoiceStatus,
    pub is_paid:    bool,
}

impl Modifiability {
    pub fn from_header(h: &InvoiceHeader) -> Self {
        let is_paid = h.status == InvoiceStatus::Paid || h.amount_paid > 0.0;
        Self {
            can_modify: !is_paid && !h.has_allocations && !h.status.is_cancelled(),
            status: h.status,
            is_paid,
        }
    }
}

/// A document the platform created for us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDocument {
    pub id:     String,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub contact_id:   String,
    pub contact_name: String,
    pub reference:    Option<String>,
    pub invoice_date: NaiveDate,
    pub due_date:     NaiveDate,
    pub currency:     Option<String>,
    pub line_items:   Vec<LineItem>,
    /// `Draft` or `Authorised`.
    pub status:       InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCreditNote {
    pub contact_id:   String,
    pub contact_name: String,
    pub reference:    Option<String>,
    pub date:         NaiveDate,
    pub currency:     Option<String>,
    pub line_items:   Vec<LineItem>,
}

/// What the engine needs from the accounting platform.
///
/// Methods take `&mut self`: a batch run owns its client handle exclusively.
pub trait AccountingClient {
    /// Invoices of `contact_id` at least `min_days_overdue` days past due on
    /// `as_of`, with payment and credit-note history embedded.
    fn get_overdue_invoices(
        &mut self,
        contact_id: &str,
        min_days_overdue: i64,
        currency: Option<&str>,
        as_of: NaiveDate,
    ) -> InterestResult<Vec<SourceInvoice>>;

    /// One source invoice by id, with history embedded.
    fn get_invoice(&mut self, id: &str) -> InterestResult<SourceInvoice>;

    /// Newest non-voided, non-deleted invoice carrying `reference`, if any.
    fn find_invoice_by_reference(&mut self, reference: &str) -> InterestResult<Option<InvoiceHeader>>;

    fn invoice_header(&mut self, id: &str) -> InterestResult<InvoiceHeader>;

    fn move_to_draft(&mut self, id: &str) -> InterestResult<()>;

    /// Replace the whole line-item set.
    fn update_line_items(&mut self, id: &str, lines: &[LineItem]) -> InterestResult<()>;

    fn update_dates(&mut self, id: &str, invoice_date: NaiveDate, due_date: NaiveDate) -> InterestResult<()>;

    fn authorize(&mut self, id: &str) -> InterestResult<()>;

    fn create_invoice(&mut self, invoice: &NewInvoice) -> InterestResult<CreatedDocument>;

    fn create_credit_note(&mut self, note: &NewCreditNote) -> InterestResult<CreatedDocument>;

    fn is_voided(&mut self, id: &str) -> InterestResult<bool>;

    fn add_history_note(&mut self, id: &str, text: &str) -> InterestResult<()>;

    fn can_modify_invoice(&mut self, id: &str) -> InterestResult<Modifiability> {
        let header = self.invoice_header(id)?;
        Ok(Modifiability::from_header(&header))
    }

    /// Reuse the live invoice tagged with `reference`, or create a draft
    /// carrying a single placeholder line and that reference.
    #[allow(clippy::too_many_arguments)]
    fn get_or_create_interest_invoice(
        &mut self,
        contact_id: &str,
        contact_name: &str,
        reference: &str,
        invoice_date: NaiveDate,
        due_date: NaiveDate,
        currency: Option<&str>,
        placeholder: LineItem,
    ) -> InterestResult<InterestInvoiceRef> {
        if let Some(existing) = self.find_invoice_by_reference(reference)? {
            return Ok(InterestInvoiceRef {
                id: existing.id,
                number: existing.number,
                is_new: false,
            });
        }
        let created = self.create_invoice(&NewInvoice {
            contact_id: contact_id.to_string(),
            contact_name: contact_name.to_string(),
            reference: Some(reference.to_string()),
            invoice_date,
            due_date,
            currency: currency.map(str::to_string),
            line_items: vec![placeholder],
            status: InvoiceStatus::Draft,
        })?;
        log::info!("created interest invoice {} for reference {reference}", created.number);
        Ok(InterestInvoiceRef {
            id: created.id,
            number: created.number,
            is_new: true,
        })
    }
}
