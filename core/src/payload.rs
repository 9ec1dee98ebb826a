//! Normalization of accounting-platform invoice payloads.
//!
//! The platform's JSON comes in PascalCase (`InvoiceID`, `DueDate`) from the
//! API and in camelCase (`invoiceId`, `dueDate`) from SDK-cached copies.
//! Both are accepted here and mapped into the one canonical `SourceInvoice`.

use crate::{
    dates::parse_date,
    error::{InterestError, InterestResult},
    invoice::{BalanceEvent, BalanceEventKind, InvoiceStatus, SourceInvoice},
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RawContact {
    #[serde(rename = "ContactID", alias = "contactID", alias = "contactId", default)]
    pub contact_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPayment {
    #[serde(rename = "Date", alias = "date")]
    pub date: String,
    #[serde(rename = "Amount", alias = "amount", default)]
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCreditNote {
    #[serde(rename = "Date", alias = "date")]
    pub date: String,
    #[serde(rename = "AppliedAmount", alias = "appliedAmount", default)]
    pub applied_amount: Option<f64>,
    #[serde(rename = "Total", alias = "total", default)]
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInvoice {
    #[serde(rename = "InvoiceID", alias = "invoiceID", alias = "invoiceId")]
    pub invoice_id: String,
    #[serde(rename = "InvoiceNumber", alias = "invoiceNumber", default)]
    pub invoice_number: String,
    #[serde(rename = "Contact", alias = "contact", default)]
    pub contact: Option<RawContact>,
    #[serde(rename = "Status", alias = "status")]
    pub status: String,
    #[serde(rename = "DateString", alias = "dateString", default)]
    pub date_string: Option<String>,
    #[serde(rename = "Date", alias = "date", default)]
    pub date: Option<String>,
    #[serde(rename = "DueDateString", alias = "dueDateString", default)]
    pub due_date_string: Option<String>,
    #[serde(rename = "DueDate", alias = "dueDate", default)]
    pub due_date: Option<String>,
    #[serde(rename = "Total", alias = "total", default)]
    pub total: f64,
    #[serde(rename = "AmountDue", alias = "amountDue", default)]
    pub amount_due: f64,
    #[serde(rename = "AmountPaid", alias = "amountPaid", default)]
    pub amount_paid: f64,
    #[serde(rename = "CurrencyCode", alias = "currencyCode", default)]
    pub currency_code: Option<String>,
    #[serde(rename = "Payments", alias = "payments", default)]
    pub payments: Vec<RawPayment>,
    #[serde(rename = "CreditNotes", alias = "creditNotes", default)]
    pub credit_notes: Vec<RawCreditNote>,
}

impl RawInvoice {
    /// Map into the canonical shape. Fails on a missing or unparseable due
    /// date or an unknown status; payments with unparseable dates fail too,
    /// since silently dropping one would overstate interest.
    pub fn into_source_invoice(self) -> InterestResult<SourceInvoice> {
        let status = InvoiceStatus::parse(&self.status).ok_or_else(|| {
            InterestError::Config(format!(
                "invoice {} has unknown status '{}'",
                self.invoice_id, self.status
            ))
        })?;

        let due_raw = self
            .due_date_string
            .or(self.due_date)
            .ok_or_else(|| InterestError::MalformedDate { raw: String::new() })?;
        let due_date = parse_date(&due_raw)?;

        let issue_date = match self.date_string.or(self.date) {
            Some(raw) => parse_date(&raw)?,
            None => due_date,
        };

        let payments = self
            .payments
            .iter()
            .map(|p| {
                Ok(BalanceEvent {
                    kind: BalanceEventKind::Payment,
                    date: parse_date(&p.date)?,
                    amount: p.amount,
                })
            })
            .collect::<InterestResult<Vec<_>>>()?;

        let credit_notes = self
            .credit_notes
            .iter()
            .map(|c| {
                Ok(BalanceEvent {
                    kind: BalanceEventKind::CreditNote,
                    date: parse_date(&c.date)?,
                    amount: c.applied_amount.or(c.total).unwrap_or(0.0),
                })
            })
            .collect::<InterestResult<Vec<_>>>()?;

        Ok(SourceInvoice {
            id: self.invoice_id,
            number: self.invoice_number,
            contact_id: self.contact.map(|c| c.contact_id).unwrap_or_default(),
            status,
            issue_date,
            due_date,
            total: self.total,
            amount_due: self.amount_due,
            amount_paid: self.amount_paid,
            currency: self.currency_code,
            payments,
            credit_notes,
        })
    }
}

/// Parse one invoice from any accepted JSON shape.
pub fn normalize_invoice(value: serde_json::Value) -> InterestResult<SourceInvoice> {
    let raw: RawInvoice = serde_json::from_value(value)?;
    raw.into_source_invoice()
}
