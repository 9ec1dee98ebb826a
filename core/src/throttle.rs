//! Cooperative pacing of accounting API calls.
//!
//! The platform caps requests per minute. Every call through `Throttled`
//! first sleeps until at least `min_spacing` has passed since the previous
//! call. There is a single execution thread, so there is no queue.

use crate::{
    accounting::{
        AccountingClient, CreatedDocument, InvoiceHeader, NewCreditNote, NewInvoice,
    },
    error::InterestResult,
    invoice::{LineItem, SourceInvoice},
};
use chrono::NaiveDate;
use std::time::{Duration, Instant};

pub struct Throttled<C> {
    inner:       C,
    min_spacing: Duration,
    last_call:   Option<Instant>,
    calls:       u64,
}

impl<C: AccountingClient> Throttled<C> {
    pub fn new(inner: C, min_spacing: Duration) -> Self {
        Self {
            inner,
            min_spacing,
            last_call: None,
            calls: 0,
        }
    }

    pub fn from_millis(inner: C, millis: u64) -> Self {
        Self::new(inner, Duration::from_millis(millis))
    }

    /// Number of platform calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_spacing {
                std::thread::sleep(self.min_spacing - elapsed);
            }
        }
        self.last_call = Some(Instant::now());
        self.calls += 1;
    }
}

impl<C: AccountingClient> AccountingClient for Throttled<C> {
    fn get_overdue_invoices(
        &mut self,
        contact_id: &str,
        min_days_overdue: i64,
        currency: Option<&str>,
        as_of: NaiveDate,
    ) -> InterestResult<Vec<SourceInvoice>> {
        self.pace();
        self.inner.get_overdue_invoices(contact_id, min_days_overdue, currency, as_of)
    }

    fn get_invoice(&mut self, id: &str) -> InterestResult<SourceInvoice> {
        self.pace();
        self.inner.get_invoice(id)
    }

    fn find_invoice_by_reference(&mut self, reference: &str) -> InterestResult<Option<InvoiceHeader>> {
        self.pace();
        self.inner.find_invoice_by_reference(reference)
    }

    fn invoice_header(&mut self, id: &str) -> InterestResult<InvoiceHeader> {
        self.pace();
        self.inner.invoice_header(id)
    }

    fn move_to_draft(&mut self, id: &str) -> InterestResult<()> {
        self.pace();
        self.inner.move_to_draft(id)
    }

    fn update_line_items(&mut self, id: &str, lines: &[LineItem]) -> InterestResult<()> {
        self.pace();
        self.inner.update_line_items(id, lines)
    }

    fn update_dates(&mut self, id: &str, invoice_date: NaiveDate, due_date: NaiveDate) -> InterestResult<()> {
        self.pace();
        self.inner.update_dates(id, invoice_date, due_date)
    }

    fn authorize(&mut self, id: &str) -> InterestResult<()> {
        self.pace();
        self.inner.authorize(id)
    }

    fn create_invoice(&mut self, invoice: &NewInvoice) -> InterestResult<CreatedDocument> {
        self.pace();
        self.inner.create_invoice(invoice)
    }

    fn create_credit_note(&mut self, note: &NewCreditNote) -> InterestResult<CreatedDocument> {
        self.pace();
        self.inner.create_credit_note(note)
    }

    fn is_voided(&mut self, id: &str) -> InterestResult<bool> {
        self.pace();
        self.inner.is_voided(id)
    }

    fn add_history_note(&mut self, id: &str, text: &str) -> InterestResult<()> {
        self.pace();
        self.inner.add_history_note(id, text)
    }
}
