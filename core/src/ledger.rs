//! Interest ledger: the append-only record of every charge and credit.
//!
//! RULE: the amount currently charged for a (source invoice, period) is the
//! sum of that key's deltas. Nothing ever edits an entry in place.

use crate::{config::InterestConfig, error::InterestResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bucket an entry belongs to: the running total or one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PeriodKey {
    Running,
    /// `YYYY-MM`
    Month(String),
}

impl PeriodKey {
    pub fn as_str(&self) -> &str {
        match self {
            PeriodKey::Running => "running",
            PeriodKey::Month(m) => m,
        }
    }

    pub fn month(date: NaiveDate) -> Self {
        PeriodKey::Month(crate::dates::month_key(date))
    }

    /// First day of the month for a month key; `None` for the running key.
    pub fn month_start(&self) -> Option<NaiveDate> {
        match self {
            PeriodKey::Running => None,
            PeriodKey::Month(m) => NaiveDate::parse_from_str(&format!("{m}-01"), "%Y-%m-%d").ok(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "running" {
            return Some(PeriodKey::Running);
        }
        let (y, m) = raw.split_once('-')?;
        let valid = y.len() == 4
            && m.len() == 2
            && y.chars().all(|c| c.is_ascii_digit())
            && matches!(m.parse::<u32>(), Ok(1..=12));
        valid.then(|| PeriodKey::Month(raw.to_string()))
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PeriodKey> for String {
    fn from(k: PeriodKey) -> Self {
        k.as_str().to_string()
    }
}

impl TryFrom<String> for PeriodKey {
    type Error = String;
    fn try_from(raw: String) -> Result<Self, Self::Error> {
        PeriodKey::parse(&raw).ok_or_else(|| format!("invalid period key '{raw}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Created,
    Updated,
    Credited,
    AdditionalCharge,
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAction::Created          => "created",
            LedgerAction::Updated          => "updated",
            LedgerAction::Credited         => "credited",
            LedgerAction::AdditionalCharge => "additional_charge",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created"           => Some(LedgerAction::Created),
            "updated"           => Some(LedgerAction::Updated),
            "credited"          => Some(LedgerAction::Credited),
            "additional_charge" => Some(LedgerAction::AdditionalCharge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Initial,
    DueDateChanged,
    PartialPayment,
    SourceVoided,
    PrincipalChanged,
    DailyAccrual,
    ManualAdjustment,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Initial          => "initial",
            ReasonCode::DueDateChanged   => "due_date_changed",
            ReasonCode::PartialPayment   => "partial_payment",
            ReasonCode::SourceVoided     => "source_voided",
            ReasonCode::PrincipalChanged => "principal_changed",
            ReasonCode::DailyAccrual     => "daily_accrual",
            ReasonCode::ManualAdjustment => "manual_adjustment",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initial"           => Some(ReasonCode::Initial),
            "due_date_changed"  => Some(ReasonCode::DueDateChanged),
            "partial_payment"   => Some(ReasonCode::PartialPayment),
            "source_voided"     => Some(ReasonCode::SourceVoided),
            "principal_changed" => Some(ReasonCode::PrincipalChanged),
            "daily_accrual"     => Some(ReasonCode::DailyAccrual),
            "manual_adjustment" => Some(ReasonCode::ManualAdjustment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestLedgerEntry {
    /// Assigned by the store on insert.
    pub id:                     Option<String>,
    pub source_invoice_id:      String,
    pub source_invoice_number:  String,
    pub interest_invoice_id:    String,
    pub interest_invoice_number: String,
    pub period:                 PeriodKey,
    pub action:                 LedgerAction,
    pub previous_amount:        f64,
    pub new_amount:             f64,
    pub delta:                  f64,
    pub reason:                 ReasonCode,
    pub source_due_date:        NaiveDate,
    pub source_amount_due:      f64,
    pub days_overdue:           i64,
    pub annual_rate:            f64,
    pub credit_note_id:         Option<String>,
    pub credit_note_number:     Option<String>,
    pub contact_id:             String,
    pub contact_name:           String,
    pub created_at:             DateTime<Utc>,
    pub notes:                  Option<String>,
}

/// Persistence the engine needs from the ledger.
///
/// `create_entry` must preserve insertion order per (source, period):
/// `latest_entry_for_invoice` returns the most recently appended entry.
pub trait LedgerStore {
    fn create_entry(&self, entry: &InterestLedgerEntry) -> InterestResult<String>;

    /// `period = None` looks across every period of the source invoice.
    fn latest_entry_for_invoice(
        &self,
        source_invoice_id: &str,
        period: Option<&PeriodKey>,
    ) -> InterestResult<Option<InterestLedgerEntry>>;

    fn sum_deltas_for_invoice(
        &self,
        source_invoice_id: &str,
        period: Option<&PeriodKey>,
    ) -> InterestResult<f64>;

    /// Source invoices of `contact_id` whose deltas for `period` do not net to zero.
    fn sources_with_balance(
        &self,
        contact_id: &str,
        period: &PeriodKey,
    ) -> InterestResult<Vec<String>>;

    /// Source invoices of `contact_id` with a non-zero balance in any period.
    fn sources_with_any_balance(&self, contact_id: &str) -> InterestResult<Vec<String>>;

    /// Net charged amount per period for one source invoice, ordered by period.
    fn charged_by_period(&self, source_invoice_id: &str) -> InterestResult<Vec<(PeriodKey, f64)>>;

    fn active_configs(&self) -> InterestResult<Vec<InterestConfig>>;

    fn update_config_last_run(
        &self,
        config_id: &str,
        at: DateTime<Utc>,
        interest_invoice_id: Option<&str>,
    ) -> InterestResult<()>;
}
