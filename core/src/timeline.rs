//! Timeline interest calculator.
//!
//! Interest follows the invoice's historical balance: a partial payment
//! reduces principal from its payment date forward, never retroactively.
//! Time after the due date is split into balance-constant periods and
//! interest is computed and rounded per period.

use crate::{
    dates::{add_days, days_between},
    invoice::SourceInvoice,
    money::{simple_interest, sum_money},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Rate terms for one client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Percent per annum (24.0 = 24 %).
    pub annual_rate: f64,
    /// Days after the due date before interest starts.
    pub grace_days: i64,
}

/// A half-open span `[start, end)` over which the balance did not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancePeriod {
    pub start:            NaiveDate,
    pub end:              NaiveDate,
    pub balance:          f64,
    pub days:             i64,
    pub days_after_grace: i64,
    pub interest:         f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimelineInterest {
    pub periods:                Vec<BalancePeriod>,
    pub total_interest:         f64,
    pub total_days_overdue:     i64,
    pub effective_days_charged: i64,
}

pub fn grace_end(due_date: NaiveDate, rate: &RateConfig) -> NaiveDate {
    add_days(due_date, rate.grace_days.max(0))
}

/// Compute interest owed on `invoice` as of `as_of`.
///
/// Events dated after `as_of` are ignored: they have not happened yet from
/// the point of view of this calculation.
pub fn compute_timeline_interest(
    invoice: &SourceInvoice,
    rate: &RateConfig,
    as_of: NaiveDate,
) -> TimelineInterest {
    let due = invoice.due_date;
    if as_of <= due {
        return TimelineInterest::default();
    }

    let events = invoice.balance_events();
    let grace_end = grace_end(due, rate);

    let settled_by_due = events.iter().filter(|e| e.date <= due).map(|e| -e.amount);
    let mut balance = sum_money(std::iter::once(invoice.total).chain(settled_by_due)).max(0.0);

    let mut spans: Vec<(NaiveDate, NaiveDate, f64)> = Vec::new();
    let mut cursor = due;
    for ev in events.iter().filter(|e| e.date > due && e.date <= as_of) {
        if ev.date > cursor && balance > 0.0 {
            spans.push((cursor, ev.date, balance));
        }
        balance = sum_money([balance, -ev.amount]).max(0.0);
        cursor = ev.date;
    }
    if cursor < as_of && balance > 0.0 {
        spans.push((cursor, as_of, balance));
    }

    let periods: Vec<BalancePeriod> = spans
        .into_iter()
        .map(|(start, end, balance)| build_period(start, end, balance, grace_end, rate))
        .filter(|p| p.days > 0)
        .collect();

    let total_interest = sum_money(periods.iter().map(|p| p.interest));
    let effective_days_charged = periods.iter().map(|p| p.days_after_grace).sum();

    TimelineInterest {
        periods,
        total_interest,
        total_days_overdue: days_between(due, as_of),
        effective_days_charged,
    }
}

fn build_period(
    start: NaiveDate,
    end: NaiveDate,
    balance: f64,
    grace_end: NaiveDate,
    rate: &RateConfig,
) -> BalancePeriod {
    let days = days_between(start, end);
    let charged_from = start.max(grace_end);
    let days_after_grace = days_between(charged_from, end).max(0);
    BalancePeriod {
        start,
        end,
        balance,
        days,
        days_after_grace,
        interest: simple_interest(balance, rate.annual_rate, days_after_grace),
    }
}
