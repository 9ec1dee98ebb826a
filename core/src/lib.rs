//! interest-core: overdue-invoice interest accrual, reconciled against an
//! external accounting platform through an append-only ledger.
//!
//! Layering, leaf first:
//!   money, dates        amounts and day counts
//!   invoice, payload    canonical source invoice and its payload mapping
//!   timeline            balance-period interest calculator
//!   ledger, store       ledger types, `LedgerStore`, SQLite implementation
//!   accounting          `AccountingClient` boundary (sandbox, throttle)
//!   orchestrator        platform mutations for one interest invoice
//!   reconcile, monthly  running-total and month-bucketed reconciliation
//!   engine              batch over every active client

pub mod accounting;
pub mod config;
pub mod context;
pub mod dates;
pub mod engine;
pub mod error;
pub mod invoice;
pub mod ledger;
pub mod money;
pub mod monthly;
pub mod orchestrator;
pub mod payload;
pub mod reconcile;
pub mod sandbox;
pub mod store;
pub mod throttle;
pub mod timeline;
