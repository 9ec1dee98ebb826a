use super::{
    conversion_error, date_from_sql, date_to_sql, timestamp_from_sql, timestamp_to_sql,
    InterestStore,
};
use crate::{
    config::InterestConfig,
    error::{InterestError, InterestResult},
    ledger::{InterestLedgerEntry, LedgerAction, LedgerStore, PeriodKey, ReasonCode},
    money::{is_negligible, sum_money},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};

const ENTRY_COLUMNS: &str = "entry_id, source_invoice_id, source_invoice_number,
    interest_invoice_id, interest_invoice_number, period_key, action,
    previous_amount, new_amount, delta, reason, source_due_date,
    source_amount_due, days_overdue, annual_rate, credit_note_id,
    credit_note_number, contact_id, contact_name, created_at, notes";

impl InterestStore {
    fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<InterestLedgerEntry> {
        let period_raw: String = row.get(5)?;
        let action_raw: String = row.get(6)?;
        let reason_raw: String = row.get(10)?;
        let due_raw: String = row.get(11)?;
        let created_raw: String = row.get(19)?;
        Ok(InterestLedgerEntry {
            id: Some(row.get(0)?),
            source_invoice_id: row.get(1)?,
            source_invoice_number: row.get(2)?,
            interest_invoice_id: row.get(3)?,
            interest_invoice_number: row.get(4)?,
            period: PeriodKey::parse(&period_raw)
                .ok_or_else(|| conversion_error(5, format!("bad period '{period_raw}'")))?,
            action: LedgerAction::parse(&action_raw)
                .ok_or_else(|| conversion_error(6, format!("bad action '{action_raw}'")))?,
            previous_amount: row.get(7)?,
            new_amount: row.get(8)?,
            delta: row.get(9)?,
            reason: ReasonCode::parse(&reason_raw)
                .ok_or_else(|| conversion_error(10, format!("bad reason '{reason_raw}'")))?,
            source_due_date: date_from_sql(11, &due_raw)?,
            source_amount_due: row.get(12)?,
            days_overdue: row.get(13)?,
            annual_rate: row.get(14)?,
            credit_note_id: row.get(15)?,
            credit_note_number: row.get(16)?,
            contact_id: row.get(17)?,
            contact_name: row.get(18)?,
            created_at: timestamp_from_sql(19, &created_raw)?,
            notes: row.get(20)?,
        })
    }

    /// Full chronological history of a source invoice, optionally for one period.
    pub fn entries_for_invoice(
        &self,
        source_invoice_id: &str,
        period: Option<&PeriodKey>,
    ) -> InterestResult<Vec<InterestLedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM interest_ledger
             WHERE source_invoice_id = ?1 AND (?2 IS NULL OR period_key = ?2)
             ORDER BY seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![source_invoice_id, period.map(PeriodKey::as_str)],
                |row| Self::map_entry_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deltas matching `(source, period?)` in append order.
    fn deltas(&self, source_invoice_id: &str, period: Option<&PeriodKey>) -> InterestResult<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT delta FROM interest_ledger
             WHERE source_invoice_id = ?1 AND (?2 IS NULL OR period_key = ?2)
             ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![source_invoice_id, period.map(PeriodKey::as_str)], |row| row.get(0))?
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(rows)
    }

    /// Net balance per (source, period) key of one contact, keyed in
    /// first-appended order.
    fn contact_balances(&self, contact_id: &str) -> InterestResult<Vec<(String, String, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_invoice_id, period_key, delta
             FROM interest_ledger
             WHERE contact_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![contact_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys: Vec<(String, String)> = Vec::new();
        let mut deltas: HashMap<(String, String), Vec<f64>> = HashMap::new();
        for (source, period, delta) in rows {
            let key = (source, period);
            if !deltas.contains_key(&key) {
                keys.push(key.clone());
            }
            deltas.entry(key).or_default().push(delta);
        }
        Ok(keys
            .into_iter()
            .map(|key| {
                let balance = sum_money(deltas.remove(&key).unwrap_or_default());
                (key.0, key.1, balance)
            })
            .collect())
    }

    pub fn ledger_entry_count(&self) -> InterestResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM interest_ledger", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl LedgerStore for InterestStore {
    fn create_entry(&self, entry: &InterestLedgerEntry) -> InterestResult<String> {
        let entry_id = entry
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.conn.execute(
            "INSERT INTO interest_ledger (
                entry_id, source_invoice_id, source_invoice_number,
                interest_invoice_id, interest_invoice_number, period_key, action,
                previous_amount, new_amount, delta, reason, source_due_date,
                source_amount_due, days_overdue, annual_rate, credit_note_id,
                credit_note_number, contact_id, contact_name, created_at, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                      ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                entry_id,
                entry.source_invoice_id,
                entry.source_invoice_number,
                entry.interest_invoice_id,
                entry.interest_invoice_number,
                entry.period.as_str(),
                entry.action.as_str(),
                entry.previous_amount,
                entry.new_amount,
                entry.delta,
                entry.reason.as_str(),
                date_to_sql(entry.source_due_date),
                entry.source_amount_due,
                entry.days_overdue,
                entry.annual_rate,
                entry.credit_note_id,
                entry.credit_note_number,
                entry.contact_id,
                entry.contact_name,
                timestamp_to_sql(entry.created_at),
                entry.notes,
            ],
        )?;
        Ok(entry_id)
    }

    fn latest_entry_for_invoice(
        &self,
        source_invoice_id: &str,
        period: Option<&PeriodKey>,
    ) -> InterestResult<Option<InterestLedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM interest_ledger
             WHERE source_invoice_id = ?1 AND (?2 IS NULL OR period_key = ?2)
             ORDER BY seq DESC LIMIT 1"
        );
        let entry = self
            .conn
            .query_row(
                &sql,
                params![source_invoice_id, period.map(PeriodKey::as_str)],
                |row| Self::map_entry_row(row),
            )
            .optional()?;
        Ok(entry)
    }

    fn sum_deltas_for_invoice(
        &self,
        source_invoice_id: &str,
        period: Option<&PeriodKey>,
    ) -> InterestResult<f64> {
        Ok(sum_money(self.deltas(source_invoice_id, period)?))
    }

    fn sources_with_balance(&self, contact_id: &str, period: &PeriodKey) -> InterestResult<Vec<String>> {
        Ok(self
            .contact_balances(contact_id)?
            .into_iter()
            .filter(|(_, p, balance)| p == period.as_str() && !is_negligible(*balance))
            .map(|(source, _, _)| source)
            .collect())
    }

    fn sources_with_any_balance(&self, contact_id: &str) -> InterestResult<Vec<String>> {
        let mut sources: Vec<String> = Vec::new();
        for (source, _, balance) in self.contact_balances(contact_id)? {
            if !is_negligible(balance) && !sources.contains(&source) {
                sources.push(source);
            }
        }
        Ok(sources)
    }

    fn charged_by_period(&self, source_invoice_id: &str) -> InterestResult<Vec<(PeriodKey, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT period_key, delta
             FROM interest_ledger
             WHERE source_invoice_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![source_invoice_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_period: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (period, delta) in rows {
            by_period.entry(period).or_default().push(delta);
        }
        by_period
            .into_iter()
            .map(|(raw, deltas)| {
                let period = PeriodKey::parse(&raw).ok_or_else(|| {
                    InterestError::Database(conversion_error(0, format!("bad period '{raw}'")))
                })?;
                Ok((period, sum_money(deltas)))
            })
            .collect()
    }

    fn active_configs(&self) -> InterestResult<Vec<InterestConfig>> {
        self.configs(true)
    }

    fn update_config_last_run(
        &self,
        config_id: &str,
        at: DateTime<Utc>,
        interest_invoice_id: Option<&str>,
    ) -> InterestResult<()> {
        self.conn.execute(
            "UPDATE interest_config
             SET last_run_at = ?1,
                 last_invoice_id = COALESCE(?2, last_invoice_id)
             WHERE config_id = ?3",
            params![timestamp_to_sql(at), interest_invoice_id, config_id],
        )?;
        Ok(())
    }
}
