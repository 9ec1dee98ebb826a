use super::{conversion_error, timestamp_from_sql, InterestStore};
use crate::{
    config::{BillingMode, InterestConfig},
    error::{InterestError, InterestResult},
};
use rusqlite::{params, OptionalExtension, Row};

const CONFIG_COLUMNS: &str = "config_id, contact_id, contact_name, annual_rate,
    grace_days, min_charge_amount, currency, active, mode, last_run_at,
    last_invoice_id, notes";

impl InterestStore {
    fn map_config_row(row: &Row<'_>) -> rusqlite::Result<InterestConfig> {
        let mode_raw: String = row.get(8)?;
        let last_run_raw: Option<String> = row.get(9)?;
        Ok(InterestConfig {
            config_id: row.get(0)?,
            contact_id: row.get(1)?,
            contact_name: row.get(2)?,
            annual_rate: row.get(3)?,
            grace_days: row.get(4)?,
            min_charge_amount: row.get(5)?,
            currency: row.get(6)?,
            active: row.get::<_, i64>(7)? != 0,
            mode: BillingMode::parse(&mode_raw)
                .ok_or_else(|| conversion_error(8, format!("bad mode '{mode_raw}'")))?,
            last_run_at: last_run_raw
                .as_deref()
                .map(|raw| timestamp_from_sql(9, raw))
                .transpose()?,
            last_invoice_id: row.get(10)?,
            notes: row.get(11)?,
        })
    }

    /// Insert a new client config. Fails if the id is taken.
    pub fn insert_config(&self, c: &InterestConfig) -> InterestResult<()> {
        c.validate().map_err(InterestError::Config)?;
        self.conn.execute(
            "INSERT INTO interest_config (
                config_id, contact_id, contact_name, annual_rate, grace_days,
                min_charge_amount, currency, active, mode, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                c.config_id,
                c.contact_id,
                c.contact_name,
                c.annual_rate,
                c.grace_days,
                c.min_charge_amount,
                c.currency,
                c.active as i64,
                c.mode.as_str(),
                c.notes,
            ],
        )?;
        Ok(())
    }

    pub fn get_config(&self, config_id: &str) -> InterestResult<Option<InterestConfig>> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM interest_config WHERE config_id = ?1");
        let cfg = self
            .conn
            .query_row(&sql, params![config_id], |row| Self::map_config_row(row))
            .optional()?;
        Ok(cfg)
    }

    /// All configs, or only active ones.
    pub fn configs(&self, active_only: bool) -> InterestResult<Vec<InterestConfig>> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM interest_config
             WHERE (?1 = 0 OR active = 1)
             ORDER BY contact_name ASC, config_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![active_only as i64], |row| Self::map_config_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deactivate instead of deleting; ledger history stays attached.
    pub fn set_config_active(&self, config_id: &str, active: bool) -> InterestResult<()> {
        self.conn.execute(
            "UPDATE interest_config SET active = ?1 WHERE config_id = ?2",
            params![active as i64, config_id],
        )?;
        Ok(())
    }

    pub fn config_count(&self) -> InterestResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM interest_config", [], |row| row.get(0))?;
        Ok(count)
    }
}
