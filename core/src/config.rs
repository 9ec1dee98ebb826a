use crate::timeline::RateConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a client's interest is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    /// One consolidated interest invoice, continuously updated.
    #[default]
    Running,
    /// One interest invoice per calendar month of accrual.
    Monthly,
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingMode::Running => "running",
            BillingMode::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(BillingMode::Running),
            "monthly" => Some(BillingMode::Monthly),
            _ => None,
        }
    }
}

/// Per-client interest terms. One row per billed contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestConfig {
    pub config_id:         String,
    pub contact_id:        String,
    pub contact_name:      String,
    /// Percent per annum (24.0 = 24 %).
    pub annual_rate:       f64,
    /// Minimum days overdue before interest accrues.
    pub grace_days:        i64,
    /// Per-invoice charges below this are suppressed.
    #[serde(default)]
    pub min_charge_amount: f64,
    #[serde(default)]
    pub currency:          Option<String>,
    #[serde(default = "default_true")]
    pub active:            bool,
    #[serde(default)]
    pub mode:              BillingMode,
    #[serde(default)]
    pub last_run_at:       Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_invoice_id:   Option<String>,
    #[serde(default)]
    pub notes:             Option<String>,
}

fn default_true() -> bool {
    true
}

impl InterestConfig {
    pub fn rate(&self) -> RateConfig {
        RateConfig {
            annual_rate: self.annual_rate,
            grace_days: self.grace_days,
        }
    }

    /// Apply the minimum-charge floor to a computed amount.
    pub fn chargeable(&self, amount: f64) -> f64 {
        if amount > 0.0 && amount < self.min_charge_amount {
            0.0
        } else {
            amount
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.contact_id.trim().is_empty() {
            return Err(format!("config {} has no contact id", self.config_id));
        }
        if !(self.annual_rate.is_finite() && self.annual_rate >= 0.0) {
            return Err(format!("config {} has invalid rate {}", self.config_id, self.annual_rate));
        }
        if self.grace_days < 0 {
            return Err(format!("config {} has negative grace period", self.config_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ClientsFile {
    clients: Vec<InterestConfig>,
}

/// Engine-wide settings, loaded from `<data_dir>/engine.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum spacing between accounting API calls.
    pub min_call_spacing_ms:   u64,
    /// Due-date window for supplemental invoices on paid interest invoices.
    pub supplemental_due_days: i64,
    /// Due date offset of interest invoices from their invoice date.
    pub invoice_due_days:      i64,
    /// Prefix of the reference string tagging interest invoices.
    pub reference_prefix:      String,
    pub account_code:          Option<String>,
    pub placeholder_description: String,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/engine.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let cfg: EngineConfig = serde_json::from_str(&content)?;
        Ok(cfg)
    }

    /// Client configs to seed into an empty store.
    pub fn load_clients(data_dir: &str) -> anyhow::Result<Vec<InterestConfig>> {
        let path = format!("{data_dir}/clients.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: ClientsFile = serde_json::from_str(&content)?;
        for c in &file.clients {
            c.validate().map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(file.clients)
    }

    pub fn default_test() -> Self {
        Self {
            min_call_spacing_ms: 0,
            supplemental_due_days: 14,
            invoice_due_days: 30,
            reference_prefix: "INTEREST".into(),
            account_code: Some("260".into()),
            placeholder_description: "Interest on overdue invoices (nil this period)".into(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_call_spacing_ms: 1100,
            ..Self::default_test()
        }
    }
}
