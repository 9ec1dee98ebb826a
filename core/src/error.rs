use thiserror::Error;

#[derive(Error, Debug)]
pub enum InterestError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credentials expired or were rejected. Never retried by the core.
    #[error("Accounting platform rejected credentials: {0}")]
    Auth(String),

    #[error("Accounting platform unreachable: {0}")]
    Unreachable(String),

    /// The platform refused a mutation (validation, locked invoice, ...).
    #[error("Update of invoice '{invoice_id}' rejected: {reason}")]
    Rejected { invoice_id: String, reason: String },

    #[error("Invoice '{id}' not found")]
    InvoiceNotFound { id: String },

    #[error("Malformed date '{raw}'")]
    MalformedDate { raw: String },

    #[error("Invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InterestError {
    /// Fatal errors abort the whole batch; everything else is isolated to
    /// the invoice, month or client that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InterestError::Auth(_) | InterestError::Unreachable(_))
    }

    pub fn rejected(invoice_id: impl Into<String>, reason: impl Into<String>) -> Self {
        InterestError::Rejected {
            invoice_id: invoice_id.into(),
            reason: reason.into(),
        }
    }
}

pub type InterestResult<T> = Result<T, InterestError>;
