//! Error types for the ledger store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A lookup whose presence is part of the caller's contract came back empty.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing store rejected or failed a statement (constraint violation,
    /// I/O, locking).
    #[error("Storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    /// A stored row could not be decoded back into a model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Value {0} does not fit the store's signed integer column")]
    ValueOutOfRange(u64),

    #[error("Invalid tenant identifier: {0}")]
    InvalidTenant(String),

    #[error("Tenant is not provisioned: {0}")]
    UnknownTenant(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }

    /// True for failures that originate in the backing store itself.
    pub fn is_storage(&self) -> bool {
        matches!(self, LedgerError::Storage(_) | LedgerError::Corrupt(_))
    }

    /// True when the store refused a write because of a uniqueness or
    /// primary-key constraint.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            LedgerError::Storage(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(column, _, source) => {
                LedgerError::Corrupt(format!("column {}: {}", column, source))
            }
            rusqlite::Error::IntegralValueOutOfRange(column, value) => {
                LedgerError::Corrupt(format!("column {}: value {} out of range", column, value))
            }
            other => LedgerError::Storage(other),
        }
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_storage() {
        let err = LedgerError::NotFound("block 7".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_storage());
        assert_eq!(err.to_string(), "Not found: block 7");
    }

    #[test]
    fn test_conversion_failure_becomes_corrupt() {
        let err: LedgerError = rusqlite::Error::IntegralValueOutOfRange(2, -1).into();
        assert!(matches!(err, LedgerError::Corrupt(_)));

        let err: LedgerError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[test]
    fn test_corrupt_counts_as_storage() {
        let err = LedgerError::Corrupt("bad hash length".to_string());
        assert!(err.is_storage());
        assert!(!err.is_constraint_violation());
    }
}
