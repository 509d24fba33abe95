use crate::domain::id::Id;
use crate::domain::transfer::RejectReason;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Account not found: {0}")]
    AccountNotFound(Id),
    #[error("Account {0} already exists with different fields")]
    DuplicateAccount(Id),
    #[error("Transfer rejected by ledger: {0}")]
    TransferRejected(RejectReason),

    #[error("Ledger unavailable: {0}")]
    LedgerError(String),
    #[error("Hold index unavailable: {0}")]
    IndexError(String),
    #[error("Flow journal unavailable: {0}")]
    JournalError(String),
    #[error("Timed out: {0}")]
    TimeoutError(String),
    #[error("Contention: {0}")]
    ContentionError(String),

    #[error("Flow {0} already exists with a different input")]
    FlowConflict(String),
    #[error("Flow {flow_id} diverged from its history at step {seq}: expected {expected}, found {found}")]
    NonDeterministicFlow {
        flow_id: String,
        seq: usize,
        expected: String,
        found: String,
    },
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),

    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    /// Transient infrastructure failures that a retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::LedgerError(_)
                | PaymentError::IndexError(_)
                | PaymentError::JournalError(_)
                | PaymentError::TimeoutError(_)
                | PaymentError::ContentionError(_)
        ) || self.is_storage_error()
    }

    #[cfg(feature = "storage-rocksdb")]
    fn is_storage_error(&self) -> bool {
        matches!(self, PaymentError::StorageError(_))
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn is_storage_error(&self) -> bool {
        false
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(msg.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(PaymentError::LedgerError("down".into()).is_retryable());
        assert!(PaymentError::IndexError("down".into()).is_retryable());
        assert!(PaymentError::TimeoutError("place_hold".into()).is_retryable());
        assert!(PaymentError::ContentionError("present-1".into()).is_retryable());
    }

    #[test]
    fn test_business_and_validation_errors_are_terminal() {
        assert!(!PaymentError::ValidationError("bad id".into()).is_retryable());
        assert!(!PaymentError::AccountNotFound(Id::new(7)).is_retryable());
        assert!(!PaymentError::FlowConflict("f1".into()).is_retryable());
        assert!(!PaymentError::TransferRejected(RejectReason::ExceedsCredits).is_retryable());
    }
}
