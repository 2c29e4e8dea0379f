use thiserror::Error;

use batchstock_batch::allocator::AllocatorError;
use batchstock_batch::registry::BatchAccessError;
use batchstock_batch::store::BatchStoreError;
use batchstock_ledger::store::LedgerStoreError;
use batchstock_ledger::validator::{NegativeStockError, ValidationError};

/// Everything the engine surface can fail with, mapped from the module-level
/// error types so workflow callers match on one enum.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Accepting the entry would drive a projected balance negative.
    #[error(transparent)]
    NegativeStock(#[from] NegativeStockError),

    /// The named batch cannot serve the request (disabled, expired, wrong
    /// item, already consumed, no quantity).
    #[error(transparent)]
    BatchAccess(#[from] BatchAccessError),

    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),

    #[error(transparent)]
    BatchStore(#[from] BatchStoreError),

    /// A writer panicked while holding a scope lock.
    #[error("scope serialization lock poisoned")]
    ScopeLock,
}

impl From<ValidationError> for EngineError {
    fn from(value: ValidationError) -> Self {
        match value {
            ValidationError::NegativeStock(e) => e.into(),
            ValidationError::Store(e) => e.into(),
        }
    }
}

impl From<AllocatorError> for EngineError {
    fn from(value: AllocatorError) -> Self {
        match value {
            AllocatorError::Ledger(e) => e.into(),
            AllocatorError::Batch(e) => e.into(),
        }
    }
}
