//! Stock ledger: immutable movement facts, balance projection, and the
//! negative-stock lookahead check.
//!
//! The ledger is append-mostly: entries are never rewritten once posted, and
//! document cancellation voids entries logically (`is_voided`) so historical
//! balance queries always reproduce the sequence that was valid at posting
//! time.

pub mod entry;
pub mod lock;
pub mod projector;
pub mod store;
pub mod validator;

pub use entry::{LedgerEntry, OrderingKey, PostedEntry, SourceType};
pub use lock::{ScopeKey, ScopeLockMap};
pub use store::{EntryFilter, InMemoryLedgerStore, LedgerStore, LedgerStoreError};
pub use validator::{
    BatchScopeRule, NegativeStockError, NegativeStockValidator, ValidationError, ViolationScope,
};
