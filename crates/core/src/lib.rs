//! `batchstock-core` — shared vocabulary for the stock ledger engine.
//!
//! This crate contains **pure domain** primitives (no storage concerns):
//! strongly-typed identifiers, the domain error taxonomy, quantity comparison
//! helpers, pick policies, and the settings surface.

pub mod error;
pub mod id;
pub mod policy;
pub mod qty;
pub mod settings;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, ItemId, LocationId, SourceId, SourceLineId};
pub use policy::PickPolicy;
pub use settings::StockSettings;
