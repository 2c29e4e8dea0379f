//! Batch pick policies.

use serde::{Deserialize, Serialize};

/// Ordering rule deciding which batch is drawn down first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PickPolicy {
    /// Oldest stock first: batches ordered by their earliest ledger entry.
    #[default]
    Chronological,
    /// Newest stock first.
    MostRecent,
    /// Batches closest to expiry first; batches without expiry come last.
    NearestExpiry,
}
