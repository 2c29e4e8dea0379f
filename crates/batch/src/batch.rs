use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use batchstock_core::{BatchId, ItemId};
use batchstock_ledger::BatchScopeRule;

/// Two-state lifecycle: a batch is `Empty` until a consuming document is
/// finalized against it, and returns to `Empty` when that document is
/// reversed. No intermediate states.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Empty,
    Used,
}

/// What the container is for; decides how non-negativity is scoped when
/// several items share the batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// A finished-good production batch: one item, one pool.
    Production,
    /// Hosts registered sub-assembly items; each keeps its own subsequence.
    SubAssembly,
    /// Shared between a parent item and its unit-of-measure conversions,
    /// which all draw from the same pool.
    Conversion,
}

/// Which association table a registration lands in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    SubAssembly,
    Conversion,
}

/// A finite-quantity stock container with its own lifecycle.
///
/// `cached_qty` is derived (recomputed after ledger appends) and never
/// consulted by validation or allocation; it exists so display paths avoid a
/// live ledger scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub item_id: ItemId,
    pub disabled: bool,
    pub expiry_date: Option<NaiveDate>,
    pub status: BatchStatus,
    pub kind: BatchKind,
    pub cached_qty: f64,
}

impl Batch {
    /// Fresh, enabled, empty container with no expiry.
    pub fn new(id: BatchId, item_id: ItemId, kind: BatchKind) -> Self {
        Self {
            id,
            item_id,
            disabled: false,
            expiry_date: None,
            status: BatchStatus::Empty,
            kind,
            cached_qty: 0.0,
        }
    }

    pub fn expires_on(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry < as_of)
    }

    /// How negative stock validation scopes this container's subsequence.
    pub fn scope_rule(&self) -> BatchScopeRule {
        match self.kind {
            BatchKind::Production | BatchKind::Conversion => BatchScopeRule::Pooled,
            BatchKind::SubAssembly => BatchScopeRule::PerItem,
        }
    }
}

/// Unique record that a batch was used to produce/convert/assemble an item.
/// Unique on `(batch_id, item_id)` per kind; duplicate registration is a
/// no-op, not a fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchAssociation {
    pub batch_id: BatchId,
    pub item_id: ItemId,
    pub kind: AssociationKind,
}
