use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use batchstock_core::{BatchId, ItemId, LocationId, SourceId, SourceLineId, qty};

/// Document type a ledger entry originates from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    StockEntry,
    StockReconciliation,
    PurchaseReceipt,
    DeliveryNote,
}

impl SourceType {
    /// Reconciliation sources correct recorded stock rather than move it;
    /// their decreases are risk-bearing even when the delta looks harmless.
    pub fn is_reconciliation(self) -> bool {
        matches!(self, SourceType::StockReconciliation)
    }
}

/// Combined ordering key: effective instant plus store insertion sequence.
///
/// Entries posted at the same instant keep their insertion order; the
/// sequence is assigned by the store and never reused.
pub type OrderingKey = (NaiveDate, NaiveTime, u64);

/// A signed stock movement for an item at a location, optionally scoped to a
/// batch. Immutable once posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub batch_id: Option<BatchId>,
    pub qty_delta: f64,
    pub posting_date: NaiveDate,
    pub posting_time: NaiveTime,
    pub source_type: SourceType,
    pub source_id: SourceId,
    pub source_line_id: Option<SourceLineId>,
    /// Reconciliation only: the counted (target) quantity documented on the
    /// same voucher line. A decrease covered by a positive target is a
    /// corrective opening balance, not a real depletion.
    pub target_qty: Option<f64>,
    pub is_voided: bool,
}

impl LedgerEntry {
    /// Movement entry with a fresh id, no batch, not voided.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        item_id: ItemId,
        location_id: LocationId,
        qty_delta: f64,
        posting_date: NaiveDate,
        posting_time: NaiveTime,
        source_type: SourceType,
        source_id: SourceId,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            item_id,
            location_id,
            batch_id: None,
            qty_delta,
            posting_date,
            posting_time,
            source_type,
            source_id,
            source_line_id: None,
            target_qty: None,
            is_voided: false,
        }
    }

    pub fn in_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn on_line(mut self, line: SourceLineId) -> Self {
        self.source_line_id = Some(line);
        self
    }

    pub fn with_target_qty(mut self, target_qty: f64) -> Self {
        self.target_qty = Some(target_qty);
        self
    }

    pub fn effective_at(&self) -> NaiveDateTime {
        self.posting_date.and_time(self.posting_time)
    }

    /// Whether this entry can endanger the non-negativity invariant: any
    /// net-reducing movement, and every reconciliation entry.
    pub fn is_risk_bearing(&self, epsilon: f64) -> bool {
        qty::is_negative(self.qty_delta, epsilon) || self.source_type.is_reconciliation()
    }

    /// Reconciliation decrease covered by a documented positive target on the
    /// same line: exempt from negative stock validation.
    pub fn is_covered_reconciliation(&self, epsilon: f64) -> bool {
        self.source_type.is_reconciliation()
            && qty::is_negative(self.qty_delta, epsilon)
            && self.target_qty.is_some_and(|q| qty::is_positive(q, epsilon))
    }
}

/// A ledger entry persisted by the store, carrying its assigned insertion
/// sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedEntry {
    /// Store-assigned, globally monotonic. Breaks ties between entries posted
    /// at the same effective instant.
    pub creation_seq: u64,
    pub entry: LedgerEntry,
}

impl PostedEntry {
    pub fn ordering_key(&self) -> OrderingKey {
        (
            self.entry.posting_date,
            self.entry.posting_time,
            self.creation_seq,
        )
    }

    pub fn effective_at(&self) -> NaiveDateTime {
        self.entry.effective_at()
    }
}
