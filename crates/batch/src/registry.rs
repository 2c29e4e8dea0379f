use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info};

use batchstock_core::{BatchId, ItemId, StockSettings};
use batchstock_ledger::store::{LedgerStore, LedgerStoreError};

use crate::allocator::{AllocatorError, AvailabilityQuery, BatchAllocator};
use crate::batch::{AssociationKind, Batch, BatchAssociation, BatchStatus};
use crate::store::{AssociationOutcome, BatchStore, BatchStoreError};

/// Batch access failure.
///
/// `Disabled`/`Expired`/`NoQuantity` mean the batch cannot supply stock right
/// now; `ItemMismatch`/`NotEmpty` mean the request contradicts the batch's
/// registered state. Duplicate associations are deliberately absent: the
/// registry swallows them.
#[derive(Debug, Error)]
pub enum BatchAccessError {
    #[error("batch {0} does not exist")]
    UnknownBatch(BatchId),

    #[error("batch {batch_id} is disabled")]
    Disabled { batch_id: BatchId },

    #[error("batch {batch_id} expired on {expiry}")]
    Expired { batch_id: BatchId, expiry: NaiveDate },

    #[error("batch {batch_id} has no available quantity ({available})")]
    NoQuantity { batch_id: BatchId, available: f64 },

    #[error("batch {batch_id} cannot be used by item {item_id}")]
    ItemMismatch { batch_id: BatchId, item_id: ItemId },

    #[error("batch {batch_id} is already {status:?}")]
    NotEmpty {
        batch_id: BatchId,
        status: BatchStatus,
    },

    #[error(transparent)]
    Store(#[from] BatchStoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),
}

impl From<AllocatorError> for BatchAccessError {
    fn from(value: AllocatorError) -> Self {
        match value {
            AllocatorError::Ledger(e) => BatchAccessError::Ledger(e),
            AllocatorError::Batch(e) => BatchAccessError::Store(e),
        }
    }
}

/// Derived batch state bookkeeping: lifecycle status, consumer associations,
/// and the display-only quantity cache.
///
/// Every operation here is idempotent; repeating a call converges on the same
/// state and never surfaces a conflict to the caller.
pub struct BatchLifecycleRegistry<'a, B: ?Sized, L: ?Sized> {
    batches: &'a B,
    ledger: &'a L,
    settings: &'a StockSettings,
}

impl<'a, B, L> BatchLifecycleRegistry<'a, B, L>
where
    B: BatchStore + ?Sized,
    L: LedgerStore + ?Sized,
{
    pub fn new(batches: &'a B, ledger: &'a L, settings: &'a StockSettings) -> Self {
        Self {
            batches,
            ledger,
            settings,
        }
    }

    /// Set the lifecycle status. Repeating the same target status is a no-op.
    pub fn set_status(&self, batch_id: BatchId, status: BatchStatus) -> Result<(), BatchAccessError> {
        match self.batches.set_status(batch_id, status)? {
            None => Err(BatchAccessError::UnknownBatch(batch_id)),
            Some(previous) if previous == status => {
                debug!(batch = %batch_id, ?status, "batch status unchanged");
                Ok(())
            }
            Some(previous) => {
                info!(batch = %batch_id, from = ?previous, to = ?status, "batch status changed");
                Ok(())
            }
        }
    }

    /// Record that `item_id` consumes `batch_id`. A concurrent or repeated
    /// registration of the same pair is discarded silently — the association
    /// existing is the desired end state.
    pub fn register_association(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        kind: AssociationKind,
    ) -> Result<(), BatchAccessError> {
        if self.batches.get(batch_id)?.is_none() {
            return Err(BatchAccessError::UnknownBatch(batch_id));
        }

        let association = BatchAssociation {
            batch_id,
            item_id,
            kind,
        };
        match self.batches.try_insert_association(association)? {
            AssociationOutcome::Inserted => {
                info!(batch = %batch_id, item = %item_id, ?kind, "association registered");
            }
            AssociationOutcome::AlreadyExists => {
                debug!(batch = %batch_id, item = %item_id, ?kind, "association already registered");
            }
        }
        Ok(())
    }

    /// Re-derive the display cache from the ledger: allocator-visible
    /// quantity summed across all items and locations of the batch.
    ///
    /// May run deferred relative to the append that triggered it; nothing on
    /// the validation or allocation path reads the cache.
    pub fn recompute_cached_qty(&self, batch_id: BatchId) -> Result<f64, BatchAccessError> {
        if self.batches.get(batch_id)?.is_none() {
            return Err(BatchAccessError::UnknownBatch(batch_id));
        }

        let allocator = BatchAllocator::new(self.ledger, self.batches, self.settings);
        let query = AvailabilityQuery {
            batches: Some(vec![batch_id]),
            include_unusable: true,
            ..AvailabilityQuery::default()
        };
        let total: f64 = allocator
            .list_available(&query)?
            .iter()
            .map(|row| row.qty)
            .sum();

        self.batches.set_cached_qty(batch_id, total)?;
        debug!(batch = %batch_id, qty = total, "cached quantity recomputed");
        Ok(total)
    }

    /// Check that `item_id` may post stock against `batch_id` on `as_of`:
    /// the batch exists, is enabled, has not expired, and the item is either
    /// the batch's own item or registered through an association.
    pub fn ensure_usable(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        as_of: NaiveDate,
    ) -> Result<Batch, BatchAccessError> {
        let Some(batch) = self.batches.get(batch_id)? else {
            return Err(BatchAccessError::UnknownBatch(batch_id));
        };

        if batch.disabled {
            return Err(BatchAccessError::Disabled { batch_id });
        }
        if let Some(expiry) = batch.expiry_date
            && batch.is_expired(as_of)
        {
            return Err(BatchAccessError::Expired { batch_id, expiry });
        }
        if batch.item_id != item_id
            && !self
                .batches
                .associations(batch_id)?
                .iter()
                .any(|a| a.item_id == item_id)
        {
            return Err(BatchAccessError::ItemMismatch { batch_id, item_id });
        }

        Ok(batch)
    }

    /// `ensure_usable` plus the consumption precondition: only an `Empty`
    /// batch can be bound by a new consuming document.
    pub fn ensure_claimable(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        as_of: NaiveDate,
    ) -> Result<Batch, BatchAccessError> {
        let batch = self.ensure_usable(batch_id, item_id, as_of)?;
        if batch.status != BatchStatus::Empty {
            return Err(BatchAccessError::NotEmpty {
                batch_id,
                status: batch.status,
            });
        }
        Ok(batch)
    }
}
