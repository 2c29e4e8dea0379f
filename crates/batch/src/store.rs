use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use batchstock_core::BatchId;

use crate::batch::{Batch, BatchAssociation, BatchStatus};

#[derive(Debug, Error)]
pub enum BatchStoreError {
    #[error("batch store lock poisoned")]
    Poisoned,
}

/// Result of an optimistic association insert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssociationOutcome {
    Inserted,
    /// The unique `(batch, item, kind)` row already exists. Callers treat
    /// this as the desired end state, not a failure.
    AlreadyExists,
}

/// Persistence boundary for batch containers and their associations.
///
/// Implementations must make `try_insert_association` atomic with respect to
/// the uniqueness check (insert-then-discard-on-conflict, the transactional
/// equivalent of a savepoint rollback), and must apply `set_status` /
/// `set_cached_qty` atomically per batch.
pub trait BatchStore: Send + Sync {
    fn get(&self, id: BatchId) -> Result<Option<Batch>, BatchStoreError>;

    fn upsert(&self, batch: Batch) -> Result<(), BatchStoreError>;

    /// Set the lifecycle status, returning the previous status, or `None`
    /// when the batch does not exist.
    fn set_status(
        &self,
        id: BatchId,
        status: BatchStatus,
    ) -> Result<Option<BatchStatus>, BatchStoreError>;

    /// Write the derived quantity cache. Returns false for an unknown batch.
    fn set_cached_qty(&self, id: BatchId, qty: f64) -> Result<bool, BatchStoreError>;

    /// Attempt the unique insert; a conflict reports `AlreadyExists` without
    /// disturbing anything else.
    fn try_insert_association(
        &self,
        association: BatchAssociation,
    ) -> Result<AssociationOutcome, BatchStoreError>;

    fn associations(&self, batch_id: BatchId) -> Result<Vec<BatchAssociation>, BatchStoreError>;
}

impl<S> BatchStore for Arc<S>
where
    S: BatchStore + ?Sized,
{
    fn get(&self, id: BatchId) -> Result<Option<Batch>, BatchStoreError> {
        (**self).get(id)
    }

    fn upsert(&self, batch: Batch) -> Result<(), BatchStoreError> {
        (**self).upsert(batch)
    }

    fn set_status(
        &self,
        id: BatchId,
        status: BatchStatus,
    ) -> Result<Option<BatchStatus>, BatchStoreError> {
        (**self).set_status(id, status)
    }

    fn set_cached_qty(&self, id: BatchId, qty: f64) -> Result<bool, BatchStoreError> {
        (**self).set_cached_qty(id, qty)
    }

    fn try_insert_association(
        &self,
        association: BatchAssociation,
    ) -> Result<AssociationOutcome, BatchStoreError> {
        (**self).try_insert_association(association)
    }

    fn associations(&self, batch_id: BatchId) -> Result<Vec<BatchAssociation>, BatchStoreError> {
        (**self).associations(batch_id)
    }
}

/// In-memory batch store.
///
/// Intended for tests/dev. Uniqueness is the set membership itself, checked
/// and inserted under one write lock.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    batches: RwLock<HashMap<BatchId, Batch>>,
    associations: RwLock<HashSet<BatchAssociation>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for InMemoryBatchStore {
    fn get(&self, id: BatchId) -> Result<Option<Batch>, BatchStoreError> {
        let batches = self.batches.read().map_err(|_| BatchStoreError::Poisoned)?;
        Ok(batches.get(&id).cloned())
    }

    fn upsert(&self, batch: Batch) -> Result<(), BatchStoreError> {
        let mut batches = self.batches.write().map_err(|_| BatchStoreError::Poisoned)?;
        batches.insert(batch.id, batch);
        Ok(())
    }

    fn set_status(
        &self,
        id: BatchId,
        status: BatchStatus,
    ) -> Result<Option<BatchStatus>, BatchStoreError> {
        let mut batches = self.batches.write().map_err(|_| BatchStoreError::Poisoned)?;
        Ok(batches.get_mut(&id).map(|batch| {
            let previous = batch.status;
            batch.status = status;
            previous
        }))
    }

    fn set_cached_qty(&self, id: BatchId, qty: f64) -> Result<bool, BatchStoreError> {
        let mut batches = self.batches.write().map_err(|_| BatchStoreError::Poisoned)?;
        match batches.get_mut(&id) {
            Some(batch) => {
                batch.cached_qty = qty;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn try_insert_association(
        &self,
        association: BatchAssociation,
    ) -> Result<AssociationOutcome, BatchStoreError> {
        let mut associations = self
            .associations
            .write()
            .map_err(|_| BatchStoreError::Poisoned)?;
        if associations.insert(association) {
            Ok(AssociationOutcome::Inserted)
        } else {
            Ok(AssociationOutcome::AlreadyExists)
        }
    }

    fn associations(&self, batch_id: BatchId) -> Result<Vec<BatchAssociation>, BatchStoreError> {
        let associations = self
            .associations
            .read()
            .map_err(|_| BatchStoreError::Poisoned)?;
        Ok(associations
            .iter()
            .filter(|a| a.batch_id == batch_id)
            .copied()
            .collect())
    }
}
