use chrono::{NaiveDate, NaiveDateTime};
use tracing::info;

use batchstock_batch::allocator::{Allocation, AvailabilityQuery, BatchAllocator, BatchAvailability};
use batchstock_batch::batch::{AssociationKind, Batch, BatchStatus};
use batchstock_batch::registry::{BatchAccessError, BatchLifecycleRegistry};
use batchstock_batch::store::BatchStore;
use batchstock_core::{BatchId, ItemId, LocationId, SourceId, StockSettings, qty};
use batchstock_ledger::entry::{LedgerEntry, PostedEntry};
use batchstock_ledger::lock::{ScopeKey, ScopeLockMap};
use batchstock_ledger::store::{EntryFilter, LedgerStore};
use batchstock_ledger::validator::{BatchScopeRule, NegativeStockValidator};

use crate::error::EngineError;

/// The embedded stock engine: one instance per ledger/batch store pair,
/// shared across request handlers.
///
/// All mutation funnels through here so the per-scope serialization holds;
/// reads (`list_available_batches`, `allocate`) go straight to the ledger and
/// never block writers on other scopes.
pub struct StockEngine<L, B> {
    ledger: L,
    batches: B,
    settings: StockSettings,
    locks: ScopeLockMap,
}

impl<L, B> StockEngine<L, B>
where
    L: LedgerStore,
    B: BatchStore,
{
    pub fn new(ledger: L, batches: B, settings: StockSettings) -> Self {
        Self {
            ledger,
            batches,
            settings,
            locks: ScopeLockMap::new(),
        }
    }

    pub fn settings(&self) -> &StockSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn batch_store(&self) -> &B {
        &self.batches
    }

    fn registry(&self) -> BatchLifecycleRegistry<'_, B, L> {
        BatchLifecycleRegistry::new(&self.batches, &self.ledger, &self.settings)
    }

    fn allocator(&self) -> BatchAllocator<'_, L, B> {
        BatchAllocator::new(&self.ledger, &self.batches, &self.settings)
    }

    /// Register a batch container (administrative path).
    pub fn define_batch(&self, batch: Batch) -> Result<(), EngineError> {
        self.batches.upsert(batch)?;
        Ok(())
    }

    pub fn batch(&self, id: BatchId) -> Result<Option<Batch>, EngineError> {
        Ok(self.batches.get(id)?)
    }

    /// Read-only admissibility check: would `candidate` ever drive the
    /// projected balance negative, at item scope or batch scope?
    ///
    /// When the candidate names a batch, the batch must also be usable by
    /// the candidate's item on the posting date (enabled, unexpired,
    /// registered).
    pub fn validate_negative_stock(
        &self,
        candidate: &LedgerEntry,
        override_allowed: bool,
    ) -> Result<(), EngineError> {
        let rule = self.batch_rule_for(candidate)?;
        NegativeStockValidator::new(&self.ledger, &self.settings)
            .validate(candidate, rule, override_allowed)?;
        Ok(())
    }

    /// Validate and append under the scope locks, then refresh the batch's
    /// quantity cache.
    ///
    /// Item-location lock first, batch lock second — every writer acquires
    /// in this order, so writers on overlapping scopes serialize instead of
    /// deadlocking. Validation failure aborts the candidate as a whole.
    pub fn post(
        &self,
        candidate: LedgerEntry,
        override_allowed: bool,
    ) -> Result<PostedEntry, EngineError> {
        let item_handle = self.locks.handle(ScopeKey::ItemLocation(
            candidate.item_id,
            candidate.location_id,
        ));
        let _item_guard = item_handle.lock().map_err(|_| EngineError::ScopeLock)?;

        let batch_handle = candidate
            .batch_id
            .map(|batch_id| self.locks.handle(ScopeKey::Batch(batch_id)));
        let _batch_guard = match batch_handle.as_ref() {
            Some(handle) => Some(handle.lock().map_err(|_| EngineError::ScopeLock)?),
            None => None,
        };

        self.validate_negative_stock(&candidate, override_allowed)?;

        let batch_id = candidate.batch_id;
        let posted = self.ledger.append(candidate)?;
        info!(
            item = %posted.entry.item_id,
            location = %posted.entry.location_id,
            qty = posted.entry.qty_delta,
            seq = posted.creation_seq,
            "ledger entry posted"
        );

        if let Some(batch_id) = batch_id {
            self.registry().recompute_cached_qty(batch_id)?;
        }
        Ok(posted)
    }

    /// Void every entry of a reversed document, under the locks of all
    /// scopes the document touched, and refresh affected batch caches.
    pub fn reverse_source(&self, source_id: SourceId) -> Result<Vec<PostedEntry>, EngineError> {
        let filter = EntryFilter {
            sources: Some(vec![source_id]),
            ..EntryFilter::default()
        };
        let entries = self.ledger.entries(&filter)?;

        let mut keys = Vec::new();
        for posted in &entries {
            keys.push(ScopeKey::ItemLocation(
                posted.entry.item_id,
                posted.entry.location_id,
            ));
            if let Some(batch_id) = posted.entry.batch_id {
                keys.push(ScopeKey::Batch(batch_id));
            }
        }
        // Deterministic acquisition order across concurrent reversals.
        keys.sort();
        keys.dedup();

        let handles: Vec<_> = keys.iter().map(|key| self.locks.handle(*key)).collect();
        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(handle.lock().map_err(|_| EngineError::ScopeLock)?);
        }

        let voided = self.ledger.void_source(source_id)?;
        if !voided.is_empty() {
            info!(source = %source_id, entries = voided.len(), "source reversed");
        }

        let mut touched: Vec<BatchId> = voided.iter().filter_map(|e| e.entry.batch_id).collect();
        touched.sort();
        touched.dedup();
        for batch_id in touched {
            self.registry().recompute_cached_qty(batch_id)?;
        }

        Ok(voided)
    }

    /// Policy-ordered per-batch availability (read path, cache-free).
    pub fn list_available_batches(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<Vec<BatchAvailability>, EngineError> {
        Ok(self.allocator().list_available(query)?)
    }

    /// Greedy draw-down across available batches; shortfall is reported, not
    /// raised.
    pub fn allocate(
        &self,
        query: &AvailabilityQuery,
        requested: f64,
    ) -> Result<Allocation, EngineError> {
        Ok(self.allocator().allocate(query, requested)?)
    }

    /// Total availability of one demanded batch for an item, failing with
    /// `BatchAccess` when the batch is unusable or has nothing to give.
    pub fn ensure_batch_available(
        &self,
        item_id: ItemId,
        batch_id: BatchId,
        locations: Option<Vec<LocationId>>,
        as_of: NaiveDateTime,
    ) -> Result<f64, EngineError> {
        self.registry()
            .ensure_usable(batch_id, item_id, as_of.date())?;

        let query = AvailabilityQuery {
            item_id: Some(item_id),
            locations,
            batches: Some(vec![batch_id]),
            as_of: Some(as_of),
            include_unusable: true,
            ..AvailabilityQuery::default()
        };
        let available: f64 = self
            .allocator()
            .list_available(&query)?
            .iter()
            .map(|row| row.qty)
            .sum();

        if !qty::is_positive(available, self.settings.epsilon) {
            return Err(BatchAccessError::NoQuantity {
                batch_id,
                available,
            }
            .into());
        }
        Ok(available)
    }

    /// Idempotent lifecycle transition (`Used` on finalize, `Empty` on
    /// reversal).
    pub fn set_batch_status(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
    ) -> Result<(), EngineError> {
        Ok(self.registry().set_status(batch_id, status)?)
    }

    /// Idempotent association insert; duplicates are silently discarded.
    pub fn register_association(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        kind: AssociationKind,
    ) -> Result<(), EngineError> {
        Ok(self.registry().register_association(batch_id, item_id, kind)?)
    }

    /// Precondition check for a consuming document binding a batch: usable
    /// and still `Empty`.
    pub fn claim_batch(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        as_of: NaiveDate,
    ) -> Result<Batch, EngineError> {
        Ok(self.registry().ensure_claimable(batch_id, item_id, as_of)?)
    }

    /// Re-derive one batch's display cache from the ledger.
    pub fn recompute_cached_qty(&self, batch_id: BatchId) -> Result<f64, EngineError> {
        Ok(self.registry().recompute_cached_qty(batch_id)?)
    }

    fn batch_rule_for(
        &self,
        candidate: &LedgerEntry,
    ) -> Result<Option<BatchScopeRule>, EngineError> {
        match candidate.batch_id {
            None => Ok(None),
            Some(batch_id) => {
                let batch = self.registry().ensure_usable(
                    batch_id,
                    candidate.item_id,
                    candidate.posting_date,
                )?;
                Ok(Some(batch.scope_rule()))
            }
        }
    }
}
