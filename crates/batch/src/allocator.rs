use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use batchstock_core::{BatchId, ItemId, LocationId, PickPolicy, SourceId, StockSettings, qty};
use batchstock_ledger::store::{EntryFilter, LedgerStore, LedgerStoreError};
use batchstock_ledger::OrderingKey;

use crate::store::{BatchStore, BatchStoreError};

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),

    #[error(transparent)]
    Batch(#[from] BatchStoreError),
}

/// What to consider available.
///
/// `as_of: None` means the full ledger (no time cutoff, and no expiry
/// filtering since there is no reference date). `include_unusable` keeps
/// disabled/expired batches and non-positive balances in the result — the
/// diagnostic view used by negative-balance reporting and cache recompute.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityQuery {
    pub item_id: Option<ItemId>,
    pub locations: Option<Vec<LocationId>>,
    pub batches: Option<Vec<BatchId>>,
    pub as_of: Option<NaiveDateTime>,
    pub policy: PickPolicy,
    /// Documents whose in-flight entries must not count (self-exclusion).
    pub exclude_sources: Vec<SourceId>,
    pub include_unusable: bool,
}

/// Balance of one batch at one location as of the query instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAvailability {
    pub batch_id: BatchId,
    pub location_id: LocationId,
    pub qty: f64,
}

/// One draw-down against a batch at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPick {
    pub batch_id: BatchId,
    pub location_id: LocationId,
    pub qty: f64,
}

/// Result of a greedy allocation: the ordered picks, and whatever portion of
/// the request could not be covered. A shortfall is data, not an error —
/// callers decide whether it is fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub picks: Vec<BatchPick>,
    pub shortfall: f64,
}

/// Per-batch availability and greedy draw-down, always recomputed from the
/// ledger (never from `cached_qty`).
pub struct BatchAllocator<'a, L: ?Sized, B: ?Sized> {
    ledger: &'a L,
    batches: &'a B,
    settings: &'a StockSettings,
}

/// Availability row plus the sort keys the policies order by.
struct Row {
    batch_id: BatchId,
    location_id: LocationId,
    qty: f64,
    /// Earliest ledger entry of this batch anywhere — the batch's place in
    /// the chronology of stock availability.
    batch_first: OrderingKey,
    /// Earliest ledger entry of this batch at this location.
    row_first: OrderingKey,
    expiry: Option<chrono::NaiveDate>,
}

impl<'a, L, B> BatchAllocator<'a, L, B>
where
    L: LedgerStore + ?Sized,
    B: BatchStore + ?Sized,
{
    pub fn new(ledger: &'a L, batches: &'a B, settings: &'a StockSettings) -> Self {
        Self {
            ledger,
            batches,
            settings,
        }
    }

    /// Per-batch-per-location balances as of the query instant, ordered by
    /// the query policy.
    ///
    /// Deterministic for a fixed ledger snapshot: batches order by their
    /// earliest entry's `(posting_date, posting_time, creation_seq)` key, so
    /// same-instant ties break by insertion order, never by batch id.
    pub fn list_available(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<Vec<BatchAvailability>, AllocatorError> {
        let rows = self.rows(query)?;
        Ok(rows
            .into_iter()
            .map(|row| BatchAvailability {
                batch_id: row.batch_id,
                location_id: row.location_id,
                qty: row.qty,
            })
            .collect())
    }

    /// Greedy draw-down: walk the policy-ordered rows taking
    /// `min(remaining, row.qty)` until the request is covered or rows run
    /// out. `sum(picks) + shortfall == requested`.
    pub fn allocate(
        &self,
        query: &AvailabilityQuery,
        requested: f64,
    ) -> Result<Allocation, AllocatorError> {
        let epsilon = self.settings.epsilon;
        let mut remaining = requested.max(0.0);
        let mut picks = Vec::new();

        for row in self.rows(query)? {
            if !qty::is_positive(remaining, epsilon) {
                break;
            }
            let take = remaining.min(row.qty);
            if !qty::is_positive(take, epsilon) {
                continue;
            }
            picks.push(BatchPick {
                batch_id: row.batch_id,
                location_id: row.location_id,
                qty: take,
            });
            remaining -= take;
        }

        Ok(Allocation {
            picks,
            shortfall: remaining.max(0.0),
        })
    }

    fn rows(&self, query: &AvailabilityQuery) -> Result<Vec<Row>, AllocatorError> {
        let filter = EntryFilter {
            item_id: query.item_id,
            locations: query.locations.clone(),
            batches: query.batches.clone(),
            exclude_sources: query.exclude_sources.clone(),
            effective_up_to: query.as_of,
            ..EntryFilter::default()
        };
        let entries = self.ledger.entries(&filter)?;

        // Group by (batch, location), tracking each group's earliest entry.
        // Entries arrive sorted, so "first seen" is just the first hit.
        let mut sums: HashMap<(BatchId, LocationId), (f64, OrderingKey)> = HashMap::new();
        let mut batch_first: HashMap<BatchId, OrderingKey> = HashMap::new();
        for posted in &entries {
            let Some(batch_id) = posted.entry.batch_id else {
                continue;
            };
            let key = posted.ordering_key();
            batch_first.entry(batch_id).or_insert(key);
            let group = sums
                .entry((batch_id, posted.entry.location_id))
                .or_insert((0.0, key));
            group.0 += posted.entry.qty_delta;
        }

        let epsilon = self.settings.epsilon;
        let as_of_date = query.as_of.map(|t| t.date());
        let mut rows = Vec::with_capacity(sums.len());
        for ((batch_id, location_id), (total, row_first)) in sums {
            // Ledger rows whose container is unknown to the batch store are
            // dropped (the scan joins against the container table).
            let Some(batch) = self.batches.get(batch_id)? else {
                continue;
            };

            if !query.include_unusable {
                if batch.disabled {
                    continue;
                }
                if let Some(as_of) = as_of_date
                    && batch.is_expired(as_of)
                {
                    continue;
                }
                if !qty::is_positive(total, epsilon) {
                    continue;
                }
            }

            rows.push(Row {
                batch_id,
                location_id,
                qty: total,
                batch_first: batch_first.get(&batch_id).copied().unwrap_or(row_first),
                row_first,
                expiry: batch.expiry_date,
            });
        }

        rows.sort_by(|a, b| match query.policy {
            PickPolicy::Chronological => a
                .batch_first
                .cmp(&b.batch_first)
                .then(a.row_first.cmp(&b.row_first)),
            PickPolicy::MostRecent => b
                .batch_first
                .cmp(&a.batch_first)
                .then(a.row_first.cmp(&b.row_first)),
            PickPolicy::NearestExpiry => cmp_expiry(a.expiry, b.expiry)
                .then(a.batch_first.cmp(&b.batch_first))
                .then(a.row_first.cmp(&b.row_first)),
        });

        Ok(rows)
    }
}

/// Soonest expiry first; no expiry sorts last.
fn cmp_expiry(a: Option<chrono::NaiveDate>, b: Option<chrono::NaiveDate>) -> core::cmp::Ordering {
    use core::cmp::Ordering;
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, BatchKind};
    use batchstock_ledger::entry::{LedgerEntry, SourceType};
    use batchstock_ledger::store::InMemoryLedgerStore;
    use crate::store::InMemoryBatchStore;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn time(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    struct Fixture {
        ledger: InMemoryLedgerStore,
        batches: InMemoryBatchStore,
        settings: StockSettings,
        item: ItemId,
        location: LocationId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ledger: InMemoryLedgerStore::new(),
                batches: InMemoryBatchStore::new(),
                settings: StockSettings::default(),
                item: ItemId::new(),
                location: LocationId::new(),
            }
        }

        /// Register a batch and receive `qty` into it on `day`.
        fn receive(&self, qty: f64, day: u32) -> BatchId {
            let batch = Batch::new(BatchId::new(), self.item, BatchKind::Production);
            let id = batch.id;
            self.batches.upsert(batch).unwrap();
            self.post(id, qty, day);
            id
        }

        fn post(&self, batch: BatchId, qty: f64, day: u32) {
            let entry = LedgerEntry::new(
                self.item,
                self.location,
                qty,
                date(day),
                time(9),
                SourceType::StockEntry,
                SourceId::new(),
            )
            .in_batch(batch);
            self.ledger.append(entry).unwrap();
        }

        fn allocator(&self) -> BatchAllocator<'_, InMemoryLedgerStore, InMemoryBatchStore> {
            BatchAllocator::new(&self.ledger, &self.batches, &self.settings)
        }

        fn query(&self) -> AvailabilityQuery {
            AvailabilityQuery {
                item_id: Some(self.item),
                ..AvailabilityQuery::default()
            }
        }
    }

    #[test]
    fn partial_draw_stops_inside_the_second_batch() {
        let fx = Fixture::new();
        let b1 = fx.receive(20.0, 1);
        let b2 = fx.receive(15.0, 2);
        let _b3 = fx.receive(30.0, 3);

        let allocation = fx.allocator().allocate(&fx.query(), 28.0).unwrap();
        assert_eq!(allocation.shortfall, 0.0);
        assert_eq!(
            allocation
                .picks
                .iter()
                .map(|p| (p.batch_id, p.qty))
                .collect::<Vec<_>>(),
            vec![(b1, 20.0), (b2, 8.0)]
        );
    }

    #[test]
    fn exhausting_every_batch_reports_the_shortfall() {
        let fx = Fixture::new();
        let b1 = fx.receive(20.0, 1);
        let b2 = fx.receive(15.0, 2);
        let b3 = fx.receive(30.0, 3);

        let allocation = fx.allocator().allocate(&fx.query(), 100.0).unwrap();
        assert_eq!(
            allocation
                .picks
                .iter()
                .map(|p| (p.batch_id, p.qty))
                .collect::<Vec<_>>(),
            vec![(b1, 20.0), (b2, 15.0), (b3, 30.0)]
        );
        assert!((allocation.shortfall - 35.0).abs() < 1e-9);
    }

    #[test]
    fn most_recent_policy_reverses_the_walk() {
        let fx = Fixture::new();
        let _b1 = fx.receive(20.0, 1);
        let b3 = fx.receive(30.0, 3);

        let query = AvailabilityQuery {
            policy: PickPolicy::MostRecent,
            ..fx.query()
        };
        let allocation = fx.allocator().allocate(&query, 10.0).unwrap();
        assert_eq!(allocation.picks[0].batch_id, b3);
    }

    #[test]
    fn nearest_expiry_policy_puts_unexpiring_batches_last() {
        let fx = Fixture::new();
        let late = Batch::new(BatchId::new(), fx.item, BatchKind::Production)
            .expires_on(date(25));
        let soon = Batch::new(BatchId::new(), fx.item, BatchKind::Production)
            .expires_on(date(10));
        let never = Batch::new(BatchId::new(), fx.item, BatchKind::Production);
        let (late_id, soon_id, never_id) = (late.id, soon.id, never.id);
        fx.batches.upsert(late).unwrap();
        fx.batches.upsert(soon).unwrap();
        fx.batches.upsert(never).unwrap();
        fx.post(late_id, 5.0, 1);
        fx.post(soon_id, 5.0, 2);
        fx.post(never_id, 5.0, 3);

        let query = AvailabilityQuery {
            policy: PickPolicy::NearestExpiry,
            ..fx.query()
        };
        let listed = fx.allocator().list_available(&query).unwrap();
        assert_eq!(
            listed.iter().map(|r| r.batch_id).collect::<Vec<_>>(),
            vec![soon_id, late_id, never_id]
        );
    }

    #[test]
    fn same_instant_ties_break_by_insertion_order() {
        let fx = Fixture::new();
        // Both batches receive at the same instant; the first one appended
        // must come first under the chronological policy.
        let b1 = fx.receive(10.0, 1);
        let b2 = fx.receive(10.0, 1);

        let listed = fx.allocator().list_available(&fx.query()).unwrap();
        assert_eq!(
            listed.iter().map(|r| r.batch_id).collect::<Vec<_>>(),
            vec![b1, b2]
        );
    }

    #[test]
    fn disabled_expired_and_drained_batches_are_hidden_by_default() {
        let fx = Fixture::new();
        let ok = fx.receive(10.0, 1);

        let mut disabled = Batch::new(BatchId::new(), fx.item, BatchKind::Production);
        disabled.disabled = true;
        let disabled_id = disabled.id;
        fx.batches.upsert(disabled).unwrap();
        fx.post(disabled_id, 10.0, 1);

        let expired = Batch::new(BatchId::new(), fx.item, BatchKind::Production)
            .expires_on(date(2));
        let expired_id = expired.id;
        fx.batches.upsert(expired).unwrap();
        fx.post(expired_id, 10.0, 1);

        let drained = fx.receive(10.0, 1);
        fx.post(drained, -10.0, 2);

        let query = AvailabilityQuery {
            as_of: Some(date(20).and_time(time(9))),
            ..fx.query()
        };
        let listed = fx.allocator().list_available(&query).unwrap();
        assert_eq!(
            listed.iter().map(|r| r.batch_id).collect::<Vec<_>>(),
            vec![ok]
        );

        let diagnostic = AvailabilityQuery {
            include_unusable: true,
            ..query
        };
        assert_eq!(fx.allocator().list_available(&diagnostic).unwrap().len(), 4);
    }

    #[test]
    fn as_of_cuts_off_later_entries() {
        let fx = Fixture::new();
        let batch = fx.receive(10.0, 1);
        fx.post(batch, 90.0, 10);

        let query = AvailabilityQuery {
            as_of: Some(date(5).and_time(time(9))),
            ..fx.query()
        };
        let listed = fx.allocator().list_available(&query).unwrap();
        assert_eq!(listed[0].qty, 10.0);
    }

    #[test]
    fn self_exclusion_removes_a_documents_own_entries() {
        let fx = Fixture::new();
        let batch = fx.receive(10.0, 1);

        let own = SourceId::new();
        let draft = LedgerEntry::new(
            fx.item,
            fx.location,
            -4.0,
            date(2),
            time(9),
            SourceType::StockEntry,
            own,
        )
        .in_batch(batch);
        fx.ledger.append(draft).unwrap();

        let listed = fx.allocator().list_available(&fx.query()).unwrap();
        assert_eq!(listed[0].qty, 6.0);

        let without_self = AvailabilityQuery {
            exclude_sources: vec![own],
            ..fx.query()
        };
        let listed = fx.allocator().list_available(&without_self).unwrap();
        assert_eq!(listed[0].qty, 10.0);
    }

    #[test]
    fn allocation_is_deterministic_for_a_fixed_snapshot() {
        let fx = Fixture::new();
        for day in 1..6 {
            fx.receive(7.5, day);
        }

        let first = fx.allocator().allocate(&fx.query(), 23.0).unwrap();
        let second = fx.allocator().allocate(&fx.query(), 23.0).unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: allocation conserves quantity and never over-draws a
        /// batch.
        #[test]
        fn allocation_conserves_the_requested_quantity(
            balances in prop::collection::vec(1u32..500, 1..8),
            requested in 0u32..3000,
        ) {
            let fx = Fixture::new();
            let mut available = HashMap::new();
            for (day, balance) in balances.iter().enumerate() {
                let batch = fx.receive(f64::from(*balance), day as u32 + 1);
                available.insert(batch, f64::from(*balance));
            }

            let requested = f64::from(requested);
            let allocation = fx.allocator().allocate(&fx.query(), requested).unwrap();

            let picked: f64 = allocation.picks.iter().map(|p| p.qty).sum();
            prop_assert!((picked + allocation.shortfall - requested).abs() < 1e-6);
            for pick in &allocation.picks {
                prop_assert!(pick.qty <= available[&pick.batch_id] + 1e-6);
            }
        }
    }
}
