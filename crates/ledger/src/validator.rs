use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use batchstock_core::{BatchId, ItemId, LocationId, SourceId, StockSettings};

use crate::entry::{LedgerEntry, PostedEntry, SourceType};
use crate::projector;
use crate::store::{EntryFilter, LedgerStore, LedgerStoreError};

/// Which subsequence of the ledger a batch-scope check runs over.
///
/// `Pooled` treats the batch as one pool regardless of which item posted the
/// entry (production batches, and conversion batches shared between a parent
/// item and its unit-of-measure variants). `PerItem` confines the check to
/// the `(batch, item)` pair (sub-assembly registrations, where distinct items
/// share the container but not the stock).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchScopeRule {
    Pooled,
    PerItem,
}

/// The grouping key a violation was detected under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationScope {
    Item {
        item_id: ItemId,
        location_id: LocationId,
    },
    Batch {
        batch_id: BatchId,
    },
}

impl core::fmt::Display for ViolationScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ViolationScope::Item {
                item_id,
                location_id,
            } => write!(f, "item {item_id} at {location_id}"),
            ViolationScope::Batch { batch_id } => write!(f, "batch {batch_id}"),
        }
    }
}

/// A future point where accepting the candidate would drive projected stock
/// negative. Fatal to the candidate's transaction; never retried.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error(
    "projected stock for {scope} falls to {balance_after} at {at} \
     ({shortfall} more units needed, first violated by {source_type:?} {source_id})"
)]
pub struct NegativeStockError {
    pub scope: ViolationScope,
    /// Effective instant of the first violating entry.
    pub at: NaiveDateTime,
    pub balance_after: f64,
    /// How many more units would be needed at `at`.
    pub shortfall: f64,
    /// Identity of the first violating entry (possibly the candidate itself).
    pub source_type: SourceType,
    pub source_id: SourceId,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    NegativeStock(#[from] NegativeStockError),

    #[error(transparent)]
    Store(#[from] LedgerStoreError),
}

/// Lookahead check rejecting a candidate entry that would cause a negative
/// projected balance at or after its effective instant.
///
/// The check runs over the candidate's full forward window, so retroactive
/// postings are validated against everything that already happened "later".
pub struct NegativeStockValidator<'a, S: ?Sized> {
    store: &'a S,
    settings: &'a StockSettings,
}

impl<'a, S> NegativeStockValidator<'a, S>
where
    S: LedgerStore + ?Sized,
{
    pub fn new(store: &'a S, settings: &'a StockSettings) -> Self {
        Self { store, settings }
    }

    /// Validate `candidate` at item scope and, when it names a batch, at
    /// batch scope. Both must pass.
    ///
    /// `batch_rule` selects the batch subsequence; `None` with a batch
    /// present falls back to `Pooled`. `override_allowed` is a
    /// per-transaction exemption on top of the settings-level ones.
    pub fn validate(
        &self,
        candidate: &LedgerEntry,
        batch_rule: Option<BatchScopeRule>,
        override_allowed: bool,
    ) -> Result<(), ValidationError> {
        let epsilon = self.settings.epsilon;

        if override_allowed || self.settings.allows_negative(candidate.item_id) {
            debug!(item = %candidate.item_id, "negative stock validation skipped: override");
            return Ok(());
        }
        if !candidate.is_risk_bearing(epsilon) {
            return Ok(());
        }
        if candidate.is_covered_reconciliation(epsilon) {
            debug!(
                source = %candidate.source_id,
                "reconciliation decrease covered by documented target, skipping"
            );
            return Ok(());
        }

        let item_filter = EntryFilter {
            item_id: Some(candidate.item_id),
            locations: Some(vec![candidate.location_id]),
            ..EntryFilter::default()
        };
        self.check_scope(
            candidate,
            item_filter,
            ViolationScope::Item {
                item_id: candidate.item_id,
                location_id: candidate.location_id,
            },
        )?;

        if let Some(batch_id) = candidate.batch_id {
            let filter = match batch_rule.unwrap_or(BatchScopeRule::Pooled) {
                BatchScopeRule::Pooled => EntryFilter {
                    batches: Some(vec![batch_id]),
                    ..EntryFilter::default()
                },
                BatchScopeRule::PerItem => EntryFilter {
                    item_id: Some(candidate.item_id),
                    batches: Some(vec![batch_id]),
                    ..EntryFilter::default()
                },
            };
            self.check_scope(candidate, filter, ViolationScope::Batch { batch_id })?;
        }

        Ok(())
    }

    /// Project the scope's forward window with the candidate logically
    /// inserted at its sorted position and report the first dip below zero.
    fn check_scope(
        &self,
        candidate: &LedgerEntry,
        filter: EntryFilter,
        scope: ViolationScope,
    ) -> Result<(), ValidationError> {
        let existing = self.store.entries(&filter)?;
        let cut = candidate.effective_at();

        // Entries strictly before the candidate's instant form the opening
        // balance; same-instant entries stay in the window and keep their
        // insertion order ahead of the candidate.
        let opening: f64 = existing
            .iter()
            .take_while(|e| e.effective_at() < cut)
            .map(|e| e.entry.qty_delta)
            .sum();

        let mut window: Vec<PostedEntry> = existing
            .into_iter()
            .skip_while(|e| e.effective_at() < cut)
            .collect();
        window.push(PostedEntry {
            creation_seq: u64::MAX,
            entry: candidate.clone(),
        });
        window.sort_by_key(PostedEntry::ordering_key);

        match projector::first_shortfall(&window, opening, self.settings.epsilon) {
            None => Ok(()),
            Some(hit) => {
                let violation = NegativeStockError {
                    scope,
                    at: hit.entry.effective_at(),
                    balance_after: hit.balance_after,
                    shortfall: -hit.balance_after,
                    source_type: hit.entry.entry.source_type,
                    source_id: hit.entry.entry.source_id,
                };
                warn!(%violation.scope, at = %violation.at, shortfall = violation.shortfall,
                    "negative stock violation");
                Err(violation.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn time(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    struct Fixture {
        store: InMemoryLedgerStore,
        settings: StockSettings,
        item: ItemId,
        location: LocationId,
        batch: BatchId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: InMemoryLedgerStore::new(),
                settings: StockSettings::default(),
                item: ItemId::new(),
                location: LocationId::new(),
                batch: BatchId::new(),
            }
        }

        fn seed(&self, delta: f64, day: u32) {
            let entry = LedgerEntry::new(
                self.item,
                self.location,
                delta,
                date(day),
                time(9),
                SourceType::StockEntry,
                SourceId::new(),
            )
            .in_batch(self.batch);
            self.store.append(entry).unwrap();
        }

        fn candidate(&self, delta: f64, day: u32) -> LedgerEntry {
            LedgerEntry::new(
                self.item,
                self.location,
                delta,
                date(day),
                time(9),
                SourceType::StockEntry,
                SourceId::new(),
            )
            .in_batch(self.batch)
        }

        fn validate(&self, candidate: &LedgerEntry) -> Result<(), ValidationError> {
            NegativeStockValidator::new(&self.store, &self.settings).validate(
                candidate,
                Some(BatchScopeRule::Pooled),
                false,
            )
        }
    }

    #[test]
    fn retroactive_decrease_fails_at_the_later_entry() {
        // +100 at t1, -40 at t3; a -70 inserted between must be caught at t3:
        // balance at t2 = 30, at t3 = -10.
        let fx = Fixture::new();
        fx.seed(100.0, 1);
        fx.seed(-40.0, 3);

        let err = fx.validate(&fx.candidate(-70.0, 2)).unwrap_err();
        let ValidationError::NegativeStock(violation) = err else {
            panic!("expected a negative stock violation");
        };
        assert_eq!(violation.at, date(3).and_time(time(9)));
        assert!((violation.shortfall - 10.0).abs() < 1e-9);
    }

    #[test]
    fn candidate_itself_can_be_the_violating_entry() {
        let fx = Fixture::new();
        fx.seed(30.0, 1);

        let err = fx.validate(&fx.candidate(-50.0, 2)).unwrap_err();
        let ValidationError::NegativeStock(violation) = err else {
            panic!("expected a negative stock violation");
        };
        assert_eq!(violation.at, date(2).and_time(time(9)));
        assert!((violation.shortfall - 20.0).abs() < 1e-9);
    }

    #[test]
    fn admissible_decrease_passes() {
        let fx = Fixture::new();
        fx.seed(100.0, 1);
        fx.seed(-40.0, 3);

        assert!(fx.validate(&fx.candidate(-60.0, 2)).is_ok());
    }

    #[test]
    fn increases_from_movements_skip_validation() {
        let fx = Fixture::new();
        // Nothing in the ledger; an increase is always admissible.
        assert!(fx.validate(&fx.candidate(5.0, 1)).is_ok());
    }

    #[test]
    fn per_transaction_override_skips_validation() {
        let fx = Fixture::new();
        let candidate = fx.candidate(-10.0, 1);
        let validator = NegativeStockValidator::new(&fx.store, &fx.settings);
        assert!(validator
            .validate(&candidate, Some(BatchScopeRule::Pooled), true)
            .is_ok());
    }

    #[test]
    fn per_item_exemption_skips_validation() {
        let mut fx = Fixture::new();
        fx.settings.negative_stock_items.insert(fx.item);
        assert!(fx.validate(&fx.candidate(-10.0, 1)).is_ok());
    }

    #[test]
    fn covered_reconciliation_decrease_is_exempt() {
        let fx = Fixture::new();
        let mut candidate = fx.candidate(-10.0, 1).with_target_qty(25.0);
        candidate.source_type = SourceType::StockReconciliation;
        assert!(fx.validate(&candidate).is_ok());
    }

    #[test]
    fn uncovered_reconciliation_decrease_is_validated() {
        let fx = Fixture::new();
        let mut candidate = fx.candidate(-10.0, 1);
        candidate.source_type = SourceType::StockReconciliation;
        assert!(fx.validate(&candidate).is_err());
    }

    #[test]
    fn per_item_batch_rule_ignores_other_items_in_the_batch() {
        let fx = Fixture::new();
        let other_item = ItemId::new();

        // The other item drained the shared container; with PerItem scoping
        // that must not block this item (it has its own subsequence).
        let other = LedgerEntry::new(
            other_item,
            fx.location,
            -25.0,
            date(1),
            time(9),
            SourceType::StockEntry,
            SourceId::new(),
        )
        .in_batch(fx.batch);
        fx.store.append(other).unwrap();
        fx.seed(10.0, 1);

        let candidate = fx.candidate(-5.0, 2);
        let validator = NegativeStockValidator::new(&fx.store, &fx.settings);
        assert!(validator
            .validate(&candidate, Some(BatchScopeRule::PerItem), false)
            .is_ok());
        // Pooled scoping sees the drained pool and rejects.
        assert!(validator
            .validate(&candidate, Some(BatchScopeRule::Pooled), false)
            .is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a ledger built exclusively through validated inserts
        /// (rejections dropped) never has a negative prefix, in any order of
        /// arrival, retroactive postings included.
        #[test]
        fn validated_ledgers_never_go_negative(
            movements in prop::collection::vec(
                (1u32..28, (-100i32..100).prop_map(|n| f64::from(n) * 0.5)),
                1..16,
            ),
        ) {
            let fx = Fixture::new();
            let mut accepted = 0u32;
            for (day, delta) in movements {
                let candidate = fx.candidate(delta, day);
                if fx.validate(&candidate).is_ok() {
                    fx.store.append(candidate).unwrap();
                    accepted += 1;
                }
            }

            let filter = EntryFilter {
                item_id: Some(fx.item),
                locations: Some(vec![fx.location]),
                ..EntryFilter::default()
            };
            let all = fx.store.entries(&filter).unwrap();
            prop_assert_eq!(all.len() as u32, accepted);
            for point in projector::project(&all, 0.0) {
                prop_assert!(point.balance_after >= -fx.settings.epsilon);
            }
        }
    }
}
