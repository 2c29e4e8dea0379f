use std::sync::{Arc, RwLock};

use chrono::NaiveDateTime;
use thiserror::Error;

use batchstock_core::{BatchId, ItemId, LocationId, SourceId};

use crate::entry::{LedgerEntry, PostedEntry};

/// Ledger store operation error.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    #[error("ledger store lock poisoned")]
    Poisoned,

    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// Filter criteria for ledger scans.
///
/// A `None` field means "no constraint". The same filter drives both the
/// validator (scope + future window) and the allocator (scope + as-of cutoff
/// + self-exclusion), so "ignore these source documents" stays an explicit
/// argument rather than hidden state.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub item_id: Option<ItemId>,
    pub locations: Option<Vec<LocationId>>,
    pub batches: Option<Vec<BatchId>>,
    /// Restrict to entries originating from these documents.
    pub sources: Option<Vec<SourceId>>,
    /// Drop entries originating from these documents (a document querying
    /// availability as if its own in-flight entries did not count).
    pub exclude_sources: Vec<SourceId>,
    /// Inclusive lower bound on the effective instant.
    pub effective_from: Option<NaiveDateTime>,
    /// Inclusive upper bound on the effective instant.
    pub effective_up_to: Option<NaiveDateTime>,
    /// Voided entries are invisible unless explicitly requested.
    pub include_voided: bool,
}

impl EntryFilter {
    pub fn matches(&self, posted: &PostedEntry) -> bool {
        let e = &posted.entry;

        if !self.include_voided && e.is_voided {
            return false;
        }
        if let Some(item_id) = self.item_id
            && e.item_id != item_id
        {
            return false;
        }
        if let Some(locations) = &self.locations
            && !locations.contains(&e.location_id)
        {
            return false;
        }
        if let Some(batches) = &self.batches {
            match e.batch_id {
                Some(b) if batches.contains(&b) => {}
                _ => return false,
            }
        }
        if let Some(sources) = &self.sources
            && !sources.contains(&e.source_id)
        {
            return false;
        }
        if self.exclude_sources.contains(&e.source_id) {
            return false;
        }
        if let Some(from) = self.effective_from
            && posted.effective_at() < from
        {
            return false;
        }
        if let Some(up_to) = self.effective_up_to
            && posted.effective_at() > up_to
        {
            return false;
        }

        true
    }
}

/// Append-mostly ledger persistence boundary.
///
/// The engine only reads and appends through this trait; the host owns the
/// actual persistence. Implementations must:
/// - assign `creation_seq` monotonically, never reusing a value,
/// - return scans sorted by `(posting_date, posting_time, creation_seq)`,
/// - void logically (`is_voided = true`), never delete.
pub trait LedgerStore: Send + Sync {
    /// Persist a candidate entry and assign its insertion sequence.
    fn append(&self, entry: LedgerEntry) -> Result<PostedEntry, LedgerStoreError>;

    /// Matching entries sorted by the combined ordering key.
    fn entries(&self, filter: &EntryFilter) -> Result<Vec<PostedEntry>, LedgerStoreError>;

    /// Void every entry of a source document, returning the voided entries.
    /// Entries keep their sequence; the flag flip is the only mutation the
    /// ledger ever performs.
    fn void_source(&self, source_id: SourceId) -> Result<Vec<PostedEntry>, LedgerStoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn append(&self, entry: LedgerEntry) -> Result<PostedEntry, LedgerStoreError> {
        (**self).append(entry)
    }

    fn entries(&self, filter: &EntryFilter) -> Result<Vec<PostedEntry>, LedgerStoreError> {
        (**self).entries(filter)
    }

    fn void_source(&self, source_id: SourceId) -> Result<Vec<PostedEntry>, LedgerStoreError> {
        (**self).void_source(source_id)
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    entries: RwLock<Vec<PostedEntry>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(&self, entry: LedgerEntry) -> Result<PostedEntry, LedgerStoreError> {
        if !entry.qty_delta.is_finite() {
            return Err(LedgerStoreError::InvalidAppend(format!(
                "qty_delta must be finite, got {}",
                entry.qty_delta
            )));
        }
        if let Some(target) = entry.target_qty
            && !target.is_finite()
        {
            return Err(LedgerStoreError::InvalidAppend(format!(
                "target_qty must be finite, got {target}"
            )));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerStoreError::Poisoned)?;

        let posted = PostedEntry {
            creation_seq: entries.len() as u64 + 1,
            entry,
        };
        entries.push(posted.clone());
        Ok(posted)
    }

    fn entries(&self, filter: &EntryFilter) -> Result<Vec<PostedEntry>, LedgerStoreError> {
        let entries = self.entries.read().map_err(|_| LedgerStoreError::Poisoned)?;

        let mut matched: Vec<PostedEntry> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by_key(PostedEntry::ordering_key);
        Ok(matched)
    }

    fn void_source(&self, source_id: SourceId) -> Result<Vec<PostedEntry>, LedgerStoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerStoreError::Poisoned)?;

        let mut voided = Vec::new();
        for posted in entries.iter_mut() {
            if posted.entry.source_id == source_id && !posted.entry.is_voided {
                posted.entry.is_voided = true;
                voided.push(posted.clone());
            }
        }
        Ok(voided)
    }
}
