//! Running-balance projection over an ordered entry sequence.
//!
//! The shared primitive under both validation and allocation: a pure fold
//! over entries already sorted by `(posting_date, posting_time,
//! creation_seq)`. Identical input always yields identical output.

use chrono::NaiveDateTime;

use batchstock_core::qty;

use crate::entry::PostedEntry;

/// One point of the running balance: the entry and the balance after it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedBalance<'a> {
    pub entry: &'a PostedEntry,
    pub balance_after: f64,
}

/// Running balance after each entry, starting from `opening`.
pub fn project(entries: &[PostedEntry], opening: f64) -> Vec<ProjectedBalance<'_>> {
    let mut balance = opening;
    entries
        .iter()
        .map(|entry| {
            balance += entry.entry.qty_delta;
            ProjectedBalance {
                entry,
                balance_after: balance,
            }
        })
        .collect()
}

/// Balance after the last entry with `effective_at <= as_of`.
pub fn balance_as_of(entries: &[PostedEntry], as_of: NaiveDateTime) -> f64 {
    entries
        .iter()
        .take_while(|e| e.effective_at() <= as_of)
        .map(|e| e.entry.qty_delta)
        .sum()
}

/// First point where the running balance drops below `-epsilon`.
pub fn first_shortfall(
    entries: &[PostedEntry],
    opening: f64,
    epsilon: f64,
) -> Option<ProjectedBalance<'_>> {
    let mut balance = opening;
    for entry in entries {
        balance += entry.entry.qty_delta;
        if qty::is_negative(balance, epsilon) {
            return Some(ProjectedBalance {
                entry,
                balance_after: balance,
            });
        }
    }
    None
}
