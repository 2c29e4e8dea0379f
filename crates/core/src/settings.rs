//! Engine configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::id::ItemId;
use crate::policy::PickPolicy;
use crate::qty;

/// Host-provided configuration for the stock engine.
///
/// Deserialized from whatever configuration mechanism the host uses; all
/// fields have conservative defaults (negative stock forbidden everywhere,
/// oldest-first allocation, 1e-6 tolerance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockSettings {
    /// Global switch: when true, no negative stock validation runs at all.
    pub allow_negative_stock: bool,
    /// Per-item exemptions from negative stock validation.
    pub negative_stock_items: HashSet<ItemId>,
    /// Policy used when a caller does not specify one.
    pub default_policy: PickPolicy,
    /// Tolerance for all near-zero quantity comparisons.
    pub epsilon: f64,
}

impl Default for StockSettings {
    fn default() -> Self {
        Self {
            allow_negative_stock: false,
            negative_stock_items: HashSet::new(),
            default_policy: PickPolicy::default(),
            epsilon: qty::DEFAULT_EPSILON,
        }
    }
}

impl StockSettings {
    /// Whether `item` is exempt from negative stock validation.
    pub fn allows_negative(&self, item: ItemId) -> bool {
        self.allow_negative_stock || self.negative_stock_items.contains(&item)
    }
}
