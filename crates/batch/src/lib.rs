//! Batch containers: lifecycle state, consumer associations, and
//! policy-ordered allocation of available quantity.

pub mod allocator;
pub mod batch;
pub mod registry;
pub mod store;

pub use allocator::{
    Allocation, AllocatorError, AvailabilityQuery, BatchAllocator, BatchAvailability, BatchPick,
};
pub use batch::{AssociationKind, Batch, BatchAssociation, BatchKind, BatchStatus};
pub use registry::{BatchAccessError, BatchLifecycleRegistry};
pub use store::{AssociationOutcome, BatchStore, BatchStoreError, InMemoryBatchStore};
