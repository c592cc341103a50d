//! Shared types for Crab delivery reconciliation
//!
//! Domain types used by the reconciliation core and by the vendor adapters
//! that plug into it: the order record and its status vocabulary, per-store
//! retry policies, the error-solution catalog and stop-list entries.

pub mod models;
pub mod order;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use models::{ErrorSolution, ItemKind, RemediationKind, StopListEntry, StoreRetryPolicy};
pub use order::{
    DeliveryOrder, FailReason, FailureClass, OrderStatus, PropagationMarks, StatusHistoryEntry,
    TransitionSource,
};
