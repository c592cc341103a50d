//! Delivery order reconciliation
//!
//! - **store**: Order Store / Stop List Store contracts
//! - **storage**: redb-based implementation of both stores
//! - **state_machine**: status transition validation
//! - **propagator**: pushes status changes to POS and aggregator
//! - **resolution**: classifies POS errors, suspends items, notifies operators
//! - **retry**: bounded resubmission of failed POS order creation
//! - **sweep**: time-driven auto-ready / auto-close passes
//! - **intake**: inbound status events (webhooks)
//!
//! # Data Flow
//!
//! ```text
//! webhook ──► StatusIntake ──► StateMachine ──► OrderStore ──► Propagator ──► Adapters
//! retry   ──► RetryCoordinator ──► POS create ─┬─► OrderStore (NEW)
//!                                              └─► ErrorResolver ──► StopList + Notifier
//! cron    ──► TransitionSweep ──► StateMachine ──► OrderStore ──► Propagator
//! ```

pub mod intake;
pub mod propagator;
pub mod resolution;
pub mod retry;
pub mod state_machine;
pub mod storage;
pub mod store;
pub mod summary;
pub mod sweep;

// Re-exports
pub use intake::{IntakeError, IntakeOutcome, StatusEvent, StatusIntake};
pub use propagator::{PropagationReport, Propagator, SideOutcome, Targets};
pub use resolution::{ErrorResolver, RemediationOutcome, Resolution, ResolutionError};
pub use retry::{RetryBatch, RetryCoordinator, RetryError, RetryOutcome, RetryRequest};
pub use state_machine::{Transition, TransitionError, apply_status, force_status};
pub use storage::{OrderStorage, StorageError, StorageResult};
pub use store::{OrderRef, OrderStore, StopListStore};
pub use summary::{BatchPass, BatchSummary};
pub use sweep::TransitionSweep;

// Re-export shared types for convenience
pub use shared::order::{DeliveryOrder, OrderStatus, TransitionSource};
