//! Reference data and stop-list models

pub mod error_solution;
pub mod stop_list;
pub mod store_policy;

pub use error_solution::{ErrorSolution, RemediationKind};
pub use stop_list::{ItemKind, StopListEntry};
pub use store_policy::StoreRetryPolicy;
