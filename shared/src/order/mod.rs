//! Delivery order domain types

pub mod status;
pub mod types;

pub use status::{OrderStatus, TransitionSource, UnknownStatus};
pub use types::{
    DeliveryOrder, FailReason, FailureClass, PropagationMarks, StatusHistoryEntry,
};
