//! 订单状态词汇表
//!
//! 状态名称在存储层和对外推送时原样使用 (SCREAMING_SNAKE_CASE)。
//!
//! # 配送主流程
//!
//! ```text
//! NEW → WAIT_SENDING → ACCEPTED → WAIT_COOKING → COOKING_STARTED → COOKING_COMPLETE
//!     → READY_FOR_PICKUP → OUT_FOR_DELIVERY | PICKED_UP_BY_CUSTOMER → DELIVERED → CLOSED
//! ```
//!
//! 旁路分支：`CANCELLED_BY_POS_SYSTEM`、`CANCELLED_BY_DELIVERY_SERVICE`、`FAILED`。
//! 支付子状态 (`PAYMENT_*`) 与配送流程正交。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 订单状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    // ========== 配送主流程 ==========
    New,
    /// 预订单：等待发送到 POS
    WaitSending,
    Accepted,
    WaitCooking,
    CookingStarted,
    CookingComplete,
    ReadyForPickup,
    OutForDelivery,
    PickedUpByCustomer,
    Delivered,
    Closed,

    // ========== 旁路分支 ==========
    CancelledByPosSystem,
    CancelledByDeliveryService,
    Failed,

    // ========== 支付子状态 ==========
    PaymentNew,
    PaymentInProgress,
    PaymentWaiting,
    PaymentSuccess,
    PaymentCanceled,
    PaymentDeleted,
}

impl OrderStatus {
    /// All statuses, in declaration order
    pub const ALL: [OrderStatus; 20] = [
        OrderStatus::New,
        OrderStatus::WaitSending,
        OrderStatus::Accepted,
        OrderStatus::WaitCooking,
        OrderStatus::CookingStarted,
        OrderStatus::CookingComplete,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
        OrderStatus::PickedUpByCustomer,
        OrderStatus::Delivered,
        OrderStatus::Closed,
        OrderStatus::CancelledByPosSystem,
        OrderStatus::CancelledByDeliveryService,
        OrderStatus::Failed,
        OrderStatus::PaymentNew,
        OrderStatus::PaymentInProgress,
        OrderStatus::PaymentWaiting,
        OrderStatus::PaymentSuccess,
        OrderStatus::PaymentCanceled,
        OrderStatus::PaymentDeleted,
    ];

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::WaitSending => "WAIT_SENDING",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::WaitCooking => "WAIT_COOKING",
            OrderStatus::CookingStarted => "COOKING_STARTED",
            OrderStatus::CookingComplete => "COOKING_COMPLETE",
            OrderStatus::ReadyForPickup => "READY_FOR_PICKUP",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::PickedUpByCustomer => "PICKED_UP_BY_CUSTOMER",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Closed => "CLOSED",
            OrderStatus::CancelledByPosSystem => "CANCELLED_BY_POS_SYSTEM",
            OrderStatus::CancelledByDeliveryService => "CANCELLED_BY_DELIVERY_SERVICE",
            OrderStatus::Failed => "FAILED",
            OrderStatus::PaymentNew => "PAYMENT_NEW",
            OrderStatus::PaymentInProgress => "PAYMENT_IN_PROGRESS",
            OrderStatus::PaymentWaiting => "PAYMENT_WAITING",
            OrderStatus::PaymentSuccess => "PAYMENT_SUCCESS",
            OrderStatus::PaymentCanceled => "PAYMENT_CANCELED",
            OrderStatus::PaymentDeleted => "PAYMENT_DELETED",
        }
    }

    /// 配送里程碑序号，旁路分支和支付子状态返回 `None`
    ///
    /// 同序号的两个状态 (`OUT_FOR_DELIVERY` / `PICKED_UP_BY_CUSTOMER`) 互为分支，不可互相到达。
    pub fn milestone(&self) -> Option<u8> {
        match self {
            OrderStatus::New => Some(0),
            OrderStatus::WaitSending => Some(1),
            OrderStatus::Accepted => Some(2),
            OrderStatus::WaitCooking => Some(3),
            OrderStatus::CookingStarted => Some(4),
            OrderStatus::CookingComplete => Some(5),
            OrderStatus::ReadyForPickup => Some(6),
            OrderStatus::OutForDelivery | OrderStatus::PickedUpByCustomer => Some(7),
            OrderStatus::Delivered => Some(8),
            OrderStatus::Closed => Some(9),
            _ => None,
        }
    }

    /// 支付子状态的前进序号（取消/删除为终态分支，返回 `None`）
    pub fn payment_rank(&self) -> Option<u8> {
        match self {
            OrderStatus::PaymentNew => Some(0),
            OrderStatus::PaymentInProgress => Some(1),
            OrderStatus::PaymentWaiting => Some(2),
            OrderStatus::PaymentSuccess => Some(3),
            _ => None,
        }
    }

    pub fn is_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::PaymentNew
                | OrderStatus::PaymentInProgress
                | OrderStatus::PaymentWaiting
                | OrderStatus::PaymentSuccess
                | OrderStatus::PaymentCanceled
                | OrderStatus::PaymentDeleted
        )
    }

    pub fn is_payment_terminal(&self) -> bool {
        matches!(self, OrderStatus::PaymentCanceled | OrderStatus::PaymentDeleted)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            OrderStatus::CancelledByPosSystem | OrderStatus::CancelledByDeliveryService
        )
    }

    /// 无条件终态：`CLOSED` 与所有取消状态
    ///
    /// `FAILED` 只有在重试上限耗尽后才是终态，见 `DeliveryOrder::is_terminal`。
    pub fn is_final(&self) -> bool {
        *self == OrderStatus::Closed || self.is_cancelled()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// Transition Source
// ============================================================================

/// 状态变更来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionSource {
    /// POS 系统回调
    Pos,
    /// 外卖平台回调
    Aggregator,
    /// 重试协调器
    Retry,
    /// 定时扫描
    Sweep,
    /// 错误解析引擎
    Resolution,
    /// 人工干预
    Manual,
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionSource::Pos => write!(f, "pos"),
            TransitionSource::Aggregator => write!(f, "aggregator"),
            TransitionSource::Retry => write!(f, "retry"),
            TransitionSource::Sweep => write!(f, "sweep"),
            TransitionSource::Resolution => write!(f, "resolution"),
            TransitionSource::Manual => write!(f, "manual"),
        }
    }
}
