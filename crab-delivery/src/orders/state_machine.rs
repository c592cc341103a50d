//! 订单状态机
//!
//! 只负责校验和应用状态变更 (纯函数，修改内存中的订单)；持久化由调用方通过
//! 条件写完成。
//!
//! # 规则
//!
//! - 目标状态 == 当前状态：幂等，不追加历史
//! - 终态 (CLOSED / CANCELLED_* / 重试耗尽的 FAILED)：拒绝，只能人工覆盖 [`force_status`]
//! - 支付子状态：只更新 `payment_status`，按支付序号前进
//! - CANCELLED_* / FAILED：任意非终态均可到达
//! - 非终态 FAILED、尚未发送到 POS 的 WAIT_SENDING：只能由重试协调器回到 NEW
//! - 其余：目标里程碑必须严格大于当前里程碑

use shared::order::{DeliveryOrder, OrderStatus, StatusHistoryEntry, TransitionSource};
use thiserror::Error;

/// State transition errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {order_id} is terminal ({status})")]
    Terminal {
        order_id: String,
        status: OrderStatus,
    },
}

pub type TransitionResult<T> = Result<T, TransitionError>;

/// Result of applying a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `from` 为 `None`：订单第一次收到支付子状态
    Applied {
        from: Option<OrderStatus>,
        to: OrderStatus,
    },
    Unchanged,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// 校验变更是否合法 (不修改订单)
pub fn check_transition(
    order: &DeliveryOrder,
    to: OrderStatus,
    source: TransitionSource,
) -> TransitionResult<Transition> {
    if to.is_payment() {
        return check_payment(order, to);
    }

    let from = order.status;
    if from == to {
        return Ok(Transition::Unchanged);
    }
    if order.is_terminal() {
        return Err(TransitionError::Terminal {
            order_id: order.id.clone(),
            status: from,
        });
    }

    let invalid = || TransitionError::InvalidTransition {
        order_id: order.id.clone(),
        from,
        to,
    };

    let applied = Transition::Applied {
        from: Some(from),
        to,
    };

    if to.is_cancelled() {
        return Ok(applied);
    }

    // POS 建单成功：FAILED / 未发送的预订单回到 NEW
    if to == OrderStatus::New
        && source == TransitionSource::Retry
        && (from == OrderStatus::Failed
            || (from == OrderStatus::WaitSending && order.pos_order_id.is_none()))
    {
        return Ok(applied);
    }

    if from == OrderStatus::Failed {
        return Err(invalid());
    }

    if to == OrderStatus::Failed {
        return Ok(applied);
    }

    match (from.milestone(), to.milestone()) {
        (Some(current), Some(target)) if target > current => Ok(applied),
        _ => Err(invalid()),
    }
}

fn check_payment(order: &DeliveryOrder, to: OrderStatus) -> TransitionResult<Transition> {
    let Some(from) = order.payment_status else {
        return Ok(Transition::Applied { from: None, to });
    };
    if from == to {
        return Ok(Transition::Unchanged);
    }
    if from.is_payment_terminal() {
        return Err(TransitionError::Terminal {
            order_id: order.id.clone(),
            status: from,
        });
    }
    if to.is_payment_terminal() {
        return Ok(Transition::Applied {
            from: Some(from),
            to,
        });
    }

    match (from.payment_rank(), to.payment_rank()) {
        (Some(current), Some(target)) if target > current => Ok(Transition::Applied {
            from: Some(from),
            to,
        }),
        _ => Err(TransitionError::InvalidTransition {
            order_id: order.id.clone(),
            from,
            to,
        }),
    }
}

/// 应用状态变更
///
/// 合法变更追加一条历史记录；`Unchanged` 时订单保持不变。
pub fn apply_status(
    order: &mut DeliveryOrder,
    to: OrderStatus,
    source: TransitionSource,
    at: i64,
) -> TransitionResult<Transition> {
    apply_status_with_note(order, to, source, at, None)
}

pub fn apply_status_with_note(
    order: &mut DeliveryOrder,
    to: OrderStatus,
    source: TransitionSource,
    at: i64,
    note: Option<String>,
) -> TransitionResult<Transition> {
    let transition = check_transition(order, to, source)?;
    if transition == Transition::Unchanged {
        return Ok(transition);
    }

    if to.is_payment() {
        order.payment_status = Some(to);
    } else {
        order.status = to;
        if to == OrderStatus::CookingComplete && order.cooking_complete_time.is_none() {
            order.cooking_complete_time = Some(at);
        }
    }
    order.status_history.push(StatusHistoryEntry {
        status: to,
        timestamp: at,
        source,
        note,
    });

    tracing::debug!(
        order_id = %order.id,
        status = %to,
        source = %source,
        "Status applied"
    );
    Ok(transition)
}

/// 人工覆盖：唯一可以离开终态的操作，总是追加一条 `Manual` 历史
pub fn force_status(
    order: &mut DeliveryOrder,
    to: OrderStatus,
    operator_note: impl Into<String>,
    at: i64,
) -> Transition {
    let from = if to.is_payment() {
        order.payment_status
    } else {
        Some(order.status)
    };
    let note = operator_note.into();
    if to.is_payment() {
        order.payment_status = Some(to);
    } else {
        order.status = to;
        if to != OrderStatus::Failed {
            order.fail_reason = None;
        }
    }
    order.status_history.push(StatusHistoryEntry {
        status: to,
        timestamp: at,
        source: TransitionSource::Manual,
        note: Some(note.clone()),
    });

    tracing::warn!(
        order_id = %order.id,
        from = ?from,
        to = %to,
        note = %note,
        "Manual status override"
    );
    Transition::Applied { from, to }
}
