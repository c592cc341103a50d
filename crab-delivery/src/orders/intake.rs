//! 入站状态事件处理 (webhook)
//!
//! 事件先经过状态机校验；非法变更只记录警告，不写入。
//! 取消和平台发起的关单需要先在 POS 成功执行，再提交内部终态；
//! 其余状态先提交，再推送到另一方。

use shared::order::{DeliveryOrder, OrderStatus, TransitionSource};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::propagator::{PropagationError, PropagationReport, Propagator, targets_for};
use super::state_machine::{
    Transition, TransitionError, apply_status_with_note, check_transition,
};
use super::storage::StorageError;
use super::store::{OrderRef, OrderStore, with_store_deadline};

/// 入站状态事件
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub reference: OrderRef,
    pub status: OrderStatus,
    pub source: TransitionSource,
    pub reason: Option<String>,
    pub received_at: i64,
}

/// Intake errors
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

pub type IntakeResult<T> = Result<T, IntakeError>;

/// 处理结果
#[derive(Debug, Clone)]
pub enum IntakeOutcome {
    Applied {
        order: DeliveryOrder,
        propagation: Option<PropagationReport>,
    },
    /// 重复事件，订单已处于该状态
    Unchanged { order_id: String },
}

/// 入站状态处理器
#[derive(Clone)]
pub struct StatusIntake {
    store: Arc<dyn OrderStore>,
    propagator: Propagator,
    store_timeout: Duration,
}

impl StatusIntake {
    pub fn new(store: Arc<dyn OrderStore>, propagator: Propagator, store_timeout: Duration) -> Self {
        Self {
            store,
            propagator,
            store_timeout,
        }
    }

    pub async fn handle(&self, event: StatusEvent) -> IntakeResult<IntakeOutcome> {
        let order = with_store_deadline(self.store_timeout, self.store.resolve(&event.reference))
            .await?
            .ok_or_else(|| IntakeError::OrderNotFound(event.reference.to_string()))?;

        match check_transition(&order, event.status, event.source) {
            Ok(Transition::Unchanged) => {
                tracing::debug!(order_id = %order.id, status = %event.status, "Duplicate status event ignored");
                return Ok(IntakeOutcome::Unchanged { order_id: order.id });
            }
            Ok(Transition::Applied { .. }) => {}
            Err(e) => {
                tracing::warn!(
                    order_id = %order.id,
                    from = %order.status,
                    to = %event.status,
                    source = %event.source,
                    error = %e,
                    "Rejected status event"
                );
                return Err(e.into());
            }
        }

        let pos_first = must_commit_at_pos_first(&order, &event);
        if pos_first {
            if event.status == OrderStatus::Closed {
                self.propagator.close_at_pos(&order).await?;
            } else {
                let reason = event.reason.as_deref().unwrap_or("cancelled by delivery service");
                self.propagator.cancel_at_pos(&order, reason).await?;
            }
        }

        let saved = self.commit(order, &event, pos_first).await?;
        tracing::info!(
            order_id = %saved.id,
            status = %event.status,
            source = %event.source,
            "Status event applied"
        );

        let mut targets = targets_for(
            event.source,
            self.propagator.adapters().requires_accept_ack(&saved),
        );
        if pos_first {
            targets.pos = false;
        }
        let propagation = if targets.is_empty() {
            None
        } else {
            Some(self.propagator.propagate(saved.clone(), event.status, targets).await)
        };
        let order = propagation
            .as_ref()
            .map(|report| report.order.clone())
            .unwrap_or(saved);

        Ok(IntakeOutcome::Applied { order, propagation })
    }

    /// 应用并条件写入；版本冲突时重新加载、重新校验，再写一次
    async fn commit(
        &self,
        order: DeliveryOrder,
        event: &StatusEvent,
        pos_notified: bool,
    ) -> IntakeResult<DeliveryOrder> {
        let apply = |target: &mut DeliveryOrder| -> IntakeResult<()> {
            apply_status_with_note(
                target,
                event.status,
                event.source,
                event.received_at,
                event.reason.clone(),
            )?;
            if pos_notified {
                target.propagated.pos = Some(event.status);
            }
            Ok(())
        };

        let mut next = order.clone();
        apply(&mut next)?;
        match with_store_deadline(self.store_timeout, self.store.compare_and_save(&next)).await {
            Ok(saved) => Ok(saved),
            Err(StorageError::Conflict { .. }) => {
                let mut fresh = with_store_deadline(self.store_timeout, self.store.get(&order.id))
                    .await?
                    .ok_or_else(|| IntakeError::OrderNotFound(order.id.clone()))?;
                apply(&mut fresh)?;
                Ok(with_store_deadline(self.store_timeout, self.store.compare_and_save(&fresh))
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// 取消 / 平台关单：POS 上存在订单且不是 POS 自己发起时，先在 POS 执行
fn must_commit_at_pos_first(order: &DeliveryOrder, event: &StatusEvent) -> bool {
    if event.source == TransitionSource::Pos || order.pos_order_id.is_none() {
        return false;
    }
    event.status.is_cancelled()
        || (event.status == OrderStatus::Closed && event.source == TransitionSource::Aggregator)
}
