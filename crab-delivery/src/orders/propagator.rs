//! 跨系统状态推送
//!
//! 内部状态是唯一事实来源。推送失败不回滚内部状态：失败的一侧记为待补推
//! (`propagated.pending_*`)，由定时扫描的补推批次 [`Propagator::repush`] 重新推送。
//! 例外：POS 关单 / 取消必须先成功，调用方才能提交内部终态
//! (见 [`Propagator::close_at_pos`] / [`Propagator::cancel_at_pos`])。

use shared::order::{DeliveryOrder, OrderStatus, PropagationMarks, TransitionSource};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::storage::StorageError;
use super::store::{OrderStore, with_store_deadline};
use crate::adapters::{AdapterError, AdapterRegistry, with_deadline};

/// Propagation errors (close / cancel only)
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Order {0} has no POS order id")]
    MissingPosOrderId(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// 需要通知的外部系统
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Targets {
    pub pos: bool,
    pub aggregator: bool,
}

impl Targets {
    pub const BOTH: Targets = Targets {
        pos: true,
        aggregator: true,
    };
    pub const NONE: Targets = Targets {
        pos: false,
        aggregator: false,
    };

    pub fn is_empty(&self) -> bool {
        !self.pos && !self.aggregator
    }
}

/// 根据变更来源选择推送目标：来源方已知晓，推给另一方
pub fn targets_for(source: TransitionSource, requires_accept_ack: bool) -> Targets {
    match source {
        TransitionSource::Aggregator => Targets {
            pos: true,
            aggregator: false,
        },
        TransitionSource::Pos => Targets {
            pos: false,
            aggregator: true,
        },
        TransitionSource::Sweep | TransitionSource::Manual => Targets::BOTH,
        TransitionSource::Retry => Targets {
            pos: false,
            aggregator: requires_accept_ack,
        },
        TransitionSource::Resolution => Targets::NONE,
    }
}

/// 单侧推送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideOutcome {
    Sent,
    /// 该侧已经收到过这个状态
    Skipped,
    /// 不在目标内，或缺少对端订单号
    NotApplicable,
    Failed(AdapterError),
}

impl SideOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SideOutcome::Failed(_))
    }

    /// 按推送结果更新一侧的标记；返回是否有变化
    ///
    /// 缺少适配器属于配置错误，不记待补推。
    fn settle(
        &self,
        status: OrderStatus,
        mark: &mut Option<OrderStatus>,
        pending: &mut Option<OrderStatus>,
    ) -> bool {
        let before = (*mark, *pending);
        match self {
            SideOutcome::Sent => {
                *mark = Some(status);
                *pending = None;
            }
            SideOutcome::Failed(AdapterError::Unavailable(_)) => {}
            SideOutcome::Failed(_) => *pending = Some(status),
            SideOutcome::Skipped | SideOutcome::NotApplicable => {
                if *pending == Some(status) {
                    *pending = None;
                }
            }
        }
        before != (*mark, *pending)
    }
}

/// 推送报告
#[derive(Debug, Clone)]
pub struct PropagationReport {
    pub order_id: String,
    pub status: OrderStatus,
    pub pos: SideOutcome,
    pub aggregator: SideOutcome,
    /// 最新的订单记录 (推送标记已持久化时为保存后的版本)
    pub order: DeliveryOrder,
}

impl PropagationReport {
    pub fn has_failures(&self) -> bool {
        self.pos.is_failed() || self.aggregator.is_failed()
    }

    /// 失败侧的错误描述
    pub fn failure_summary(&self) -> String {
        let mut parts = Vec::new();
        if let SideOutcome::Failed(e) = &self.pos {
            parts.push(format!("pos {}: {}", self.status, e));
        }
        if let SideOutcome::Failed(e) = &self.aggregator {
            parts.push(format!("aggregator {}: {}", self.status, e));
        }
        parts.join("; ")
    }
}

/// 跨系统推送器
#[derive(Clone)]
pub struct Propagator {
    store: Arc<dyn OrderStore>,
    adapters: AdapterRegistry,
    adapter_timeout: Duration,
    store_timeout: Duration,
}

impl Propagator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        adapters: AdapterRegistry,
        adapter_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            adapters,
            adapter_timeout,
            store_timeout,
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// 推送状态到选定的外部系统
    pub async fn propagate(
        &self,
        order: DeliveryOrder,
        status: OrderStatus,
        targets: Targets,
    ) -> PropagationReport {
        let pos = if !targets.pos {
            SideOutcome::NotApplicable
        } else if order.propagated.pos == Some(status) {
            SideOutcome::Skipped
        } else {
            self.push_pos(&order, status).await
        };

        let aggregator = if !targets.aggregator {
            SideOutcome::NotApplicable
        } else if order.propagated.aggregator == Some(status) {
            SideOutcome::Skipped
        } else {
            self.push_aggregator(&order, status).await
        };

        let settle = |marks: &mut PropagationMarks| -> bool {
            let mut changed = false;
            if targets.pos {
                changed |= pos.settle(status, &mut marks.pos, &mut marks.pending_pos);
            }
            if targets.aggregator {
                changed |= aggregator.settle(
                    status,
                    &mut marks.aggregator,
                    &mut marks.pending_aggregator,
                );
            }
            changed
        };
        let order = if settle(&mut order.propagated.clone()) {
            self.persist_marks(order, settle).await
        } else {
            order
        };

        let report = PropagationReport {
            order_id: order.id.clone(),
            status,
            pos,
            aggregator,
            order,
        };
        if report.has_failures() {
            tracing::warn!(
                order_id = %report.order_id,
                status = %status,
                pos = ?report.pos,
                aggregator = ?report.aggregator,
                "Status propagation partially failed"
            );
        }
        report
    }

    async fn push_pos(&self, order: &DeliveryOrder, status: OrderStatus) -> SideOutcome {
        let Some(pos_order_id) = order.pos_order_id.as_deref() else {
            return SideOutcome::NotApplicable;
        };
        let pos = match self.adapters.pos_for(order) {
            Ok(pos) => pos,
            Err(e) => return SideOutcome::Failed(e),
        };
        let reason = order.fail_reason.as_ref().map(|r| r.reason.as_str());
        match with_deadline(
            self.adapter_timeout,
            pos.update_status(pos_order_id, status, reason),
        )
        .await
        {
            Ok(()) => SideOutcome::Sent,
            Err(e) => SideOutcome::Failed(e),
        }
    }

    async fn push_aggregator(&self, order: &DeliveryOrder, status: OrderStatus) -> SideOutcome {
        let aggregator = match self.adapters.aggregator_for(order) {
            Ok(aggregator) => aggregator,
            Err(e) => return SideOutcome::Failed(e),
        };
        match with_deadline(
            self.adapter_timeout,
            aggregator.update_order_status(&order.store_id, &order.vendor_order_id, status),
        )
        .await
        {
            Ok(()) => SideOutcome::Sent,
            Err(e) => SideOutcome::Failed(e),
        }
    }

    /// 持久化推送标记；冲突时重新加载一次再合并
    async fn persist_marks<F>(&self, order: DeliveryOrder, settle: F) -> DeliveryOrder
    where
        F: Fn(&mut PropagationMarks) -> bool,
    {
        let mut next = order.clone();
        settle(&mut next.propagated);
        match with_store_deadline(self.store_timeout, self.store.compare_and_save(&next)).await {
            Ok(saved) => return saved,
            Err(StorageError::Conflict { .. }) => {}
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Failed to persist propagation marks");
                return next;
            }
        }

        // Someone else wrote in between: merge onto the fresh record
        let fresh = match with_store_deadline(self.store_timeout, self.store.get(&order.id)).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return next,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Failed to reload order for propagation marks");
                return next;
            }
        };
        let mut merged = fresh.clone();
        settle(&mut merged.propagated);
        match with_store_deadline(self.store_timeout, self.store.compare_and_save(&merged)).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Propagation marks not persisted");
                fresh
            }
        }
    }

    /// 补推待补推的状态
    ///
    /// 订单已经越过的状态不再推送，只清除其待补推标记。每个仍然有效的状态推送一次，
    /// 返回各次推送的报告。
    pub async fn repush(&self, order: DeliveryOrder) -> Result<Vec<PropagationReport>, StorageError> {
        let marks = &order.propagated;
        let stale = |pending: Option<OrderStatus>| pending.is_some_and(|s| !still_owed(&order, s));
        let mut order = if stale(marks.pending_pos) || stale(marks.pending_aggregator) {
            let mut cleared = order.clone();
            if stale(cleared.propagated.pending_pos) {
                cleared.propagated.pending_pos = None;
            }
            if stale(cleared.propagated.pending_aggregator) {
                cleared.propagated.pending_aggregator = None;
            }
            tracing::info!(order_id = %order.id, status = %order.status, "Dropped stale pending propagation");
            with_store_deadline(self.store_timeout, self.store.compare_and_save(&cleared)).await?
        } else {
            order
        };

        let mut statuses: Vec<OrderStatus> = Vec::with_capacity(2);
        for status in [order.propagated.pending_pos, order.propagated.pending_aggregator]
            .into_iter()
            .flatten()
        {
            if !statuses.contains(&status) {
                statuses.push(status);
            }
        }

        let mut reports = Vec::with_capacity(statuses.len());
        for status in statuses {
            let targets = Targets {
                pos: order.propagated.pending_pos == Some(status),
                aggregator: order.propagated.pending_aggregator == Some(status),
            };
            let report = self.propagate(order, status, targets).await;
            order = report.order.clone();
            reports.push(report);
        }
        Ok(reports)
    }

    /// POS 关单 (必须成功后才能提交 CLOSED)
    pub async fn close_at_pos(&self, order: &DeliveryOrder) -> Result<(), PropagationError> {
        let pos_order_id = order
            .pos_order_id
            .as_deref()
            .ok_or_else(|| PropagationError::MissingPosOrderId(order.id.clone()))?;
        let pos = self.adapters.pos_for(order)?;
        with_deadline(self.adapter_timeout, pos.close_order(pos_order_id)).await?;
        tracing::info!(order_id = %order.id, pos_order_id = %pos_order_id, "Order closed at POS");
        Ok(())
    }

    /// POS 取消 (必须成功后才能提交 CANCELLED_*)
    pub async fn cancel_at_pos(
        &self,
        order: &DeliveryOrder,
        reason: &str,
    ) -> Result<(), PropagationError> {
        let pos_order_id = order
            .pos_order_id
            .as_deref()
            .ok_or_else(|| PropagationError::MissingPosOrderId(order.id.clone()))?;
        let pos = self.adapters.pos_for(order)?;
        with_deadline(self.adapter_timeout, pos.cancel_order(pos_order_id, reason)).await?;
        tracing::info!(order_id = %order.id, pos_order_id = %pos_order_id, "Order cancelled at POS");
        Ok(())
    }
}

/// 订单仍处于该状态，或该状态在当前状态之后 (如建单后的接单确认)
fn still_owed(order: &DeliveryOrder, status: OrderStatus) -> bool {
    if order.is_in(status) {
        return true;
    }
    !order.is_terminal()
        && matches!(
            (order.status.milestone(), status.milestone()),
            (Some(current), Some(target)) if target > current
        )
}
