//! 定时状态扫描
//!
//! 三个独立的批次，仅由时间流逝驱动：
//!
//! - **repropagate**: 补推之前推送失败的状态 (`propagated.pending_*`)
//! - **auto-ready**: 参与定时切换的平台订单，在 {ACCEPTED, COOKING_STARTED, WAIT_SENDING}
//!   停留超过切换间隔 → READY_FOR_PICKUP，并推送到 POS 和平台。按状态索引选取，不限时间
//! - **auto-close**: 预计取餐时间 + 自动关单时间已过 → 先在 POS 关单，成功后才记 CLOSED。
//!   只看回看窗口内的订单
//!
//! 动作前重新加载并检查状态，可重复执行。
//! 取消令牌触发后不再调度新订单，剩余订单留给下一次运行。

use futures::StreamExt;
use shared::order::{DeliveryOrder, OrderStatus, TransitionSource};
use shared::StoreRetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::propagator::{PropagationError, Propagator, Targets};
use super::state_machine::{TransitionError, apply_status};
use super::storage::StorageError;
use super::store::{OrderStore, with_store_deadline};
use super::summary::{BatchPass, BatchSummary};
use crate::reference::ReferenceSnapshot;

/// 可被 auto-ready 推进的状态
pub const AUTO_READY_STATUSES: [OrderStatus; 3] = [
    OrderStatus::Accepted,
    OrderStatus::CookingStarted,
    OrderStatus::WaitSending,
];

/// Sweep errors (per order)
#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),

    #[error("Push still failing: {0}")]
    PushFailed(String),
}

enum ItemResult {
    Done,
    /// 内部状态已提交，推送失败 (已记为待补推)
    DonePushPending(String),
    Skipped(&'static str),
    Deferred,
    Failed(SweepError),
}

/// 定时扫描
#[derive(Clone)]
pub struct TransitionSweep {
    store: Arc<dyn OrderStore>,
    propagator: Propagator,
    store_timeout: Duration,
    concurrency: usize,
    lookback_millis: i64,
}

impl TransitionSweep {
    pub fn new(
        store: Arc<dyn OrderStore>,
        propagator: Propagator,
        store_timeout: Duration,
        concurrency: usize,
        lookback_millis: i64,
    ) -> Self {
        Self {
            store,
            propagator,
            store_timeout,
            concurrency: concurrency.max(1),
            lookback_millis,
        }
    }

    // ========== Auto-ready ==========

    pub async fn auto_ready(
        &self,
        snapshot: &ReferenceSnapshot,
        now: i64,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary::new(BatchPass::AutoReady);
        let mut candidates = Vec::new();

        for policy in snapshot.policies() {
            let Some(interval) = policy.switch_interval_millis() else {
                continue;
            };
            if policy.scheduled_status_delivery_services.is_empty() {
                continue;
            }
            let listed = with_store_deadline(
                self.store_timeout,
                self.store
                    .list_store_orders_in_status(&policy.store_id, &AUTO_READY_STATUSES),
            )
            .await;
            match listed {
                Ok(orders) => candidates.extend(orders.into_iter().filter(|o| {
                    policy.is_enrolled(&o.delivery_service) && is_ready_due(o, interval, now)
                })),
                Err(e) => summary.record_failure(format!("store:{}", policy.store_id), e),
            }
        }

        let results = self
            .run(candidates, cancel, |order| async move {
                self.ready_one(&order.id, now).await
            })
            .await;
        tally(&mut summary, results);
        summary.log();
        summary
    }

    async fn ready_one(&self, order_id: &str, now: i64) -> ItemResult {
        // Re-check against the latest record; another invocation may have acted
        let order = match with_store_deadline(self.store_timeout, self.store.get(order_id)).await {
            Ok(Some(order)) => order,
            Ok(None) => return ItemResult::Skipped("order disappeared"),
            Err(e) => return ItemResult::Failed(e.into()),
        };
        if !AUTO_READY_STATUSES.contains(&order.status) {
            return ItemResult::Skipped("status changed");
        }

        let mut ready = order;
        if let Err(e) = apply_status(
            &mut ready,
            OrderStatus::ReadyForPickup,
            TransitionSource::Sweep,
            now,
        ) {
            return ItemResult::Failed(e.into());
        }
        let saved = match with_store_deadline(self.store_timeout, self.store.compare_and_save(&ready))
            .await
        {
            Ok(saved) => saved,
            Err(e) => return ItemResult::Failed(e.into()),
        };

        tracing::info!(order_id = %saved.id, store_id = %saved.store_id, "Order auto-switched to READY_FOR_PICKUP");
        // Internal status stays committed; failed sides are left pending for the repropagate pass
        let report = self
            .propagator
            .propagate(saved, OrderStatus::ReadyForPickup, Targets::BOTH)
            .await;
        if report.has_failures() {
            ItemResult::DonePushPending(report.failure_summary())
        } else {
            ItemResult::Done
        }
    }

    // ========== Repropagate ==========

    /// 补推之前推送失败的状态
    pub async fn repropagate(
        &self,
        snapshot: &ReferenceSnapshot,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary::new(BatchPass::Repropagate);
        let mut candidates = Vec::new();

        for policy in snapshot.policies() {
            match with_store_deadline(
                self.store_timeout,
                self.store.list_pending_push(&policy.store_id),
            )
            .await
            {
                Ok(orders) => candidates.extend(orders),
                Err(e) => summary.record_failure(format!("store:{}", policy.store_id), e),
            }
        }

        let results = self
            .run(candidates, cancel, |order| async move {
                self.repush_one(&order.id).await
            })
            .await;
        tally(&mut summary, results);
        summary.log();
        summary
    }

    async fn repush_one(&self, order_id: &str) -> ItemResult {
        let order = match with_store_deadline(self.store_timeout, self.store.get(order_id)).await {
            Ok(Some(order)) => order,
            Ok(None) => return ItemResult::Skipped("order disappeared"),
            Err(e) => return ItemResult::Failed(e.into()),
        };
        if !order.propagated.has_pending() {
            return ItemResult::Skipped("already pushed");
        }

        match self.propagator.repush(order).await {
            Ok(reports) => {
                let failures: Vec<String> = reports
                    .iter()
                    .filter(|r| r.has_failures())
                    .map(|r| r.failure_summary())
                    .collect();
                if failures.is_empty() {
                    tracing::info!(order_id = %order_id, "Pending status pushed");
                    ItemResult::Done
                } else {
                    ItemResult::Failed(SweepError::PushFailed(failures.join("; ")))
                }
            }
            Err(e) => ItemResult::Failed(e.into()),
        }
    }

    // ========== Auto-close ==========

    pub async fn auto_close(
        &self,
        snapshot: &ReferenceSnapshot,
        now: i64,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary::new(BatchPass::AutoClose);
        let mut candidates = Vec::new();

        for policy in snapshot.policies() {
            let Some(delay) = policy.auto_close_after_millis() else {
                continue;
            };
            match self.window(policy, now).await {
                Ok(orders) => candidates.extend(
                    orders
                        .into_iter()
                        .filter(|o| is_close_candidate(o) && !is_close_pending(o, delay, now)),
                ),
                Err(e) => summary.record_failure(format!("store:{}", policy.store_id), e),
            }
        }

        let delays: std::collections::HashMap<String, i64> = snapshot
            .policies()
            .filter_map(|p| Some((p.store_id.clone(), p.auto_close_after_millis()?)))
            .collect();

        let results = self
            .run(candidates, cancel, |order| {
                let delay = delays.get(&order.store_id).copied().unwrap_or(i64::MAX);
                async move { self.close_one(&order.id, delay, now).await }
            })
            .await;
        tally(&mut summary, results);
        summary.log();
        summary
    }

    async fn close_one(&self, order_id: &str, delay: i64, now: i64) -> ItemResult {
        let order = match with_store_deadline(self.store_timeout, self.store.get(order_id)).await {
            Ok(Some(order)) => order,
            Ok(None) => return ItemResult::Skipped("order disappeared"),
            Err(e) => return ItemResult::Failed(e.into()),
        };
        if !is_close_candidate(&order) {
            return ItemResult::Skipped("status changed");
        }
        let Some(pickup) = order.estimated_pickup_time else {
            return ItemResult::Skipped("no estimated pickup time");
        };
        if pickup.saturating_add(delay) > now {
            return ItemResult::Skipped("not due");
        }
        if order.pos_order_id.is_none() {
            return ItemResult::Skipped("no POS order id");
        }

        // POS first: the internal terminal status is committed only after the POS accepted the close
        if let Err(e) = self.propagator.close_at_pos(&order).await {
            tracing::warn!(order_id = %order.id, error = %e, "POS close failed, order left open");
            return ItemResult::Failed(e.into());
        }

        match self.commit_closed(order, now).await {
            Ok(saved) => {
                tracing::info!(order_id = %saved.id, store_id = %saved.store_id, "Order auto-closed");
                ItemResult::Done
            }
            Err(e) => ItemResult::Failed(e),
        }
    }

    /// 提交 CLOSED；POS 已经关单，版本冲突时重新加载再写一次
    async fn commit_closed(&self, order: DeliveryOrder, now: i64) -> Result<DeliveryOrder, SweepError> {
        let close = |target: &mut DeliveryOrder| -> Result<(), SweepError> {
            apply_status(target, OrderStatus::Closed, TransitionSource::Sweep, now)?;
            target.propagated.pos = Some(OrderStatus::Closed);
            Ok(())
        };

        let mut closed = order.clone();
        close(&mut closed)?;
        match with_store_deadline(self.store_timeout, self.store.compare_and_save(&closed)).await {
            Ok(saved) => Ok(saved),
            Err(StorageError::Conflict { .. }) => {
                let mut fresh = with_store_deadline(self.store_timeout, self.store.get(&order.id))
                    .await?
                    .ok_or_else(|| StorageError::OrderNotFound(order.id.clone()))?;
                close(&mut fresh)?;
                Ok(with_store_deadline(self.store_timeout, self.store.compare_and_save(&fresh))
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========== Helpers ==========

    /// 门店在回看窗口内的订单 (auto-close)
    async fn window(
        &self,
        policy: &StoreRetryPolicy,
        now: i64,
    ) -> Result<Vec<DeliveryOrder>, StorageError> {
        let since = now.saturating_sub(self.lookback_millis);
        with_store_deadline(
            self.store_timeout,
            self.store.list_store_orders(&policy.store_id, since),
        )
        .await
    }

    /// 有界并发处理；取消后剩余订单记为 deferred
    async fn run<F, Fut>(
        &self,
        candidates: Vec<DeliveryOrder>,
        cancel: &CancellationToken,
        work: F,
    ) -> Vec<(String, ItemResult)>
    where
        F: Fn(DeliveryOrder) -> Fut,
        Fut: std::future::Future<Output = ItemResult>,
    {
        futures::stream::iter(candidates)
            .map(|order| {
                let order_id = order.id.clone();
                let cancelled = cancel.is_cancelled();
                let task = (!cancelled).then(|| work(order));
                async move {
                    let result = match task {
                        Some(task) => task.await,
                        None => ItemResult::Deferred,
                    };
                    (order_id, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

fn tally(summary: &mut BatchSummary, results: Vec<(String, ItemResult)>) {
    let mut deferred = 0;
    for (order_id, result) in results {
        match result {
            ItemResult::Done => summary.record_success(),
            ItemResult::DonePushPending(error) => {
                summary.record_success();
                summary.record_propagation_failure(order_id, error);
            }
            ItemResult::Skipped(why) => {
                tracing::debug!(order_id = %order_id, reason = why, "Sweep skipped order");
                summary.record_skip();
            }
            ItemResult::Deferred => deferred += 1,
            ItemResult::Failed(e) => summary.record_failure(order_id, e),
        }
    }
    summary.record_deferred(deferred);
}

fn is_ready_due(order: &DeliveryOrder, interval: i64, now: i64) -> bool {
    AUTO_READY_STATUSES.contains(&order.status) && order.order_time.saturating_add(interval) <= now
}

/// Orders auto-close may act on
fn is_close_candidate(order: &DeliveryOrder) -> bool {
    !order.is_terminal() && order.status != OrderStatus::Failed
}

/// 有预计取餐时间但关单时间未到
fn is_close_pending(order: &DeliveryOrder, delay: i64, now: i64) -> bool {
    order
        .estimated_pickup_time
        .is_some_and(|pickup| pickup.saturating_add(delay) > now)
}
