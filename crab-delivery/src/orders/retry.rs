//! 重试协调器
//!
//! 消费重试请求，重新在 POS 建单，执行门店级重试上限。
//!
//! # 流程
//!
//! 1. 加载订单；终态订单直接跳过 (重复投递幂等)
//! 2. `retry_count >= max_retry_count` → FAILED (Error)，不调用 POS
//! 3. 校验建单后能否回到 NEW，并解析 POS 适配器；两者失败都不调用 POS
//! 4. 条件写 `is_retry = true` 认领订单，竞争失败者得到 `Conflict`，不调用 POS
//! 5. POS 建单：
//!    - 成功：`retry_count + 1`，记录 POS 订单号，状态回到 NEW，按需向平台确认接单
//!    - 业务拒单：`retry_count + 1`，交给错误解析引擎
//!    - RetryMe：立即重新入队，不推进计数
//!    - 超时/网络：`RetryError::Transient`，由队列重投，不推进计数
//!
//! `retry_count` 只在一次确认到达 POS 的建单尝试之后 +1，基础设施故障不消耗重试预算。

use futures::StreamExt;
use shared::order::{
    DeliveryOrder, FailReason, FailureClass, OrderStatus, TransitionSource,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::propagator::{Propagator, Targets};
use super::resolution::{ErrorResolver, RemediationOutcome, ResolutionError};
use super::state_machine::{TransitionError, apply_status, check_transition};
use super::storage::StorageError;
use super::store::{OrderRef, OrderStore, with_store_deadline};
use super::summary::{BatchPass, BatchSummary};
use crate::adapters::{AdapterError, with_deadline};
use crate::reference::{ReferenceError, ReferenceSnapshot};

/// 重试上限耗尽时使用的编码 (没有前一次失败原因时)
pub const RETRY_LIMIT_CODE: &str = "RETRY_LIMIT";

// ============================================================================
// Request
// ============================================================================

/// 重试请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    /// 原始消息
    pub raw: String,
    pub reference: OrderRef,
}

impl RetryRequest {
    /// 解析队列消息
    ///
    /// `<source>_<internalId>` 仅当 `source` 属于配置的内部 ID 来源时按内部 ID 寻址，
    /// 其余情况整串作为平台订单号。
    pub fn parse(raw: &str, internal_id_sources: &HashSet<String>) -> Self {
        let raw = raw.trim();
        let reference = match raw.split_once('_') {
            Some((source, id)) if !id.is_empty() && internal_id_sources.contains(source) => {
                OrderRef::Internal(id.to_string())
            }
            _ => OrderRef::Vendor(raw.to_string()),
        };
        Self {
            raw: raw.to_string(),
            reference,
        }
    }
}

// ============================================================================
// Outcome / Error
// ============================================================================

/// 重试结果 (队列监听器据此 ack / nack)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Created {
        order_id: String,
        pos_order_id: String,
        retry_count: u32,
        /// 接单确认推送失败，已记为待补推
        ack_pending: bool,
    },
    /// 重试上限耗尽，订单进入终态 FAILED
    CeilingReached { order_id: String, retry_count: u32 },
    /// POS 业务拒单，已交给错误解析引擎
    VendorRejected {
        order_id: String,
        code: String,
        remediation: RemediationOutcome,
    },
    /// 适配器要求立即重新入队
    Requeue { order_id: String },
    /// 订单不需要重试 (终态或已在 POS 创建)
    Skipped { order_id: String, status: OrderStatus },
}

/// Retry errors
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// 订单的 POS 类型没有注册适配器
    #[error("No POS adapter for order {order_id}: {source}")]
    AdapterUnavailable {
        order_id: String,
        #[source]
        source: AdapterError,
    },

    #[error("Transient failure for order {order_id}: {source}")]
    Transient {
        order_id: String,
        #[source]
        source: AdapterError,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl RetryError {
    /// 是否应由队列重投
    ///
    /// 版本冲突说明另一个调用已经在处理该订单，不重投。
    pub fn should_redeliver(&self) -> bool {
        match self {
            RetryError::Transient { .. } => true,
            RetryError::Storage(e) => !e.is_conflict(),
            RetryError::Resolution(ResolutionError::Storage(e)) => !e.is_conflict(),
            RetryError::Resolution(ResolutionError::Suspension { .. }) => true,
            _ => false,
        }
    }
}

pub type RetryResult<T> = Result<T, RetryError>;

/// 批处理结果
#[derive(Debug)]
pub struct RetryBatch {
    pub summary: BatchSummary,
    pub results: Vec<(RetryRequest, RetryResult<RetryOutcome>)>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// 重试协调器
#[derive(Clone)]
pub struct RetryCoordinator {
    store: Arc<dyn OrderStore>,
    resolver: ErrorResolver,
    propagator: Propagator,
    adapter_timeout: Duration,
    store_timeout: Duration,
    concurrency: usize,
}

impl RetryCoordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        resolver: ErrorResolver,
        propagator: Propagator,
        adapter_timeout: Duration,
        store_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            propagator,
            adapter_timeout,
            store_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// 处理单个重试请求
    pub async fn handle(
        &self,
        request: &RetryRequest,
        snapshot: &ReferenceSnapshot,
        now: i64,
    ) -> RetryResult<RetryOutcome> {
        let order = with_store_deadline(self.store_timeout, self.store.resolve(&request.reference))
            .await?
            .ok_or_else(|| RetryError::OrderNotFound(request.reference.to_string()))?;

        if order.is_terminal() || !needs_creation(&order) {
            tracing::debug!(order_id = %order.id, status = %order.status, "Retry skipped");
            return Ok(RetryOutcome::Skipped {
                order_id: order.id,
                status: order.status,
            });
        }

        let max_retry_count = snapshot.policy(&order.store_id)?.max_retry_count;
        if order.retry_count >= max_retry_count {
            return self.fail_at_ceiling(order, max_retry_count, now).await;
        }

        // A created order must be recordable before the POS is asked to create it
        check_transition(&order, OrderStatus::New, TransitionSource::Retry)?;
        let pos = self
            .propagator
            .adapters()
            .pos_for(&order)
            .map_err(|source| RetryError::AdapterUnavailable {
                order_id: order.id.clone(),
                source,
            })?;

        // Claim: a concurrent invocation that read the same version loses here
        let mut claim = order;
        claim.is_retry = true;
        let claimed =
            with_store_deadline(self.store_timeout, self.store.compare_and_save(&claim)).await?;

        tracing::info!(
            order_id = %claimed.id,
            retry_count = claimed.retry_count,
            max_retry_count,
            "Resubmitting order to POS"
        );
        match with_deadline(self.adapter_timeout, pos.create_order(&claimed)).await {
            Ok(pos_order_id) => self.record_creation(claimed, pos_order_id, now).await,
            Err(AdapterError::Business(error_text)) => {
                let mut attempted = claimed;
                attempted.retry_count += 1;
                let resolution = self
                    .resolver
                    .resolve(attempted, &error_text, snapshot.catalog(), now)
                    .await?;
                Ok(RetryOutcome::VendorRejected {
                    order_id: resolution.order.id,
                    code: resolution.code,
                    remediation: resolution.remediation,
                })
            }
            Err(AdapterError::RetryMe(reason)) => {
                tracing::info!(order_id = %claimed.id, reason = %reason, "POS asked for immediate retry");
                Ok(RetryOutcome::Requeue {
                    order_id: claimed.id,
                })
            }
            Err(source) => Err(RetryError::Transient {
                order_id: claimed.id,
                source,
            }),
        }
    }

    async fn fail_at_ceiling(
        &self,
        mut order: DeliveryOrder,
        max_retry_count: u32,
        now: i64,
    ) -> RetryResult<RetryOutcome> {
        let note = format!(
            "retry limit reached ({}/{})",
            order.retry_count, max_retry_count
        );
        let (code, message, reason, remediation_description) = match order.fail_reason.take() {
            Some(prior) => (
                prior.code,
                format!("{}; {}", prior.message, note),
                prior.reason,
                prior.remediation_description,
            ),
            None => (RETRY_LIMIT_CODE.to_string(), note, String::new(), None),
        };
        order.fail_reason = Some(FailReason {
            code,
            message,
            classification: FailureClass::Error,
            reason,
            remediation_description,
        });
        apply_status(&mut order, OrderStatus::Failed, TransitionSource::Retry, now)?;

        let saved =
            with_store_deadline(self.store_timeout, self.store.compare_and_save(&order)).await?;
        tracing::warn!(
            order_id = %saved.id,
            store_id = %saved.store_id,
            retry_count = saved.retry_count,
            "Retry ceiling reached, order failed permanently"
        );
        Ok(RetryOutcome::CeilingReached {
            order_id: saved.id,
            retry_count: saved.retry_count,
        })
    }

    /// 记录建单成功；POS 订单已经存在，版本冲突时重新加载再写一次
    async fn record_creation(
        &self,
        claimed: DeliveryOrder,
        pos_order_id: String,
        now: i64,
    ) -> RetryResult<RetryOutcome> {
        let apply = |order: &mut DeliveryOrder| -> RetryResult<()> {
            apply_status(order, OrderStatus::New, TransitionSource::Retry, now)?;
            order.retry_count += 1;
            order.pos_order_id = Some(pos_order_id.clone());
            order.fail_reason = None;
            Ok(())
        };

        let mut created = claimed.clone();
        apply(&mut created)?;
        let saved = match with_store_deadline(
            self.store_timeout,
            self.store.compare_and_save(&created),
        )
        .await
        {
            Ok(saved) => saved,
            Err(StorageError::Conflict { .. }) => {
                let mut fresh = with_store_deadline(self.store_timeout, self.store.get(&claimed.id))
                    .await?
                    .ok_or_else(|| RetryError::OrderNotFound(claimed.id.clone()))?;
                apply(&mut fresh)?;
                with_store_deadline(self.store_timeout, self.store.compare_and_save(&fresh))
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            order_id = %saved.id,
            pos_order_id = %pos_order_id,
            retry_count = saved.retry_count,
            "Order created at POS on retry"
        );

        let (saved, ack_pending) = if self.propagator.adapters().requires_accept_ack(&saved) {
            let targets = Targets {
                pos: false,
                aggregator: true,
            };
            let report = self
                .propagator
                .propagate(saved, OrderStatus::Accepted, targets)
                .await;
            let failed = report.has_failures();
            (report.order, failed)
        } else {
            (saved, false)
        };

        Ok(RetryOutcome::Created {
            order_id: saved.id,
            pos_order_id,
            retry_count: saved.retry_count,
            ack_pending,
        })
    }

    /// 批量处理重试请求 (有界并发)
    pub async fn drain(
        &self,
        requests: Vec<RetryRequest>,
        snapshot: &ReferenceSnapshot,
        now: i64,
    ) -> RetryBatch {
        let results: Vec<(RetryRequest, RetryResult<RetryOutcome>)> =
            futures::stream::iter(requests)
                .map(|request| async move {
                    let result = self.handle(&request, snapshot, now).await;
                    (request, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut summary = BatchSummary::new(BatchPass::RetryDrain);
        for (request, result) in &results {
            match result {
                Ok(RetryOutcome::Created { ack_pending, .. }) => {
                    summary.record_success();
                    if *ack_pending {
                        summary.record_propagation_failure(&request.raw, "accept ack not delivered");
                    }
                }
                Ok(RetryOutcome::CeilingReached { .. } | RetryOutcome::Skipped { .. }) => {
                    summary.record_skip()
                }
                Ok(RetryOutcome::VendorRejected { code, .. }) => {
                    summary.record_failure(&request.raw, format!("vendor rejected ({})", code))
                }
                Ok(RetryOutcome::Requeue { .. }) => summary.record_deferred(1),
                Err(e) => summary.record_failure(&request.raw, e),
            }
        }
        summary.log();

        RetryBatch { summary, results }
    }
}

/// POS 上还没有这张订单
fn needs_creation(order: &DeliveryOrder) -> bool {
    match order.status {
        OrderStatus::Failed => true,
        OrderStatus::New | OrderStatus::WaitSending => order.pos_order_id.is_none(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_vendor_reference() {
        let request = RetryRequest::parse("glovo-100045", &sources(&["admin"]));
        assert_eq!(request.reference, OrderRef::Vendor("glovo-100045".into()));
    }

    #[test]
    fn test_parse_internal_reference() {
        let request = RetryRequest::parse("admin_6f1c2d", &sources(&["admin"]));
        assert_eq!(request.reference, OrderRef::Internal("6f1c2d".into()));
    }

    #[test]
    fn test_unknown_prefix_is_vendor_reference() {
        let request = RetryRequest::parse("uber_eats_991", &sources(&["admin"]));
        assert_eq!(request.reference, OrderRef::Vendor("uber_eats_991".into()));

        let request = RetryRequest::parse("admin_", &sources(&["admin"]));
        assert_eq!(request.reference, OrderRef::Vendor("admin_".into()));
    }

    #[test]
    fn test_needs_creation() {
        let mut order = DeliveryOrder::new("s1", "v1", "A1", "iiko", "glovo", 0);
        assert!(needs_creation(&order));

        order.pos_order_id = Some("pos-1".into());
        assert!(!needs_creation(&order));

        order.status = OrderStatus::Failed;
        assert!(needs_creation(&order));

        order.status = OrderStatus::Accepted;
        assert!(!needs_creation(&order));
    }

    #[test]
    fn test_redelivery_policy() {
        let transient = RetryError::Transient {
            order_id: "o1".into(),
            source: AdapterError::Timeout(Duration::from_secs(1)),
        };
        assert!(transient.should_redeliver());

        let conflict = RetryError::Storage(StorageError::Conflict {
            order_id: "o1".into(),
            expected: 1,
            actual: 2,
        });
        assert!(!conflict.should_redeliver());
        assert!(!RetryError::OrderNotFound("o1".into()).should_redeliver());

        let unavailable = RetryError::AdapterUnavailable {
            order_id: "o1".into(),
            source: AdapterError::Unavailable("pos:r_keeper".into()),
        };
        assert!(!unavailable.should_redeliver());
    }
}
