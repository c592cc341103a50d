//! 错误解析引擎
//!
//! 把 POS 返回的错误文本归类到错误方案，执行补救 (停售商品/加料)、通知运营，
//! 最后把订单记为 `FAILED` 并写入结构化失败原因。
//!
//! # 停售流程
//!
//! ```text
//! 发生标记已存在? ──是──► AlreadyApplied
//!      │否
//!      ▼
//! 平台 suspend_item ──失败──► 订单记 FAILED (补救未执行) → 返回错误
//!      │成功
//!      ▼
//! 停售条目 + 发生标记 (同一事务)
//! ```
//!
//! 同一次错误发生 (订单 ID + 重试次数 + 错误文本) 最多停售一次。

use sha2::{Digest, Sha256};
use shared::order::{DeliveryOrder, FailReason, FailureClass, OrderStatus, TransitionSource};
use shared::{ItemKind, StopListEntry};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::state_machine::{TransitionError, apply_status};
use super::storage::StorageError;
use super::store::{OrderStore, StopListStore, with_store_deadline};
use crate::adapters::{
    AdapterError, AdapterRegistry, OperatorNotice, OperatorNotifier, with_deadline,
};
use crate::reference::{Classification, SolutionCatalog};
use crate::utils::logger::REMEDIATION_TARGET;

/// Resolution errors
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Failed to suspend {kind} {item_id} for order {order_id}: {reason}")]
    Suspension {
        order_id: String,
        item_id: String,
        kind: ItemKind,
        reason: String,
    },
}

pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// 补救结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    NotRequired,
    Suspended { item_id: String, kind: ItemKind },
    /// 同一次错误发生已经停售过
    AlreadyApplied { item_id: String, kind: ItemKind },
    /// 方案要求停售，但错误文本中提取不到商品
    ItemNotFound,
}

/// 解析结果
#[derive(Debug, Clone)]
pub struct Resolution {
    /// 已保存的订单 (FAILED)
    pub order: DeliveryOrder,
    pub code: String,
    pub matched: bool,
    pub remediation: RemediationOutcome,
    pub notified: bool,
}

/// 错误发生的去重键：sha256(order_id, retry_count, error_text)
pub fn occurrence_key(order: &DeliveryOrder, error_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(order.id.as_bytes());
    hasher.update([0u8]);
    hasher.update(order.retry_count.to_be_bytes());
    hasher.update([0u8]);
    hasher.update(error_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// 错误解析引擎
#[derive(Clone)]
pub struct ErrorResolver {
    store: Arc<dyn OrderStore>,
    stop_list: Arc<dyn StopListStore>,
    adapters: AdapterRegistry,
    notifier: Arc<dyn OperatorNotifier>,
    adapter_timeout: Duration,
    store_timeout: Duration,
}

impl ErrorResolver {
    pub fn new(
        store: Arc<dyn OrderStore>,
        stop_list: Arc<dyn StopListStore>,
        adapters: AdapterRegistry,
        notifier: Arc<dyn OperatorNotifier>,
        adapter_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            stop_list,
            adapters,
            notifier,
            adapter_timeout,
            store_timeout,
        }
    }

    /// 处理一次 POS 业务拒单
    pub async fn resolve(
        &self,
        order: DeliveryOrder,
        error_text: &str,
        catalog: &SolutionCatalog,
        now: i64,
    ) -> ResolutionResult<Resolution> {
        let classification = catalog.classify(error_text);
        let solution = &classification.solution;
        tracing::info!(
            order_id = %order.id,
            code = %solution.code,
            matched = classification.matched,
            "Classified POS error"
        );

        let (remediation, suspension_error) = self
            .remediate(&order, error_text, &classification, now)
            .await;

        let remediation_description = match (&remediation, &suspension_error) {
            (_, Some(e)) => Some(format!("{}; remediation not applied", e)),
            (
                RemediationOutcome::Suspended { item_id, kind }
                | RemediationOutcome::AlreadyApplied { item_id, kind },
                None,
            ) => Some(format!("{} {} added to stop list", kind, item_id)),
            _ => (!solution.business_description.is_empty())
                .then(|| solution.business_description.clone()),
        };

        let fail_reason = FailReason {
            code: solution.code.clone(),
            message: error_text.to_string(),
            classification: if classification.matched {
                FailureClass::Business
            } else {
                FailureClass::Unclassified
            },
            reason: solution.reason.clone(),
            remediation_description,
        };
        let saved = self.commit_failed(order, fail_reason, now).await?;

        if let Some(e) = suspension_error {
            return Err(e);
        }

        let notified = if solution.notify_operator {
            self.notify(&saved, &classification).await
        } else {
            false
        };

        Ok(Resolution {
            order: saved,
            code: solution.code.clone(),
            matched: classification.matched,
            remediation,
            notified,
        })
    }

    /// 提交 FAILED；补救可能已经执行，版本冲突时重新加载再写一次
    ///
    /// 重试计数和认领标记取两次读取中较大的一方。
    async fn commit_failed(
        &self,
        attempted: DeliveryOrder,
        fail_reason: FailReason,
        now: i64,
    ) -> ResolutionResult<DeliveryOrder> {
        let apply = |target: &mut DeliveryOrder| -> ResolutionResult<()> {
            if target.is_terminal() {
                return Err(TransitionError::Terminal {
                    order_id: target.id.clone(),
                    status: target.status,
                }
                .into());
            }
            target.retry_count = target.retry_count.max(attempted.retry_count);
            target.is_retry |= attempted.is_retry;
            target.fail_reason = Some(fail_reason.clone());
            apply_status(target, OrderStatus::Failed, TransitionSource::Resolution, now)?;
            Ok(())
        };

        let mut failed = attempted.clone();
        apply(&mut failed)?;
        match with_store_deadline(self.store_timeout, self.store.compare_and_save(&failed)).await {
            Ok(saved) => Ok(saved),
            Err(StorageError::Conflict { .. }) => {
                tracing::info!(order_id = %attempted.id, "Order changed during resolution, reapplying");
                let mut fresh =
                    with_store_deadline(self.store_timeout, self.store.get(&attempted.id))
                        .await?
                        .ok_or_else(|| StorageError::OrderNotFound(attempted.id.clone()))?;
                apply(&mut fresh)?;
                Ok(
                    with_store_deadline(self.store_timeout, self.store.compare_and_save(&fresh))
                        .await?,
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remediate(
        &self,
        order: &DeliveryOrder,
        error_text: &str,
        classification: &Classification,
        now: i64,
    ) -> (RemediationOutcome, Option<ResolutionError>) {
        let Some(kind) = classification.solution.remediation_kind.item_kind() else {
            return (RemediationOutcome::NotRequired, None);
        };
        let Some(item) = classification.item.as_ref() else {
            tracing::warn!(
                order_id = %order.id,
                code = %classification.solution.code,
                "Stop-list solution matched but no item could be extracted"
            );
            return (RemediationOutcome::ItemNotFound, None);
        };

        let key = occurrence_key(order, error_text);
        let suspension_failed = |reason: String| ResolutionError::Suspension {
            order_id: order.id.clone(),
            item_id: item.id.clone(),
            kind,
            reason,
        };

        match with_store_deadline(self.store_timeout, self.stop_list.is_occurrence_applied(&key))
            .await
        {
            Ok(true) => {
                tracing::info!(order_id = %order.id, item_id = %item.id, "Remediation already applied for this failure");
                return (
                    RemediationOutcome::AlreadyApplied {
                        item_id: item.id.clone(),
                        kind,
                    },
                    None,
                );
            }
            Ok(false) => {}
            Err(e) => {
                return (RemediationOutcome::NotRequired, Some(suspension_failed(e.to_string())));
            }
        }

        match self.adapters.aggregator_for(order) {
            Ok(aggregator) => {
                if let Err(e) = with_deadline(
                    self.adapter_timeout,
                    aggregator.suspend_item(&order.store_id, &item.id, kind),
                )
                .await
                {
                    return (RemediationOutcome::NotRequired, Some(suspension_failed(e.to_string())));
                }
            }
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "No aggregator adapter, recording suspension locally only");
            }
        }

        let entry = StopListEntry {
            store_id: order.store_id.clone(),
            item_id: item.id.clone(),
            item_kind: kind,
            suspended: true,
            item_name: item.name.clone(),
            reason_code: Some(classification.solution.code.clone()),
            updated_at: now,
        };
        match with_store_deadline(
            self.store_timeout,
            self.stop_list.record_suspension(&key, &entry),
        )
        .await
        {
            Ok(true) => {
                tracing::info!(
                    target: REMEDIATION_TARGET,
                    store_id = %order.store_id,
                    order_id = %order.id,
                    item_id = %item.id,
                    item_kind = %kind,
                    code = %classification.solution.code,
                    "Item suspended"
                );
                (
                    RemediationOutcome::Suspended {
                        item_id: item.id.clone(),
                        kind,
                    },
                    None,
                )
            }
            Ok(false) => (
                RemediationOutcome::AlreadyApplied {
                    item_id: item.id.clone(),
                    kind,
                },
                None,
            ),
            Err(e) => (RemediationOutcome::NotRequired, Some(suspension_failed(e.to_string()))),
        }
    }

    async fn notify(&self, order: &DeliveryOrder, classification: &Classification) -> bool {
        let notice = OperatorNotice {
            store_id: order.store_id.clone(),
            order_id: order.id.clone(),
            order_code: order.order_code.clone(),
            code: classification.solution.code.clone(),
            reason: classification.solution.reason.clone(),
            business_description: classification.solution.business_description.clone(),
            item_id: classification.item.as_ref().map(|i| i.id.clone()),
            item_name: classification.item.as_ref().and_then(|i| i.name.clone()),
        };
        match with_deadline(self.adapter_timeout, self.notifier.notify(&notice)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Operator notification failed");
                false
            }
        }
    }

    /// 解除停售 (运营恢复)
    ///
    /// 先通知平台，再更新本地停售列表。返回本地是否存在该条目。
    pub async fn restore_item(
        &self,
        store_id: &str,
        delivery_service: &str,
        item_id: &str,
        kind: ItemKind,
    ) -> ResolutionResult<bool> {
        match self.adapters.aggregator(delivery_service) {
            Ok(aggregator) => {
                with_deadline(
                    self.adapter_timeout,
                    aggregator.restore_item(store_id, item_id, kind),
                )
                .await?;
            }
            Err(e) => {
                tracing::warn!(store_id = %store_id, error = %e, "No aggregator adapter, restoring locally only");
            }
        }

        let restored = with_store_deadline(
            self.store_timeout,
            self.stop_list.restore(store_id, item_id, kind),
        )
        .await?;

        tracing::info!(
            target: REMEDIATION_TARGET,
            store_id = %store_id,
            item_id = %item_id,
            item_kind = %kind,
            restored,
            "Item restored"
        );
        Ok(restored)
    }
}
