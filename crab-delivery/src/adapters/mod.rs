//! 外部系统适配器接口
//!
//! POS / 外卖平台的具体 HTTP 适配器在本 crate 之外实现，这里只定义对账核心消费的契约：
//!
//! - [`PosAdapter`] - POS 建单、状态推送、关单、取消
//! - [`AggregatorAdapter`] - 外卖平台状态推送、停售/恢复
//! - [`OperatorNotifier`] - 运营告警通道
//!
//! 适配器在系统边界按 POS 类型 / 平台名称解析一次，以 [`AdapterRegistry`] 注入核心。

pub mod notifier;

use async_trait::async_trait;
use shared::order::{DeliveryOrder, OrderStatus};
use shared::ItemKind;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use notifier::{LogNotifier, OperatorNotice};

/// Adapter call errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// 网络/基础设施故障，由队列重投，不消耗业务重试次数
    #[error("Transient failure: {0}")]
    Transient(String),

    /// 供应商业务拒绝 (如商品不可售)，错误文本交给错误解析引擎
    #[error("Vendor rejected request: {0}")]
    Business(String),

    /// 要求调用方立即重新入队，不推进任何计数
    #[error("Retry requested: {0}")]
    RetryMe(String),

    #[error("Deadline exceeded after {0:?}")]
    Timeout(Duration),

    /// 没有注册对应的适配器 (配置错误，重投无效)
    #[error("No adapter registered for {0}")]
    Unavailable(String),
}

impl AdapterError {
    /// 基础设施类错误 (可重投，不计入重试预算)
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_) | AdapterError::Timeout(_))
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// POS 适配器契约
#[async_trait]
pub trait PosAdapter: Send + Sync {
    /// 在 POS 创建订单，返回 POS 订单号
    async fn create_order(&self, order: &DeliveryOrder) -> AdapterResult<String>;

    async fn update_status(
        &self,
        pos_order_id: &str,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> AdapterResult<()>;

    async fn close_order(&self, pos_order_id: &str) -> AdapterResult<()>;

    async fn cancel_order(&self, pos_order_id: &str, reason: &str) -> AdapterResult<()>;
}

/// 外卖平台适配器契约
#[async_trait]
pub trait AggregatorAdapter: Send + Sync {
    async fn update_order_status(
        &self,
        store_id: &str,
        vendor_order_id: &str,
        status: OrderStatus,
    ) -> AdapterResult<()>;

    async fn suspend_item(&self, store_id: &str, item_id: &str, kind: ItemKind)
    -> AdapterResult<()>;

    async fn restore_item(&self, store_id: &str, item_id: &str, kind: ItemKind)
    -> AdapterResult<()>;

    /// 平台是否要求显式接单确认 (POS 建单成功后推送 ACCEPTED)
    fn requires_accept_ack(&self) -> bool {
        false
    }
}

/// 运营告警通道
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, notice: &OperatorNotice) -> AdapterResult<()>;
}

/// 带截止时间的适配器调用
///
/// 超时映射为 [`AdapterError::Timeout`]，调用方按瞬时错误处理。
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> AdapterResult<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(deadline)),
    }
}

// ============================================================================
// Adapter Registry
// ============================================================================

/// 适配器注册表
///
/// 键为订单上的 `pos_type` / `delivery_service`，核心代码不按供应商分支。
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    pos: HashMap<String, Arc<dyn PosAdapter>>,
    aggregators: HashMap<String, Arc<dyn AggregatorAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pos(mut self, pos_type: impl Into<String>, adapter: Arc<dyn PosAdapter>) -> Self {
        self.pos.insert(pos_type.into(), adapter);
        self
    }

    pub fn with_aggregator(
        mut self,
        delivery_service: impl Into<String>,
        adapter: Arc<dyn AggregatorAdapter>,
    ) -> Self {
        self.aggregators.insert(delivery_service.into(), adapter);
        self
    }

    /// POS adapter for an order
    pub fn pos_for(&self, order: &DeliveryOrder) -> AdapterResult<Arc<dyn PosAdapter>> {
        self.pos
            .get(&order.pos_type)
            .cloned()
            .ok_or_else(|| AdapterError::Unavailable(format!("pos:{}", order.pos_type)))
    }

    /// Aggregator adapter by delivery service name
    pub fn aggregator(&self, delivery_service: &str) -> AdapterResult<Arc<dyn AggregatorAdapter>> {
        self.aggregators
            .get(delivery_service)
            .cloned()
            .ok_or_else(|| AdapterError::Unavailable(format!("aggregator:{}", delivery_service)))
    }

    /// Aggregator adapter for an order
    pub fn aggregator_for(
        &self,
        order: &DeliveryOrder,
    ) -> AdapterResult<Arc<dyn AggregatorAdapter>> {
        self.aggregator(&order.delivery_service)
    }

    /// 该订单所属平台是否要求接单确认
    pub fn requires_accept_ack(&self, order: &DeliveryOrder) -> bool {
        self.aggregators
            .get(&order.delivery_service)
            .is_some_and(|adapter| adapter.requires_accept_ack())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let deadline = Duration::from_millis(10);
        let result: AdapterResult<()> = with_deadline(deadline, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(AdapterError::Timeout(deadline)));
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_deadline_passes_through_result() {
        let result = with_deadline(Duration::from_secs(1), async {
            Err::<(), _>(AdapterError::Business("item 42 unavailable".into()))
        })
        .await;
        assert_eq!(result, Err(AdapterError::Business("item 42 unavailable".into())));
    }

    #[test]
    fn test_missing_adapter_is_unavailable() {
        let registry = AdapterRegistry::new();
        let order = DeliveryOrder::new("s1", "v1", "A1", "iiko", "glovo", 0);
        let err = registry.pos_for(&order).err().unwrap();
        assert_eq!(err, AdapterError::Unavailable("pos:iiko".into()));
        assert!(!err.is_transient());
        assert!(!registry.requires_accept_ack(&order));
    }
}
