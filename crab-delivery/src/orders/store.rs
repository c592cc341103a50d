//! Order Store 契约
//!
//! 核心只依赖这里的 trait；[`super::storage::OrderStorage`] 是基于 redb 的实现。
//! 所有写入都是条件写：只有当调用方读到的 `version` 仍然是当前版本时才成功。

use async_trait::async_trait;
use shared::order::{DeliveryOrder, OrderStatus};
use shared::{ItemKind, StopListEntry};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use super::storage::{StorageError, StorageResult};

/// 订单引用：外卖平台订单号或内部 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderRef {
    Vendor(String),
    Internal(String),
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRef::Vendor(id) => write!(f, "vendor:{}", id),
            OrderRef::Internal(id) => write!(f, "internal:{}", id),
        }
    }
}

/// 订单存储
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: &str) -> StorageResult<Option<DeliveryOrder>>;

    async fn find_by_vendor_id(&self, vendor_order_id: &str)
    -> StorageResult<Option<DeliveryOrder>>;

    /// 新建订单记录；ID 已存在时返回 [`StorageError::DuplicateOrder`]
    async fn insert(&self, order: &DeliveryOrder) -> StorageResult<DeliveryOrder>;

    /// 条件写入
    ///
    /// `order.version` 必须等于存储中的当前版本，否则返回 [`StorageError::Conflict`]。
    /// 成功时返回已保存的记录 (version + 1)。
    async fn compare_and_save(&self, order: &DeliveryOrder) -> StorageResult<DeliveryOrder>;

    /// 门店下 `order_time >= since` 的全部订单
    async fn list_store_orders(&self, store_id: &str, since: i64)
    -> StorageResult<Vec<DeliveryOrder>>;

    /// 门店下当前处于给定状态之一的订单 (不限时间)
    async fn list_store_orders_in_status(
        &self,
        store_id: &str,
        statuses: &[OrderStatus],
    ) -> StorageResult<Vec<DeliveryOrder>>;

    /// 门店下有待补推状态的订单
    async fn list_pending_push(&self, store_id: &str) -> StorageResult<Vec<DeliveryOrder>>;

    /// 按引用加载订单
    async fn resolve(&self, reference: &OrderRef) -> StorageResult<Option<DeliveryOrder>> {
        match reference {
            OrderRef::Vendor(id) => self.find_by_vendor_id(id).await,
            OrderRef::Internal(id) => self.get(id).await,
        }
    }
}

/// 停售列表存储
#[async_trait]
pub trait StopListStore: Send + Sync {
    /// 该错误发生是否已经执行过补救
    async fn is_occurrence_applied(&self, occurrence_key: &str) -> StorageResult<bool>;

    /// 原子地写入停售条目和发生标记
    ///
    /// 发生标记已存在时不做任何写入并返回 `false`。
    async fn record_suspension(
        &self,
        occurrence_key: &str,
        entry: &StopListEntry,
    ) -> StorageResult<bool>;

    /// 解除停售；条目不存在时返回 `false`
    async fn restore(&self, store_id: &str, item_id: &str, kind: ItemKind) -> StorageResult<bool>;

    async fn stop_list(&self, store_id: &str) -> StorageResult<Vec<StopListEntry>>;
}

/// 带截止时间的存储调用
pub async fn with_store_deadline<T, F>(deadline: Duration, call: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(deadline)),
    }
}
