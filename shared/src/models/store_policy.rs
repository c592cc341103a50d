//! Store Retry Policy Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::util::MILLIS_PER_MINUTE;

/// 门店级重试 / 定时切换策略
///
/// 参考数据，只读；每次对账调用重新加载。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreRetryPolicy {
    pub store_id: String,
    /// POS 创建订单的最大重试次数
    pub max_retry_count: u32,
    /// 预计取餐时间之后多少分钟自动关单 (None / 0 = 关闭)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_close_time: Option<u32>,
    /// 接单后多少分钟强制切换到 READY_FOR_PICKUP (0 = 关闭)
    #[serde(default)]
    pub scheduled_status_switch_interval: u32,
    /// 参与定时切换的外卖平台
    #[serde(default)]
    pub scheduled_status_delivery_services: BTreeSet<String>,
}

impl StoreRetryPolicy {
    pub fn new(store_id: impl Into<String>, max_retry_count: u32) -> Self {
        Self {
            store_id: store_id.into(),
            max_retry_count,
            auto_close_time: None,
            scheduled_status_switch_interval: 0,
            scheduled_status_delivery_services: BTreeSet::new(),
        }
    }

    pub fn auto_close_enabled(&self) -> bool {
        self.auto_close_time.is_some_and(|minutes| minutes > 0)
    }

    /// Auto-close delay in millis, `None` when disabled
    pub fn auto_close_after_millis(&self) -> Option<i64> {
        self.auto_close_time
            .filter(|minutes| *minutes > 0)
            .map(|minutes| i64::from(minutes) * MILLIS_PER_MINUTE)
    }

    /// Force-ready delay in millis, `None` when disabled
    pub fn switch_interval_millis(&self) -> Option<i64> {
        (self.scheduled_status_switch_interval > 0)
            .then(|| i64::from(self.scheduled_status_switch_interval) * MILLIS_PER_MINUTE)
    }

    /// 该外卖平台是否参与定时切换
    pub fn is_enrolled(&self, delivery_service: &str) -> bool {
        self.scheduled_status_delivery_services
            .contains(delivery_service)
    }
}
