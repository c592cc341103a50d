//! Delivery order record

use super::status::{OrderStatus, TransitionSource};
use serde::{Deserialize, Serialize};

// ============================================================================
// Status History
// ============================================================================

/// 状态历史条目 (append-only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    /// Unix millis
    pub timestamp: i64,
    pub source: TransitionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ============================================================================
// Fail Reason
// ============================================================================

/// 失败分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// POS 业务拒单，命中错误方案目录
    Business,
    /// POS 业务拒单，未命中任何错误方案
    Unclassified,
    /// 重试上限耗尽，需要人工介入
    Error,
}

/// 结构化失败原因
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailReason {
    /// 错误方案编码 (e.g. "21")
    pub code: String,
    /// 累积的原始错误信息
    pub message: String,
    pub classification: FailureClass,
    /// 错误方案给出的原因
    #[serde(default)]
    pub reason: String,
    /// 面向运营的补救说明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_description: Option<String>,
}

impl FailReason {
    pub fn is_retry_ceiling(&self) -> bool {
        self.classification == FailureClass::Error
    }
}

// ============================================================================
// Propagation Marks
// ============================================================================

/// 最近一次成功推送到外部系统的状态，以及推送失败、等待补推的状态
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropagationMarks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_pos: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_aggregator: Option<OrderStatus>,
}

impl PropagationMarks {
    pub fn has_pending(&self) -> bool {
        self.pending_pos.is_some() || self.pending_aggregator.is_some()
    }
}

// ============================================================================
// Delivery Order
// ============================================================================

/// 外卖订单记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryOrder {
    // === Identity ===
    /// Internal ID
    pub id: String,
    pub store_id: String,
    /// 外卖平台订单号
    pub vendor_order_id: String,
    /// POS 订单号 (创建成功后才有)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_order_id: Option<String>,
    /// 取餐码 / 人工可读订单号
    pub order_code: String,

    // === Classification ===
    pub pos_type: String,
    pub delivery_service: String,
    #[serde(default)]
    pub is_preorder: bool,

    // === Status ===
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<OrderStatus>,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<FailReason>,

    // === Retry ===
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub is_retry: bool,

    // === Timing (Unix millis) ===
    pub order_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_pickup_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooking_complete_time: Option<i64>,

    // === Bookkeeping ===
    #[serde(default)]
    pub propagated: PropagationMarks,
    /// 乐观锁版本号，每次成功写入 +1
    #[serde(default)]
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DeliveryOrder {
    /// Create a freshly received order in `NEW`
    pub fn new(
        store_id: impl Into<String>,
        vendor_order_id: impl Into<String>,
        order_code: impl Into<String>,
        pos_type: impl Into<String>,
        delivery_service: impl Into<String>,
        order_time: i64,
    ) -> Self {
        let now = crate::util::now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            store_id: store_id.into(),
            vendor_order_id: vendor_order_id.into(),
            pos_order_id: None,
            order_code: order_code.into(),
            pos_type: pos_type.into(),
            delivery_service: delivery_service.into(),
            is_preorder: false,
            status: OrderStatus::New,
            payment_status: None,
            status_history: vec![StatusHistoryEntry {
                status: OrderStatus::New,
                timestamp: order_time,
                source: TransitionSource::Aggregator,
                note: None,
            }],
            fail_reason: None,
            retry_count: 0,
            is_retry: false,
            order_time,
            estimated_pickup_time: None,
            cooking_complete_time: None,
            propagated: PropagationMarks::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 终态判断：CLOSED / CANCELLED_* / 重试耗尽后的 FAILED
    pub fn is_terminal(&self) -> bool {
        if self.status.is_final() {
            return true;
        }
        self.status == OrderStatus::Failed
            && self
                .fail_reason
                .as_ref()
                .is_some_and(FailReason::is_retry_ceiling)
    }

    /// 订单当前是否处于该状态 (配送状态或支付子状态)
    pub fn is_in(&self, status: OrderStatus) -> bool {
        if status.is_payment() {
            self.payment_status == Some(status)
        } else {
            self.status == status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeliveryOrder {
        DeliveryOrder::new("store-1", "glovo-100", "A17", "iiko", "glovo", 1_000)
    }

    #[test]
    fn test_new_order_starts_in_new_with_history() {
        let order = sample();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.status_history.len(), 1);
        assert_eq!(order.status_history[0].timestamp, 1_000);
        assert_eq!(order.version, 0);
        assert!(!order.is_terminal());
    }

    #[test]
    fn test_failed_is_terminal_only_after_ceiling() {
        let mut order = sample();
        order.status = OrderStatus::Failed;
        order.fail_reason = Some(FailReason {
            code: "21".to_string(),
            message: "product unavailable".to_string(),
            classification: FailureClass::Business,
            reason: "stop list".to_string(),
            remediation_description: None,
        });
        assert!(!order.is_terminal());

        if let Some(reason) = order.fail_reason.as_mut() {
            reason.classification = FailureClass::Error;
        }
        assert!(order.is_terminal());
    }

    #[test]
    fn test_serde_keeps_optional_fields_compact() {
        let order = sample();
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("pos_order_id").is_none());
        assert_eq!(json["status"], "NEW");

        let back: DeliveryOrder = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_pending_marks_default_to_none() {
        let json = r#"{"pos":"ACCEPTED"}"#;
        let marks: PropagationMarks = serde_json::from_str(json).unwrap();
        assert_eq!(marks.pos, Some(OrderStatus::Accepted));
        assert!(!marks.has_pending());

        let marks = PropagationMarks {
            pending_aggregator: Some(OrderStatus::ReadyForPickup),
            ..Default::default()
        };
        assert!(marks.has_pending());
    }

    #[test]
    fn test_is_in_checks_payment_separately() {
        let mut order = sample();
        order.payment_status = Some(OrderStatus::PaymentSuccess);
        assert!(order.is_in(OrderStatus::New));
        assert!(order.is_in(OrderStatus::PaymentSuccess));
        assert!(!order.is_in(OrderStatus::PaymentNew));
        assert!(!order.is_in(OrderStatus::Accepted));
    }
}
