//! 运营告警

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AdapterResult, OperatorNotifier};
use crate::utils::logger::OPERATOR_TARGET;

/// 运营告警内容
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorNotice {
    pub store_id: String,
    pub order_id: String,
    pub order_code: String,
    /// 错误方案编码
    pub code: String,
    pub reason: String,
    pub business_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
}

/// 默认告警通道：写入 `operator` 日志流 (永久保留)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl OperatorNotifier for LogNotifier {
    async fn notify(&self, notice: &OperatorNotice) -> AdapterResult<()> {
        tracing::warn!(
            target: OPERATOR_TARGET,
            store_id = %notice.store_id,
            order_id = %notice.order_id,
            order_code = %notice.order_code,
            code = %notice.code,
            item_id = notice.item_id.as_deref().unwrap_or("-"),
            item_name = notice.item_name.as_deref().unwrap_or("-"),
            "{}: {}",
            notice.reason,
            notice.business_description
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notice = OperatorNotice {
            store_id: "s1".to_string(),
            order_id: "o1".to_string(),
            order_code: "A17".to_string(),
            code: "21".to_string(),
            reason: "Product is on the stop list".to_string(),
            business_description: String::new(),
            item_id: Some("4711".to_string()),
            item_name: None,
        };
        assert!(LogNotifier.notify(&notice).await.is_ok());
    }
}
