//! Error Solution Model
//!
//! 错误方案目录条目：把 POS 返回的错误文本映射到补救动作。

use serde::{Deserialize, Serialize};

use super::stop_list::ItemKind;

/// 补救类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationKind {
    /// 商品加入停售列表
    ProductStoplist,
    /// 加料/属性加入停售列表
    AttributeStoplist,
    #[default]
    None,
}

impl RemediationKind {
    /// 停售目标类型，`None` 表示无需停售
    pub fn item_kind(&self) -> Option<ItemKind> {
        match self {
            RemediationKind::ProductStoplist => Some(ItemKind::Product),
            RemediationKind::AttributeStoplist => Some(ItemKind::Attribute),
            RemediationKind::None => None,
        }
    }
}

/// 错误方案
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSolution {
    /// 补救分类编码
    pub code: String,
    /// 匹配错误文本的正则
    pub match_pattern: String,
    /// 提取商品 ID 的正则：命名分组 `item` (或第一个分组)，可选命名分组 `name`。
    /// 为空时使用 `match_pattern` 提取。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_pattern: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub business_description: String,
    #[serde(default)]
    pub remediation_kind: RemediationKind,
    #[serde(default)]
    pub notify_operator: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_kind_wire_names() {
        let kind: RemediationKind = serde_json::from_str("\"product-stoplist\"").unwrap();
        assert_eq!(kind, RemediationKind::ProductStoplist);
        assert_eq!(kind.item_kind(), Some(ItemKind::Product));

        let kind: RemediationKind = serde_json::from_str("\"attribute-stoplist\"").unwrap();
        assert_eq!(kind.item_kind(), Some(ItemKind::Attribute));

        assert_eq!(RemediationKind::None.item_kind(), None);
    }

    #[test]
    fn test_defaults_when_omitted() {
        let solution: ErrorSolution = serde_json::from_str(
            r#"{"code":"7","match_pattern":"timeout","reason":"POS busy"}"#,
        )
        .unwrap();
        assert_eq!(solution.remediation_kind, RemediationKind::None);
        assert!(!solution.notify_operator);
        assert!(solution.item_pattern.is_none());
    }
}
