//! Stop List Model

use serde::{Deserialize, Serialize};
use std::fmt;

/// 停售目标类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Product,
    Attribute,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Product => "product",
            ItemKind::Attribute => "attribute",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 停售列表条目
///
/// 由错误解析引擎创建/覆盖，适配器在下一次菜单同步时读取。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopListEntry {
    pub store_id: String,
    pub item_id: String,
    pub item_kind: ItemKind,
    pub suspended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    /// 触发停售的错误方案编码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub updated_at: i64,
}
