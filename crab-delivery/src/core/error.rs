use thiserror::Error;

use crate::orders::storage::StorageError;
use crate::reference::ReferenceError;

/// 对账核心的顶层错误 (启动 / 加载参考数据)
#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error("订单库错误: {0}")]
    Storage(#[from] StorageError),

    #[error("参考数据错误: {0}")]
    Reference(#[from] ReferenceError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("订单未找到: {0}")]
    OrderNotFound(String),
}

pub type Result<T> = std::result::Result<T, ReconcilerError>;
