//! 参考数据：门店重试策略 + 错误方案目录
//!
//! 参考数据对核心只读。每次调用 (一次重试批处理、一次定时扫描、一条 webhook)
//! 重新加载一份 [`ReferenceSnapshot`]，不跨调用缓存。

pub mod catalog;
pub mod file;

use async_trait::async_trait;
use shared::{ErrorSolution, StoreRetryPolicy};
use std::collections::HashMap;
use thiserror::Error;

pub use catalog::{Classification, ExtractedItem, SolutionCatalog, UNCLASSIFIED_CODE};
pub use file::JsonFileSource;

/// Reference data errors
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Failed to read reference data: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid reference data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No retry policy configured for store {0}")]
    MissingPolicy(String),
}

pub type ReferenceResult<T> = Result<T, ReferenceError>;

/// 参考数据来源
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn load_policies(&self) -> ReferenceResult<Vec<StoreRetryPolicy>>;

    /// 按目录顺序返回 (顺序决定匹配优先级)
    async fn load_error_solutions(&self) -> ReferenceResult<Vec<ErrorSolution>>;
}

/// 单次调用的参考数据快照
#[derive(Debug)]
pub struct ReferenceSnapshot {
    policies: HashMap<String, StoreRetryPolicy>,
    catalog: SolutionCatalog,
    loaded_at: i64,
}

impl ReferenceSnapshot {
    /// 从来源加载一份新快照
    pub async fn load(source: &dyn ReferenceSource) -> ReferenceResult<Self> {
        let policies = source.load_policies().await?;
        let solutions = source.load_error_solutions().await?;
        let snapshot = Self::from_parts(policies, solutions);
        tracing::debug!(
            policies = snapshot.policies.len(),
            solutions = snapshot.catalog.len(),
            "Reference snapshot loaded"
        );
        Ok(snapshot)
    }

    pub fn from_parts(policies: Vec<StoreRetryPolicy>, solutions: Vec<ErrorSolution>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.store_id.clone(), p))
                .collect(),
            catalog: SolutionCatalog::compile(solutions),
            loaded_at: shared::util::now_millis(),
        }
    }

    /// Policy for a store
    pub fn policy(&self, store_id: &str) -> ReferenceResult<&StoreRetryPolicy> {
        self.policies
            .get(store_id)
            .ok_or_else(|| ReferenceError::MissingPolicy(store_id.to_string()))
    }

    pub fn policies(&self) -> impl Iterator<Item = &StoreRetryPolicy> {
        self.policies.values()
    }

    pub fn catalog(&self) -> &SolutionCatalog {
        &self.catalog
    }

    pub fn loaded_at(&self) -> i64 {
        self.loaded_at
    }
}
