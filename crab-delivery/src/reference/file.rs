//! JSON 文件参考数据来源
//!
//! 文件格式：
//!
//! ```json
//! {
//!   "policies": [{ "store_id": "s1", "max_retry_count": 3 }],
//!   "error_solutions": [{ "code": "21", "match_pattern": "...", "reason": "..." }]
//! }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use shared::{ErrorSolution, StoreRetryPolicy};
use std::path::PathBuf;

use super::{ReferenceResult, ReferenceSource};

#[derive(Debug, Default, Deserialize)]
struct ReferenceDocument {
    #[serde(default)]
    policies: Vec<StoreRetryPolicy>,
    #[serde(default)]
    error_solutions: Vec<ErrorSolution>,
}

/// 每次调用都重新读取文件
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> ReferenceResult<ReferenceDocument> {
        let raw = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl ReferenceSource for JsonFileSource {
    async fn load_policies(&self) -> ReferenceResult<Vec<StoreRetryPolicy>> {
        Ok(self.read().await?.policies)
    }

    async fn load_error_solutions(&self) -> ReferenceResult<Vec<ErrorSolution>> {
        Ok(self.read().await?.error_solutions)
    }
}
