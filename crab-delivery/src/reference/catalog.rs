//! 错误方案目录 (编译后)
//!
//! 按目录顺序逐条匹配，首个命中的方案生效；全部未命中时返回默认的 "未分类" 方案。

use regex::Regex;
use shared::{ErrorSolution, RemediationKind};

/// 未命中任何方案时使用的编码
pub const UNCLASSIFIED_CODE: &str = "UNCLASSIFIED";

/// 从错误文本中提取出的商品
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub id: String,
    pub name: Option<String>,
}

/// 分类结果
#[derive(Debug, Clone)]
pub struct Classification {
    pub solution: ErrorSolution,
    /// false = 使用了默认未分类方案
    pub matched: bool,
    /// 停售目标 (仅 stop-list 类方案且提取成功时存在)
    pub item: Option<ExtractedItem>,
}

struct CompiledSolution {
    solution: ErrorSolution,
    matcher: Regex,
    extractor: Option<Regex>,
}

impl CompiledSolution {
    fn extract(&self, text: &str) -> Option<ExtractedItem> {
        let rule = self.extractor.as_ref().unwrap_or(&self.matcher);
        let caps = rule.captures(text)?;
        let id = caps
            .name("item")
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())?;
        let name = caps
            .name("name")
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        Some(ExtractedItem {
            id: id.to_string(),
            name,
        })
    }
}

/// 编译后的错误方案目录
pub struct SolutionCatalog {
    entries: Vec<CompiledSolution>,
    fallback: ErrorSolution,
}

impl SolutionCatalog {
    /// 编译目录；非法正则的条目跳过并记录警告
    pub fn compile(solutions: Vec<ErrorSolution>) -> Self {
        let mut entries = Vec::with_capacity(solutions.len());
        for solution in solutions {
            let matcher = match Regex::new(&solution.match_pattern) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(code = %solution.code, error = %e, "Skipping error solution with invalid match pattern");
                    continue;
                }
            };
            let extractor = match solution.item_pattern.as_deref() {
                Some(pattern) => match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(code = %solution.code, error = %e, "Skipping error solution with invalid item pattern");
                        continue;
                    }
                },
                None => None,
            };
            entries.push(CompiledSolution {
                solution,
                matcher,
                extractor,
            });
        }

        Self {
            entries,
            fallback: ErrorSolution {
                code: UNCLASSIFIED_CODE.to_string(),
                match_pattern: String::new(),
                item_pattern: None,
                reason: "Unclassified POS error".to_string(),
                business_description: "The POS rejected the order with an unknown error"
                    .to_string(),
                remediation_kind: RemediationKind::None,
                notify_operator: false,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify raw vendor error text
    pub fn classify(&self, error_text: &str) -> Classification {
        let Some(entry) = self.entries.iter().find(|e| e.matcher.is_match(error_text)) else {
            return Classification {
                solution: self.fallback.clone(),
                matched: false,
                item: None,
            };
        };

        let item = if entry.solution.remediation_kind.item_kind().is_some() {
            entry.extract(error_text)
        } else {
            None
        };

        Classification {
            solution: entry.solution.clone(),
            matched: true,
            item,
        }
    }
}

impl std::fmt::Debug for SolutionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionCatalog")
            .field(
                "codes",
                &self
                    .entries
                    .iter()
                    .map(|e| e.solution.code.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
