//! 批处理结果汇总

use serde::Serialize;
use std::fmt;

/// 批处理类型
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPass {
    AutoReady,
    AutoClose,
    Repropagate,
    RetryDrain,
}

impl fmt::Display for BatchPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPass::AutoReady => write!(f, "auto_ready"),
            BatchPass::AutoClose => write!(f, "auto_close"),
            BatchPass::Repropagate => write!(f, "repropagate"),
            BatchPass::RetryDrain => write!(f, "retry_drain"),
        }
    }
}

/// 单次批处理的汇总；单个订单失败不会中断整个批次
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub pass: BatchPass,
    pub examined: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 被取消、留给下一次运行的订单数
    pub deferred: usize,
    /// (order reference, error)
    pub failures: Vec<(String, String)>,
    /// 内部状态已提交、但推送到外部系统失败的订单数 (留待补推)
    pub propagation_failed: usize,
    pub propagation_failures: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn new(pass: BatchPass) -> Self {
        Self {
            pass,
            examined: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            deferred: 0,
            failures: Vec::new(),
            propagation_failed: 0,
            propagation_failures: Vec::new(),
        }
    }

    pub fn record_success(&mut self) {
        self.examined += 1;
        self.succeeded += 1;
    }

    pub fn record_skip(&mut self) {
        self.examined += 1;
        self.skipped += 1;
    }

    pub fn record_failure(&mut self, order_ref: impl Into<String>, error: impl fmt::Display) {
        self.examined += 1;
        self.failed += 1;
        self.failures.push((order_ref.into(), error.to_string()));
    }

    /// 不影响 examined / succeeded：订单本身已经处理完
    pub fn record_propagation_failure(
        &mut self,
        order_ref: impl Into<String>,
        error: impl fmt::Display,
    ) {
        self.propagation_failed += 1;
        self.propagation_failures
            .push((order_ref.into(), error.to_string()));
    }

    pub fn record_deferred(&mut self, count: usize) {
        self.deferred += count;
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.propagation_failed > 0
    }

    pub fn log(&self) {
        if self.has_failures() {
            tracing::warn!(
                pass = %self.pass,
                examined = self.examined,
                succeeded = self.succeeded,
                failed = self.failed,
                skipped = self.skipped,
                deferred = self.deferred,
                propagation_failed = self.propagation_failed,
                "Batch finished with failures"
            );
            for (order_ref, error) in &self.failures {
                tracing::warn!(pass = %self.pass, order = %order_ref, error = %error, "Batch item failed");
            }
            for (order_ref, error) in &self.propagation_failures {
                tracing::warn!(pass = %self.pass, order = %order_ref, error = %error, "Propagation pending");
            }
        } else {
            tracing::info!(
                pass = %self.pass,
                examined = self.examined,
                succeeded = self.succeeded,
                skipped = self.skipped,
                deferred = self.deferred,
                "Batch finished"
            );
        }
    }
}
