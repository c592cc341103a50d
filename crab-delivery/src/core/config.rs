use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// 对账核心配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/crab/delivery | 工作目录 |
/// | ORDER_DB_PATH | $WORK_DIR/orders.redb | 订单库路径 |
/// | REFERENCE_DATA_PATH | $WORK_DIR/reference.json | 门店策略 + 错误方案目录 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志 |
/// | ADAPTER_TIMEOUT_MS | 15000 | POS/平台调用超时(毫秒) |
/// | STORE_TIMEOUT_MS | 5000 | 订单库调用超时(毫秒) |
/// | SWEEP_CONCURRENCY | 8 | 定时扫描并发数 |
/// | RETRY_CONCURRENCY | 4 | 重试批处理并发数 |
/// | AUTO_CLOSE_LOOKBACK_HOURS | 24 | auto-close 回看窗口(小时) |
/// | RETRY_INTERNAL_ID_SOURCES | (空) | 以内部 ID 寻址的重试来源，逗号分隔 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/crab SWEEP_CONCURRENCY=16 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储订单库、日志等文件
    pub work_dir: String,
    /// 订单库路径 (None = 工作目录下默认文件)
    pub order_db_path: Option<String>,
    /// 参考数据文件路径 (None = 工作目录下默认文件)
    pub reference_data_path: Option<String>,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 日志级别
    pub log_level: String,
    /// 是否输出 JSON 日志
    pub log_json: bool,
    /// POS / 外卖平台调用超时 (毫秒)
    pub adapter_timeout_ms: u64,
    /// 订单库调用超时 (毫秒)
    pub store_timeout_ms: u64,
    /// 定时扫描并发数
    pub sweep_concurrency: usize,
    /// 重试批处理并发数
    pub retry_concurrency: usize,
    /// auto-close 回看窗口 (小时)
    pub auto_close_lookback_hours: u32,
    /// 以 `<source>_<internalId>` 格式寻址的重试来源
    pub retry_internal_id_sources: HashSet<String>,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/crab/delivery".into()),
            order_db_path: std::env::var("ORDER_DB_PATH").ok(),
            reference_data_path: std::env::var("REFERENCE_DATA_PATH").ok(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: std::env::var("LOG_JSON")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            adapter_timeout_ms: std::env::var("ADAPTER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15_000),
            store_timeout_ms: std::env::var("STORE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            sweep_concurrency: std::env::var("SWEEP_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(8),
            retry_concurrency: std::env::var("RETRY_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
            auto_close_lookback_hours: std::env::var("AUTO_CLOSE_LOOKBACK_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            retry_internal_id_sources: std::env::var("RETRY_INTERNAL_ID_SOURCES")
                .map(|v| parse_source_list(&v))
                .unwrap_or_default(),
        }
    }

    /// 使用自定义工作目录覆盖配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.order_db_path = None;
        config.reference_data_path = None;
        config
    }

    /// 订单库文件路径
    pub fn order_db_path(&self) -> PathBuf {
        self.order_db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.work_dir).join("orders.redb"))
    }

    /// 参考数据文件路径
    pub fn reference_data_path(&self) -> PathBuf {
        self.reference_data_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.work_dir).join("reference.json"))
    }

    /// 日志目录
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// 回看窗口 (毫秒)
    pub fn lookback_millis(&self) -> i64 {
        i64::from(self.auto_close_lookback_hours) * shared::util::MILLIS_PER_HOUR
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_source_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
