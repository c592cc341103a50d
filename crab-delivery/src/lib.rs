//! Crab Delivery - 外卖订单对账与重试核心
//!
//! # 架构概述
//!
//! 在 POS 和外卖平台之间跟踪订单生命周期，在第三方接口不可靠的情况下保持两侧最终一致：
//!
//! - **状态机** (`orders::state_machine`): 校验并应用状态变更
//! - **重试协调器** (`orders::retry`): 有上限地重新在 POS 建单
//! - **错误解析引擎** (`orders::resolution`): POS 错误文本 → 停售 / 运营告警
//! - **定时扫描** (`orders::sweep`): auto-ready / auto-close
//! - **跨系统推送** (`orders::propagator`): 把状态推送到 POS 和平台
//!
//! # 模块结构
//!
//! ```text
//! crab-delivery/src/
//! ├── core/          # 配置、错误、Reconciler 入口
//! ├── adapters/      # POS / 平台 / 告警适配器契约
//! ├── reference/     # 门店策略 + 错误方案目录
//! ├── orders/        # 订单存储与对账流程
//! └── utils/         # 日志
//! ```

pub mod adapters;
pub mod core;
pub mod orders;
pub mod reference;
pub mod utils;

// Re-export 公共类型
pub use adapters::{AdapterError, AdapterRegistry, AggregatorAdapter, OperatorNotifier, PosAdapter};
pub use crate::core::{Config, Reconciler, ReconcilerError, SweepReport};
pub use orders::{OrderStorage, RetryOutcome, StatusEvent};
pub use reference::{JsonFileSource, ReferenceSnapshot, ReferenceSource};

// Re-export logger functions
pub use utils::logger::{cleanup_old_logs, init_logger, init_logger_with_file};

/// 加载 `.env`、读取配置并初始化日志
///
/// 由外部入口 (定时任务、队列监听器) 在进程启动时调用一次。
pub fn setup_environment() -> anyhow::Result<Config> {
    dotenv::dotenv().ok();
    let config = Config::from_env();

    let log_dir = config.log_dir();
    init_logger_with_file(&config.log_level, config.log_json, Some(&log_dir))?;

    tracing::info!(
        environment = %config.environment,
        work_dir = %config.work_dir,
        "Environment initialized"
    );
    Ok(config)
}
