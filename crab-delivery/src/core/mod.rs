//! 核心模块 - 配置、错误和对账入口
//!
//! # 模块结构
//!
//! - [`Config`] - 环境变量配置
//! - [`Reconciler`] - 对账核心入口 (重试、定时扫描、入站状态)
//! - [`ReconcilerError`] - 顶层错误

pub mod config;
pub mod error;
pub mod reconciler;

pub use config::Config;
pub use error::{ReconcilerError, Result};
pub use reconciler::{Reconciler, SweepReport};
