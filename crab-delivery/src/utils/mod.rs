//! 工具模块
//!
//! - 日志初始化与清理

pub mod logger;
