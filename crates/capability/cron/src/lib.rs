//! # 定时任务
//!
//! 基于 `tokio-cron-scheduler` 的任务调度：系统重启、日常维护脚本等。
//!
//! - 表达式支持 5 段（分钟粒度，自动补秒位 `0`）或 6 段
//! - 每次触发执行 `sh -c <command>`，标题行与 stdout/stderr 追加写入任务日志
//! - 尽力而为：错过的触发点不补跑

mod error;
mod manager;
mod task;

pub use error::CronError;
pub use manager::CronManager;
pub use task::{CronTask, normalize_schedule, run_task};
