//! 任务描述与单次执行

use crate::error::CronError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

/// 定时任务。`schedule` 为 5 段（分钟粒度）或 6 段（含秒）cron 表达式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTask {
    pub name: String,
    pub schedule: String,
    pub command: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// 为空时落到管理器的日志目录 `<name>.log`
    #[serde(default)]
    pub log_path: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl CronTask {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            command: command.into(),
            active: true,
            log_path: PathBuf::new(),
            description: String::new(),
            last_run: None,
            next_run: None,
        }
    }

    /// 预置的系统重启任务
    pub fn reboot(schedule: impl Into<String>) -> Self {
        let mut task = Self::new("reboot", schedule, "reboot");
        task.description = "system reboot".to_string();
        task
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// 规整 cron 表达式：5 段补秒位 `0`，6/7 段原样保留。
pub fn normalize_schedule(schedule: &str) -> Result<String, CronError> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(CronError::BadConfig(format!(
            "schedule '{}' has {} fields, expected 5 or 6",
            schedule, n
        ))),
    }
}

/// 执行一次任务：`sh -c <command>`，输出追加到任务日志。
///
/// 命令非零退出不视为错误，仅记录退出码；返回退出码（被信号终止时为 `None`）。
pub async fn run_task(task: &CronTask) -> Result<Option<i32>, CronError> {
    let started = Utc::now();
    let output = Command::new("sh")
        .arg("-c")
        .arg(&task.command)
        .stdin(Stdio::null())
        .output()
        .await?;
    let code = output.status.code();

    let mut entry = format!(
        "=== {} task={} exit={} ===\n",
        started.to_rfc3339(),
        task.name,
        code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
    )
    .into_bytes();
    entry.extend_from_slice(&output.stdout);
    entry.extend_from_slice(&output.stderr);
    if entry.last() != Some(&b'\n') {
        entry.push(b'\n');
    }
    append_log(&task.log_path, &entry).await?;

    if output.status.success() {
        info!(target: "edge.cron", task = %task.name, "task finished");
    } else {
        warn!(target: "edge.cron", task = %task.name, exit = ?code, "task exited with failure");
    }
    Ok(code)
}

async fn append_log(path: &Path, bytes: &[u8]) -> Result<(), CronError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_schedule_gets_second_zero() {
        assert_eq!(normalize_schedule("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_schedule(" 0  3 * * 1 ").unwrap(), "0 0 3 * * 1");
    }

    #[test]
    fn six_field_schedule_is_kept() {
        assert_eq!(normalize_schedule("*/10 * * * * *").unwrap(), "*/10 * * * * *");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(matches!(normalize_schedule("* * *"), Err(CronError::BadConfig(_))));
        assert!(matches!(normalize_schedule(""), Err(CronError::BadConfig(_))));
    }

    #[test]
    fn reboot_task_is_active() {
        let task = CronTask::reboot("0 4 * * *");
        assert_eq!(task.name, "reboot");
        assert_eq!(task.command, "reboot");
        assert!(task.active);
    }

    #[test]
    fn task_deserializes_with_defaults() {
        let task: CronTask = serde_json::from_str(
            r#"{"name":"clean","schedule":"0 1 * * *","command":"rm -f /tmp/x"}"#,
        )
        .unwrap();
        assert!(task.active);
        assert!(task.log_path.as_os_str().is_empty());
        assert!(task.last_run.is_none());
    }
}
