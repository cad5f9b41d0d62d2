//! 网关运行配置加载。
//!
//! 所有变量均以 `EDGE_` 为前缀，缺省时使用内置默认值；数值格式错误时返回
//! [`ConfigError::Invalid`]。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 日志输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub supervisor_interval_secs: u64,
    pub supervisor_max_retries: u32,
    pub supervisor_backoff_ms: u64,
    pub broker_workers: usize,
    pub broker_queue_size: usize,
    pub ingress_queue_size: usize,
    pub cache_sweep_secs: u64,
    pub device_max_failures: u32,
    pub serial_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
    pub cron_log_dir: String,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:2580".to_string(),
            supervisor_interval_secs: 5,
            supervisor_max_retries: 3,
            supervisor_backoff_ms: 2000,
            broker_workers: 4,
            broker_queue_size: 1024,
            ingress_queue_size: 4096,
            cache_sweep_secs: 30,
            device_max_failures: 3,
            serial_timeout_ms: 3000,
            tcp_timeout_ms: 5000,
            cron_log_dir: "./cronlogs".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let http_addr = env::var("EDGE_HTTP_ADDR").unwrap_or(defaults.http_addr);
        let supervisor_interval_secs = read_u64_with_default(
            "EDGE_SUPERVISOR_INTERVAL_SECS",
            defaults.supervisor_interval_secs,
        )?;
        let supervisor_max_retries = read_u32_with_default(
            "EDGE_SUPERVISOR_MAX_RETRIES",
            defaults.supervisor_max_retries,
        )?;
        let supervisor_backoff_ms =
            read_u64_with_default("EDGE_SUPERVISOR_BACKOFF_MS", defaults.supervisor_backoff_ms)?;
        let broker_workers =
            read_usize_with_default("EDGE_BROKER_WORKERS", defaults.broker_workers)?.max(1);
        let broker_queue_size =
            read_usize_with_default("EDGE_BROKER_QUEUE_SIZE", defaults.broker_queue_size)?.max(1);
        let ingress_queue_size =
            read_usize_with_default("EDGE_INGRESS_QUEUE_SIZE", defaults.ingress_queue_size)?
                .max(1);
        let cache_sweep_secs =
            read_u64_with_default("EDGE_CACHE_SWEEP_SECS", defaults.cache_sweep_secs)?.max(1);
        let device_max_failures =
            read_u32_with_default("EDGE_DEVICE_MAX_FAILURES", defaults.device_max_failures)?
                .max(1);
        let serial_timeout_ms =
            read_u64_with_default("EDGE_SERIAL_TIMEOUT_MS", defaults.serial_timeout_ms)?;
        let tcp_timeout_ms = read_u64_with_default("EDGE_TCP_TIMEOUT_MS", defaults.tcp_timeout_ms)?;
        let cron_log_dir = read_optional("EDGE_CRON_LOG_DIR").unwrap_or(defaults.cron_log_dir);
        let log_format = match read_optional("EDGE_LOG_FORMAT") {
            None => LogFormat::Text,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                _ => return Err(ConfigError::Invalid("EDGE_LOG_FORMAT".to_string(), value)),
            },
        };

        Ok(Self {
            http_addr,
            supervisor_interval_secs,
            supervisor_max_retries,
            supervisor_backoff_ms,
            broker_workers,
            broker_queue_size,
            ingress_queue_size,
            cache_sweep_secs,
            device_max_failures,
            serial_timeout_ms,
            tcp_timeout_ms,
            cron_log_dir,
            log_format,
        })
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_secs)
    }

    pub fn supervisor_backoff(&self) -> Duration {
        Duration::from_millis(self.supervisor_backoff_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs)
    }
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
