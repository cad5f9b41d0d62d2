//! 稳定的 DTO 与 API 响应契约。
//!
//! 所有对外调用统一返回 `{code, msg, data}`；`code == 200` 表示成功，
//! 其余取值由 [`code_for`] 从错误种类映射得到。

use domain::{DataOrder, DataPoint, DataType, ErrorKind, PointAddress, ResourceState};
use serde::{Deserialize, Serialize};

/// 成功响应码。
pub const CODE_OK: i32 = 200;

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: CODE_OK,
            msg: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            code: code_for(kind),
            msg: msg.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_OK
    }
}

/// 错误种类 → 响应码。
pub fn code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::BadConfig => 4001,
        ErrorKind::ScriptFailure => 4003,
        ErrorKind::NotFound => 4004,
        ErrorKind::Unsupported => 4005,
        ErrorKind::ResourceBusy => 4009,
        ErrorKind::DecodeError => 4022,
        ErrorKind::TransportFailure => 5002,
        ErrorKind::Internal => 5000,
    }
}

/// 分页结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDto<T> {
    pub current: usize,
    pub size: usize,
    pub total: usize,
    pub records: Vec<T>,
}

/// 分页查询参数（`current` 从 1 开始）。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_current")]
    pub current: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_current() -> usize {
    1
}

fn default_size() -> usize {
    20
}

/// 资源（源 / 目标 / 设备 / 插件）创建或更新请求体。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    /// 可选：未提供时由服务端生成
    #[serde(default)]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

/// 资源返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDto {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub config: serde_json::Value,
    pub description: String,
    pub state: ResourceState,
}

/// 规则创建或更新请求体。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRequest {
    #[serde(default)]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub success: String,
    pub actions: String,
    #[serde(default)]
    pub failed: String,
    #[serde(default)]
    pub description: String,
}

/// 规则返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    pub uuid: String,
    pub name: String,
    pub source: Option<String>,
    pub device: Option<String>,
    pub targets: Vec<String>,
    pub success: String,
    pub actions: String,
    pub failed: String,
    pub description: String,
}

/// 点位创建或更新请求体。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointRequest {
    #[serde(default)]
    pub uuid: Option<String>,
    pub tag: String,
    #[serde(default)]
    pub alias: String,
    pub address: PointAddress,
    pub data_type: DataType,
    pub data_order: DataOrder,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub frequency_ms: Option<u64>,
}

/// 点位返回结构：点位表 + 当前缓存值。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDto {
    #[serde(flatten)]
    pub point: DataPoint,
    pub value: String,
    pub status: i32,
    pub err_msg: String,
    pub last_fetch_time: i64,
}

/// 测试注入请求体。
#[derive(Debug, Clone, Deserialize)]
pub struct TestInjectRequest {
    pub uuid: String,
    pub data: String,
}

/// 控制命令请求体（设备 OnCtrl）。
#[derive(Debug, Clone, Deserialize)]
pub struct CtrlRequest {
    pub cmd: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 进程计数指标快照。
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDto {
    pub ingress_published: u64,
    pub ingress_dropped: u64,
    pub broker_published: u64,
    pub broker_delivered: u64,
    pub broker_dropped: u64,
    pub rule_executions: u64,
    pub rule_failures: u64,
    pub script_busy: u64,
    pub resource_reloads: u64,
    pub resource_reload_failures: u64,
    pub target_submitted: u64,
    pub target_dropped: u64,
    pub decode_errors: u64,
    pub poll_errors: u64,
}
