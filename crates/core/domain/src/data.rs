use serde::{Deserialize, Serialize};
use std::fmt;

/// 解码后的点位值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValueData {
    Bool(bool),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

impl PointValueData {
    /// 按浮点读取（布尔按 0/1，字符串尝试解析）。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::I64(v) => Some(*v as f64),
            Self::U64(v) => Some(*v as f64),
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            Self::String(v) => v.trim().parse().ok(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for PointValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::U64(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// 点位缓存值，按 `(namespace=设备 UUID, key=点位 UUID)` 存放。
///
/// 不变式：`status == 0` 当且仅当最近一次采集成功；此时 `err_msg` 为空。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheValue {
    pub uuid: String,
    pub status: i32,
    pub last_fetch_time: i64,
    pub value: String,
    pub err_msg: String,
}

impl CacheValue {
    pub fn ok(uuid: impl Into<String>, value: impl Into<String>, ts_ms: i64) -> Self {
        Self {
            uuid: uuid.into(),
            status: 0,
            last_fetch_time: ts_ms,
            value: value.into(),
            err_msg: String::new(),
        }
    }

    /// 失败值：保留上一次的 value，便于前端展示最后已知值。
    pub fn failed(
        uuid: impl Into<String>,
        previous: Option<&CacheValue>,
        err_msg: impl Into<String>,
        ts_ms: i64,
    ) -> Self {
        let mut err_msg = err_msg.into();
        if err_msg.is_empty() {
            err_msg = "unknown error".to_string();
        }
        Self {
            uuid: uuid.into(),
            status: 1,
            last_fetch_time: ts_ms,
            value: previous.map(|v| v.value.clone()).unwrap_or_default(),
            err_msg,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// 入站记录的来源。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uuid", rename_all = "lowercase")]
pub enum Origin {
    Source(String),
    Device(String),
}

impl Origin {
    pub fn uuid(&self) -> &str {
        match self {
            Self::Source(uuid) | Self::Device(uuid) => uuid,
        }
    }
}

/// 进入规则引擎队列的一条记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRecord {
    pub origin: Origin,
    pub payload: String,
    pub received_at_ms: i64,
}

impl InboundRecord {
    pub fn new(origin: Origin, payload: impl Into<String>) -> Self {
        Self {
            origin,
            payload: payload.into(),
            received_at_ms: crate::now_epoch_ms(),
        }
    }

    /// 是否为测试注入记录。
    pub fn is_test(&self) -> bool {
        self.payload.starts_with(crate::TEST_RULE_MARKER)
    }
}
