//! 资源描述与状态机。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 资源运行状态。
///
/// `PENDING → UP` 由 Start 触发；`DOWN` 可恢复（由守护进程重载）；
/// `STOP` 表示已删除；`DISABLE` 表示被管理员禁用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceState {
    Pending,
    Up,
    Down,
    Pause,
    Stop,
    Disable,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Pause => "PAUSE",
            Self::Stop => "STOP",
            Self::Disable => "DISABLE",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Up,
            2 => Self::Down,
            3 => Self::Pause,
            4 => Self::Stop,
            5 => Self::Disable,
            _ => Self::Pending,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Up => 1,
            Self::Down => 2,
            Self::Pause => 3,
            Self::Stop => 4,
            Self::Disable => 5,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 资源类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    /// 南向源（InEnd）
    Source,
    /// 北向目标（OutEnd）
    Target,
    Device,
    Plugin,
    Native,
}

impl ResourceClass {
    /// 事件主题中使用的段名：`event.<segment>.down.<uuid>`。
    pub fn event_segment(&self) -> &'static str {
        match self {
            Self::Source => "inend",
            Self::Target => "outend",
            Self::Device => "device",
            Self::Plugin => "plugin",
            Self::Native => "native",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_segment())
    }
}

/// 资源描述：所有可插拔单元的统一描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceWorker {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ResourceWorker {
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        type_tag: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            type_tag: type_tag.into(),
            config,
            description: String::new(),
        }
    }
}
