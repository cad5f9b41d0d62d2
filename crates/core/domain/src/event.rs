//! 事件总线记录与主题约定。
//!
//! 主题以 `.` 分段：
//! - `event.outend.down.<UUID>`
//! - `event.device.down.<UUID>`
//! - `system.cpu.load.<subsystem>`

use crate::resource::ResourceClass;
use serde::{Deserialize, Serialize};

/// 事件记录，载荷为 `{topic, from, type, event, ts_ms, payload}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub topic: String,
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    pub ts_ms: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventRecord {
    pub fn new(
        topic: impl Into<String>,
        from: impl Into<String>,
        kind: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            from: from.into(),
            kind: kind.into(),
            event: event.into(),
            ts_ms: crate::now_epoch_ms(),
            payload,
        }
    }

    /// 资源掉线事件。
    pub fn resource_down(class: ResourceClass, uuid: &str, last_error: &str) -> Self {
        Self::new(
            down_topic(class, uuid),
            uuid,
            class.event_segment().to_uppercase(),
            "down",
            serde_json::json!({ "uuid": uuid, "error": last_error }),
        )
    }
}

/// `event.<class>.down.<uuid>`
pub fn down_topic(class: ResourceClass, uuid: &str) -> String {
    format!("event.{}.down.{}", class.event_segment(), uuid)
}

/// `system.cpu.load.<subsystem>`
pub fn cpu_load_topic(subsystem: &str) -> String {
    format!("system.cpu.load.{}", subsystem)
}
