//! 网关核心领域模型：所有能力模块共享的数据结构。
//!
//! - [`resource`]：资源描述（Source / Target / Device / Plugin）与状态机
//! - [`point`]：设备点位（地址、数据类型、字节序、权重、采集频率）
//! - [`data`]：点位值、缓存值、进入规则引擎的入站记录
//! - [`rule`]：规则（脚本体 + 绑定关系）
//! - [`event`]：事件总线上的事件记录与主题约定

pub mod data;
pub mod event;
pub mod point;
pub mod resource;
pub mod rule;

pub use data::{CacheValue, InboundRecord, Origin, PointValueData};
pub use event::{EventRecord, cpu_load_topic, down_topic};
pub use point::{DataOrder, DataPoint, DataType, PointAddress};
pub use resource::{ResourceClass, ResourceState, ResourceWorker};
pub use rule::Rule;

/// 规则引擎入口队列的主题名。
pub const INGRESS_TOPIC: &str = "rule.engine.ingress";

/// 测试注入标记：带此前缀的记录只走规则分发，不会到达物理目标。
pub const TEST_RULE_MARKER: &str = "::::TEST_RULE::::";

/// 核心边界上可观察到的错误种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadConfig,
    ResourceBusy,
    NotFound,
    TransportFailure,
    DecodeError,
    ScriptFailure,
    Unsupported,
    Internal,
}

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
