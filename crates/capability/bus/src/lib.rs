//! # 事件总线与消息队列
//!
//! - [`EventBroker`]：`.` 分段的层级主题树，末段 `#` 匹配整棵子树；
//!   按订阅者 UUID 哈希到 N 个 worker 队列，同一订阅者 FIFO，队列满则丢弃。
//! - [`MessageQueue`]：按主题的有界 FIFO，单个分发任务按顺序投递给该主题的所有订阅者；
//!   规则引擎入口使用它。

mod broker;
mod error;
mod queue;

pub use broker::{EventBroker, EventCallback, Subscriber};
pub use error::BusError;
pub use queue::{MessageQueue, QueueHandler};
