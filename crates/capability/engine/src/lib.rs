//! # 规则引擎
//!
//! 数据流：源 / 设备 → 入口队列 `rule.engine.ingress` → 绑定规则的 Lua 脚本 → 北向目标。
//!
//! - [`RuleEngine`]：四类资源管理器、规则表（按源 / 设备反向索引）、每规则一个 VM
//! - [`GatewayApi`]：管理面调用的胶水接口，统一返回 `{code, msg, data}`
//!
//! 脚本返回非空字符串时，引擎把它转发到规则的 `targets`；脚本也可以在
//! `Action` 内用 `data:ToMqtt(uuid, payload)` 等直接投递。

mod engine;
mod error;
mod glue;
mod index;
mod router;

pub use engine::RuleEngine;
pub use error::EngineError;
pub use glue::GatewayApi;
pub use router::TargetRouter;
