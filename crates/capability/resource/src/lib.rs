//! # 资源管理
//!
//! - [`Resource`]：Source / Target / Device / Plugin 共同实现的驱动契约
//! - [`ResourceManager`]：工厂注册表 + UUID → 实例映射；创建、启动、停止、重载
//! - [`Supervisor`]：周期探测每个资源的状态，`DOWN` 时按次数上限与退避时间重载
//!
//! 进程内存在四个管理器实例（南向、北向、插件、原生），各自配一个守护任务。

mod error;
mod manager;
mod resource;
mod supervisor;

pub use error::ResourceError;
pub use manager::{ResourceFactory, ResourceManager};
pub use resource::{Resource, StateCell};
pub use supervisor::{Supervisor, SupervisorConfig, TickReport};
