//! # 点位表存储
//!
//! 设备点位表的数据访问层。运行时核心只依赖 [`PointStore`] 接口：
//!
//! 1. **接口层** (`traits.rs`)：点位 CRUD 的异步 Trait
//! 2. **校验层** (`validation.rs`)：tag 格式与唯一性、权重、频率钳制、Modbus 地址
//! 3. **实现层** (`in_memory/`)：`RwLock<HashMap>` 内存实现，进程内默认使用
//!
//! 写入前统一走 [`validate_point`]，实现层不会保存未校验的点位。

mod error;
mod in_memory;
mod traits;
mod validation;

pub use error::StorageError;
pub use in_memory::InMemoryPointStore;
pub use traits::PointStore;
pub use validation::{TAG_PATTERN, validate_point, validate_tag};
