//! 内存存储实现
//!
//! 使用 `RwLock<HashMap>` 提供线程安全的内存存储。

mod point;

pub use point::InMemoryPointStore;
