//! # 进程内缓存
//!
//! 两级映射 `namespace → key → {value, expiration}`：
//! - 点位最新值：`InterCache<CacheValue>`，namespace 为设备 UUID，key 为点位 UUID
//! - 脚本 `store.*`：`InterCache<String>`
//! - 资源故障：固定 namespace，供守护进程读取最后一次错误
//!
//! 读多写少：读取走共享锁，过期条目在读取时惰性删除，后台清理任务定期扫描。

mod inter;
mod point;

pub use inter::InterCache;
pub use point::{
    FAULT_NAMESPACE, PointCache, clear_fault, last_fault, point_value, record_fault,
    write_point_error, write_point_value,
};
