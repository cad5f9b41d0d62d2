//! 点位值与资源故障的缓存约定

use crate::InterCache;
use domain::{CacheValue, now_epoch_ms};

pub type PointCache = InterCache<CacheValue>;

/// 资源故障信息所在的 namespace，key 为资源 UUID。
pub const FAULT_NAMESPACE: &str = "__resource_faults__";

/// 采集成功：`status=0`，清空错误。
pub fn write_point_value(cache: &PointCache, device: &str, point: &str, value: impl Into<String>) {
    cache.set(device, point, CacheValue::ok(point, value, now_epoch_ms()), 0);
}

/// 采集失败：`status=1`，保留上一次的值。
pub fn write_point_error(cache: &PointCache, device: &str, point: &str, err_msg: impl Into<String>) {
    let previous = cache.get(device, point);
    let value = CacheValue::failed(point, previous.as_ref(), err_msg, now_epoch_ms());
    cache.set(device, point, value, 0);
}

pub fn point_value(cache: &PointCache, device: &str, point: &str) -> Option<CacheValue> {
    cache.get(device, point)
}

pub fn record_fault(cache: &PointCache, resource: &str, err_msg: impl Into<String>) {
    let value = CacheValue::failed(resource, None, err_msg, now_epoch_ms());
    cache.set(FAULT_NAMESPACE, resource, value, 0);
}

pub fn last_fault(cache: &PointCache, resource: &str) -> Option<String> {
    cache.get(FAULT_NAMESPACE, resource).map(|value| value.err_msg)
}

pub fn clear_fault(cache: &PointCache, resource: &str) {
    cache.delete(FAULT_NAMESPACE, resource);
}
