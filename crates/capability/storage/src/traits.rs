//! 存储接口 Trait 定义

use crate::error::StorageError;
use async_trait::async_trait;
use domain::DataPoint;

/// 点位表存储接口
///
/// 设备删除时调用 [`delete_device`](PointStore::delete_device) 一并清理其点位。
#[async_trait]
pub trait PointStore: Send + Sync {
    /// 列出设备的全部点位（按 tag 排序）
    async fn list_points(&self, device_uuid: &str) -> Result<Vec<DataPoint>, StorageError>;

    async fn find_point(
        &self,
        device_uuid: &str,
        point_uuid: &str,
    ) -> Result<Option<DataPoint>, StorageError>;

    /// 校验后新增或覆盖（按点位 UUID）
    async fn upsert_point(&self, point: DataPoint) -> Result<DataPoint, StorageError>;

    /// 删除指定点位，返回删除数量
    async fn delete_points(
        &self,
        device_uuid: &str,
        point_uuids: &[String],
    ) -> Result<usize, StorageError>;

    /// 删除设备的全部点位
    async fn delete_device(&self, device_uuid: &str) -> Result<usize, StorageError>;
}
