//! 点位内存存储实现
//!
//! 功能：
//! - 按设备分组的点位 CRUD
//! - 写入前校验（tag 唯一、权重、频率）

use crate::error::StorageError;
use crate::traits::PointStore;
use crate::validation::validate_point;
use domain::DataPoint;
use std::collections::HashMap;
use std::sync::RwLock;

/// 点位内存存储
///
/// 外层 key 为设备 UUID，内层 key 为点位 UUID。
#[derive(Default)]
pub struct InMemoryPointStore {
    points: RwLock<HashMap<String, HashMap<String, DataPoint>>>,
}

impl InMemoryPointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PointStore for InMemoryPointStore {
    async fn list_points(&self, device_uuid: &str) -> Result<Vec<DataPoint>, StorageError> {
        let map = self
            .points
            .read()
            .map_err(|_| StorageError::Backend("lock failed".to_string()))?;
        let mut items: Vec<DataPoint> = map
            .get(device_uuid)
            .map(|points| points.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(items)
    }

    async fn find_point(
        &self,
        device_uuid: &str,
        point_uuid: &str,
    ) -> Result<Option<DataPoint>, StorageError> {
        let map = self
            .points
            .read()
            .map_err(|_| StorageError::Backend("lock failed".to_string()))?;
        Ok(map
            .get(device_uuid)
            .and_then(|points| points.get(point_uuid))
            .cloned())
    }

    async fn upsert_point(&self, point: DataPoint) -> Result<DataPoint, StorageError> {
        let mut map = self
            .points
            .write()
            .map_err(|_| StorageError::Backend("lock failed".to_string()))?;
        let device = map.entry(point.device_uuid.clone()).or_default();
        let existing: Vec<DataPoint> = device.values().cloned().collect();
        let point = validate_point(point, &existing)?;
        device.insert(point.uuid.clone(), point.clone());
        Ok(point)
    }

    async fn delete_points(
        &self,
        device_uuid: &str,
        point_uuids: &[String],
    ) -> Result<usize, StorageError> {
        let mut map = self
            .points
            .write()
            .map_err(|_| StorageError::Backend("lock failed".to_string()))?;
        let Some(device) = map.get_mut(device_uuid) else {
            return Ok(0);
        };
        let removed = point_uuids
            .iter()
            .filter(|uuid| device.remove(uuid.as_str()).is_some())
            .count();
        if device.is_empty() {
            map.remove(device_uuid);
        }
        Ok(removed)
    }

    async fn delete_device(&self, device_uuid: &str) -> Result<usize, StorageError> {
        let mut map = self
            .points
            .write()
            .map_err(|_| StorageError::Backend("lock failed".to_string()))?;
        Ok(map.remove(device_uuid).map(|points| points.len()).unwrap_or(0))
    }
}
