//! 点位写入校验
//!
//! - tag 匹配 `^[A-Za-z_][A-Za-z0-9_]*$` 且在设备内唯一
//! - weight 不为 0
//! - 采集频率钳制到 `[50, 100000]` 毫秒
//! - Modbus 地址：读功能码 1..=4，寄存器数量覆盖数据类型宽度

use crate::error::StorageError;
use domain::point::clamp_frequency;
use domain::{DataPoint, DataType, PointAddress};
use regex::Regex;
use std::sync::OnceLock;

pub const TAG_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn tag_regex() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(TAG_PATTERN).ok()).as_ref()
}

pub fn validate_tag(tag: &str) -> Result<(), StorageError> {
    match tag_regex() {
        Some(re) if re.is_match(tag) => Ok(()),
        _ => Err(StorageError::Invalid(format!("tag must match {}: {}", TAG_PATTERN, tag))),
    }
}

/// 校验并规范化点位；`existing` 为同设备已有点位。
pub fn validate_point(mut point: DataPoint, existing: &[DataPoint]) -> Result<DataPoint, StorageError> {
    if point.uuid.is_empty() {
        return Err(StorageError::Invalid("uuid required".to_string()));
    }
    if point.device_uuid.is_empty() {
        return Err(StorageError::Invalid("device uuid required".to_string()));
    }
    validate_tag(&point.tag)?;
    if existing
        .iter()
        .any(|other| other.uuid != point.uuid && other.tag == point.tag)
    {
        return Err(StorageError::Conflict(format!("duplicate tag: {}", point.tag)));
    }
    if point.weight == 0.0 || !point.weight.is_finite() {
        return Err(StorageError::Invalid(format!("invalid weight: {}", point.weight)));
    }
    point.frequency_ms = clamp_frequency(point.frequency_ms);

    if let PointAddress::Modbus {
        function, quantity, ..
    } = &point.address
    {
        if !(1..=4).contains(function) {
            return Err(StorageError::Invalid(format!("invalid read function: {}", function)));
        }
        if *quantity == 0 {
            return Err(StorageError::Invalid("quantity must be positive".to_string()));
        }
        let is_register = *function == 3 || *function == 4;
        if is_register && point.data_type != DataType::Raw {
            let needed = match point.data_type.byte_len() {
                Some(len) => len,
                None => 2,
            };
            if usize::from(*quantity) * 2 < needed {
                return Err(StorageError::Invalid(format!(
                    "{} needs {} bytes, quantity {} gives {}",
                    point.data_type,
                    needed,
                    quantity,
                    usize::from(*quantity) * 2
                )));
            }
        }
    }
    Ok(point)
}
