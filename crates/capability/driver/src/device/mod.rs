mod bacnet_router;
mod modbus_master;
mod modbus_slaver;

pub use bacnet_router::BacnetRouter;
pub use modbus_master::{ModbusConnector, ModbusMaster, TokioModbusConnector};
pub use modbus_slaver::ModbusSlaver;

use domain::{DataPoint, PointValueData};
use edge_resource::ResourceError;
use serde_json::Value;

/// 从控制参数中取 `{tag, value}`。
pub(crate) fn tag_and_value(args: &Value) -> Result<(String, Value), ResourceError> {
    let tag = args
        .get("tag")
        .and_then(Value::as_str)
        .ok_or_else(|| ResourceError::BadConfig("tag is required".to_string()))?;
    let value = args
        .get("value")
        .cloned()
        .ok_or_else(|| ResourceError::BadConfig("value is required".to_string()))?;
    Ok((tag.to_string(), value))
}

pub(crate) fn json_to_point_value(value: &Value) -> Result<PointValueData, ResourceError> {
    match value {
        Value::Bool(v) => Ok(PointValueData::Bool(*v)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(PointValueData::I64(v))
            } else if let Some(v) = n.as_u64() {
                Ok(PointValueData::U64(v))
            } else {
                Ok(PointValueData::F64(n.as_f64().unwrap_or_default()))
            }
        }
        Value::String(v) => Ok(PointValueData::String(v.clone())),
        other => Err(ResourceError::BadConfig(format!("unsupported value: {}", other))),
    }
}

/// 设备点位上报到规则引擎的记录
pub(crate) fn point_record(point: &DataPoint, value: &PointValueData) -> String {
    serde_json::json!({
        "uuid": point.uuid,
        "tag": point.tag,
        "alias": point.alias,
        "value": value.to_json(),
        "ts": domain::now_epoch_ms(),
    })
    .to_string()
}
