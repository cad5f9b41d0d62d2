use domain::{INGRESS_TOPIC, InboundRecord, Origin};
use edge_bus::{EventBroker, MessageQueue};
use edge_cache::{PointCache, record_fault};
use edge_protocol::ProtocolError;
use edge_resource::ResourceError;
use edge_storage::PointStore;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 驱动共用的超时与故障阈值
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    /// 连续失败多少次后设备转为 `DOWN`
    pub device_max_failures: u32,
    pub serial_timeout: Duration,
    pub tcp_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            device_max_failures: 3,
            serial_timeout: Duration::from_millis(3000),
            tcp_timeout: Duration::from_millis(5000),
        }
    }
}

/// 驱动运行所需的进程级依赖
#[derive(Clone)]
pub struct DriverContext {
    pub cache: Arc<PointCache>,
    pub ingress: Arc<MessageQueue<InboundRecord>>,
    pub broker: Arc<EventBroker>,
    pub points: Arc<dyn PointStore>,
    pub settings: DriverSettings,
}

impl DriverContext {
    /// 写入规则引擎入口队列；队列满时丢弃并计数。
    pub fn emit(&self, origin: Origin, payload: impl Into<String>) -> bool {
        let uuid = origin.uuid().to_string();
        match self.ingress.publish(INGRESS_TOPIC, InboundRecord::new(origin, payload)) {
            Ok(()) => {
                edge_telemetry::record_ingress_published();
                true
            }
            Err(e) => {
                edge_telemetry::record_ingress_dropped();
                warn!(target: "edge.driver", uuid = %uuid, error = %e, "ingress record dropped");
                false
            }
        }
    }

    /// 记录资源故障，守护进程重载时随事件发布。
    pub fn fault(&self, uuid: &str, err: impl std::fmt::Display) {
        record_fault(&self.cache, uuid, err.to_string());
    }
}

pub(crate) fn parse_config<T: DeserializeOwned>(config: &serde_json::Value) -> Result<T, ResourceError> {
    serde_json::from_value(config.clone()).map_err(ResourceError::bad_config)
}

pub(crate) fn protocol_error(err: ProtocolError) -> ResourceError {
    match err.kind() {
        domain::ErrorKind::DecodeError => ResourceError::Decode(err.to_string()),
        domain::ErrorKind::BadConfig => ResourceError::BadConfig(err.to_string()),
        _ => ResourceError::Transport(err.to_string()),
    }
}
