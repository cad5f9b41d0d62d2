//! BACnet/IP 路由设备
//!
//! 把点位库中的 BACnet analog-input 点位作为本地对象暴露：
//! 应答 Who-Is（I-Am）与 ReadProperty(present-value)，值通过 `setValue` 控制命令更新。

use crate::context::{DriverContext, parse_config};
use crate::device::{point_record, tag_and_value};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::{DataPoint, Origin, PointAddress, PointValueData, ResourceState};
use edge_cache::write_point_value;
use edge_protocol::bacnet::{self, BacnetRequest};
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouterConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    /// 本设备实例号
    device_id: u32,
    #[serde(default = "default_vendor")]
    vendor_id: u8,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    bacnet::BACNET_PORT
}

fn default_vendor() -> u8 {
    15
}

/// 一个 analog-input 对象
#[derive(Debug, Clone)]
struct AnalogObject {
    point: DataPoint,
    value: f32,
}

type ObjectTable = Arc<RwLock<BTreeMap<u32, AnalogObject>>>;

fn is_analog_input(object_type: &str) -> bool {
    let normalized: String = object_type
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    matches!(normalized.as_str(), "ai" | "analoginput")
}

pub struct BacnetRouter {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<RouterConfig>>,
    objects: ObjectTable,
    local_addr: RwLock<Option<SocketAddr>>,
    state: StateCell,
    tasks: TaskSlot,
}

impl BacnetRouter {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            local_addr: RwLock::new(None),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }

    fn set_value(&self, tag: &str, value: &Value) -> Result<f32, ResourceError> {
        let number = value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| ResourceError::BadConfig(format!("value is not numeric: {}", value)))?
            as f32;
        let point = {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            let object = objects
                .values_mut()
                .find(|o| o.point.tag == tag)
                .ok_or_else(|| ResourceError::NotFound(format!("point tag: {}", tag)))?;
            object.value = number;
            object.point.clone()
        };
        let device = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();
        let data = PointValueData::F32(number);
        write_point_value(&self.ctx.cache, &device, &point.uuid, data.to_string());
        self.ctx
            .emit(Origin::Device(device), point_record(&point, &data));
        Ok(number)
    }
}

#[async_trait]
impl Resource for BacnetRouter {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: RouterConfig = parse_config(config)?;
        if parsed.device_id > 0x3F_FFFF {
            return Err(ResourceError::BadConfig(format!(
                "device instance out of range: {}",
                parsed.device_id
            )));
        }
        *self.uuid.write().unwrap_or_else(|e| e.into_inner()) = uuid.to_string();
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Some(parsed);
        Ok(())
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), ResourceError> {
        let config = self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ResourceError::BadConfig("router is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        let points = self
            .ctx
            .points
            .list_points(&uuid)
            .await
            .map_err(|e| ResourceError::Internal(e.to_string()))?;
        {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            let previous = std::mem::take(&mut *objects);
            for point in points {
                let PointAddress::Bacnet {
                    object_type,
                    instance,
                } = &point.address
                else {
                    continue;
                };
                if !is_analog_input(object_type) {
                    debug!(target: "edge.driver.bacnet", tag = %point.tag, object_type = %object_type, "unsupported object type skipped");
                    continue;
                }
                let value = previous.get(instance).map(|o| o.value).unwrap_or(0.0);
                objects.insert(*instance, AnalogObject { point: point.clone(), value });
            }
        }

        let socket = match UdpSocket::bind((config.host.as_str(), config.port)).await {
            Ok(socket) => socket,
            Err(err) => {
                self.state.set(ResourceState::Down);
                self.ctx.fault(&uuid, &err);
                return Err(ResourceError::Transport(format!(
                    "bind {}:{}: {}",
                    config.host, config.port, err
                )));
            }
        };
        let local = socket
            .local_addr()
            .map_err(|e| ResourceError::Transport(e.to_string()))?;
        *self.local_addr.write().unwrap_or_else(|e| e.into_inner()) = Some(local);

        let token = self.tasks.begin(&cancel);
        self.state.set(ResourceState::Up);
        self.tasks.attach(tokio::spawn(serve(
            socket,
            self.objects.clone(),
            config.device_id,
            config.vendor_id,
            token,
        )));
        info!(target: "edge.driver.bacnet", device = %uuid, addr = %local, "bacnet router started");
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        self.tasks.stop().await;
        *self.local_addr.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.set(ResourceState::Stop);
    }

    async fn on_ctrl(&self, cmd: &str, args: &Value) -> Result<Value, ResourceError> {
        match cmd {
            "setValue" => {
                let (tag, value) = tag_and_value(args)?;
                let value = self.set_value(&tag, &value)?;
                Ok(json!({ "tag": tag, "value": value }))
            }
            other => Err(ResourceError::Unsupported(format!("ctrl: {}", other))),
        }
    }

    fn details(&self) -> Value {
        let addr = *self.local_addr.read().unwrap_or_else(|e| e.into_inner());
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner()).len();
        json!({
            "listen": addr.map(|a| a.to_string()),
            "port": addr.map(|a| a.port()),
            "objects": objects,
        })
    }
}

async fn serve(
    socket: UdpSocket,
    objects: ObjectTable,
    device_id: u32,
    vendor_id: u8,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 1500];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, peer) = match received {
            Ok(pair) => pair,
            Err(e) => {
                warn!(target: "edge.driver.bacnet", error = %e, "udp receive failed");
                continue;
            }
        };
        let request = match bacnet::decode_request(&buf[..n]) {
            Ok(request) => request,
            Err(e) => {
                edge_telemetry::record_decode_error();
                debug!(target: "edge.driver.bacnet", peer = %peer, error = %e, "bad datagram");
                continue;
            }
        };
        let reply = match request {
            BacnetRequest::WhoIs { .. } if request.who_is_matches(device_id) => {
                Some(bacnet::encode_i_am(device_id, vendor_id))
            }
            BacnetRequest::ReadProperty {
                invoke_id,
                object_type,
                instance,
                property,
            } => Some(read_property(&objects, invoke_id, object_type, instance, property)),
            _ => None,
        };
        if let Some(reply) = reply
            && let Err(e) = socket.send_to(&reply, peer).await
        {
            warn!(target: "edge.driver.bacnet", peer = %peer, error = %e, "udp send failed");
        }
    }
    info!(target: "edge.driver.bacnet", "bacnet router stopped");
}

fn read_property(
    objects: &ObjectTable,
    invoke_id: u8,
    object_type: u16,
    instance: u32,
    property: u32,
) -> Vec<u8> {
    let value = if object_type == bacnet::OBJECT_ANALOG_INPUT {
        objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&instance)
            .map(|o| o.value)
    } else {
        None
    };
    match value {
        None => bacnet::encode_error(
            invoke_id,
            bacnet::SERVICE_READ_PROPERTY,
            bacnet::ERROR_CLASS_OBJECT,
            bacnet::ERROR_UNKNOWN_OBJECT,
        ),
        Some(_) if property != bacnet::PROPERTY_PRESENT_VALUE => bacnet::encode_error(
            invoke_id,
            bacnet::SERVICE_READ_PROPERTY,
            bacnet::ERROR_CLASS_PROPERTY,
            bacnet::ERROR_UNKNOWN_PROPERTY,
        ),
        Some(value) => {
            bacnet::encode_read_property_ack(invoke_id, object_type, instance, property, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analog_input_aliases() {
        assert!(is_analog_input("analogInput"));
        assert!(is_analog_input("ANALOG_INPUT"));
        assert!(is_analog_input("AI"));
        assert!(!is_analog_input("binaryInput"));
    }
}
