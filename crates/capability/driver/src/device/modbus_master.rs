//! 通用 Modbus 主站
//!
//! 启动时从点位库加载 Modbus 点位并建立连接，之后单任务串行轮询：
//! 每个点位按自身（钳制后的）频率调度，成功写缓存并上报，失败写错误缓存。
//! 连续传输失败达到阈值后设备转为 `DOWN`，交由守护进程重载。

use crate::context::{DriverContext, parse_config, protocol_error};
use crate::device::{json_to_point_value, point_record, tag_and_value};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::{DataPoint, Origin, PointAddress, ResourceState};
use edge_cache::{clear_fault, write_point_error, write_point_value};
use edge_protocol::{ModbusClient, ModbusClientConfig, ModbusTransport, ProtocolError, register};
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SharedTransport = Arc<AsyncMutex<Box<dyn ModbusTransport>>>;

/// 建立 Modbus 传输的工厂，测试中可替换为内存实现。
#[async_trait]
pub trait ModbusConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ModbusClientConfig,
    ) -> Result<Box<dyn ModbusTransport>, ProtocolError>;
}

/// 基于 tokio-modbus 的连接器
pub struct TokioModbusConnector;

#[async_trait]
impl ModbusConnector for TokioModbusConnector {
    async fn connect(
        &self,
        config: &ModbusClientConfig,
    ) -> Result<Box<dyn ModbusTransport>, ProtocolError> {
        let client = ModbusClient::connect(config).await?;
        Ok(Box::new(client))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterConfig {
    #[serde(flatten)]
    transport: ModbusClientConfig,
    /// 覆盖全局的连续失败阈值
    #[serde(default)]
    max_failures: Option<u32>,
}

pub struct ModbusMaster {
    ctx: DriverContext,
    connector: Arc<dyn ModbusConnector>,
    uuid: RwLock<String>,
    config: RwLock<Option<MasterConfig>>,
    points: RwLock<Vec<DataPoint>>,
    transport: RwLock<Option<SharedTransport>>,
    state: Arc<StateCell>,
    tasks: TaskSlot,
}

impl ModbusMaster {
    pub fn new(ctx: DriverContext) -> Self {
        Self::with_connector(ctx, Arc::new(TokioModbusConnector))
    }

    pub fn with_connector(ctx: DriverContext, connector: Arc<dyn ModbusConnector>) -> Self {
        Self {
            ctx,
            connector,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            points: RwLock::new(Vec::new()),
            transport: RwLock::new(None),
            state: Arc::new(StateCell::default()),
            tasks: TaskSlot::default(),
        }
    }

    fn uuid(&self) -> String {
        self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn current_transport(&self) -> Result<SharedTransport, ResourceError> {
        self.transport
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ResourceError::Transport("device is not connected".to_string()))
    }

    async fn release_transport(&self) {
        let transport = self.transport.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(transport) = transport {
            transport.lock().await.close().await;
        }
    }

    async fn write_point(&self, tag: &str, value: &Value) -> Result<(), ResourceError> {
        let point = self
            .points
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.tag == tag)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(format!("point tag: {}", tag)))?;
        let PointAddress::Modbus {
            function,
            slave_id,
            register: address,
            ..
        } = point.address
        else {
            return Err(ResourceError::BadConfig(format!("point {} is not a modbus point", tag)));
        };

        let value = json_to_point_value(value)?;
        let transport = self.current_transport()?;
        let mut transport = transport.lock().await;
        match function {
            1 => {
                let on = value.as_f64().map(|v| v != 0.0).unwrap_or(false);
                transport
                    .write_coil(slave_id, address, on)
                    .await
                    .map_err(protocol_error)?;
            }
            3 => {
                let bytes = register::encode(point.data_type, point.data_order, &value)
                    .map_err(protocol_error)?;
                let registers: Vec<u16> = bytes
                    .chunks(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
                    .collect();
                transport
                    .write_registers(slave_id, address, &registers)
                    .await
                    .map_err(protocol_error)?;
            }
            other => {
                return Err(ResourceError::Unsupported(format!(
                    "function {} is read-only",
                    other
                )));
            }
        }
        info!(target: "edge.driver.modbus", device = %point.device_uuid, tag, "point written");
        Ok(())
    }
}

#[async_trait]
impl Resource for ModbusMaster {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: MasterConfig = parse_config(config)?;
        if parsed.max_failures == Some(0) {
            return Err(ResourceError::BadConfig("maxFailures must be positive".to_string()));
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
            .ok_or_else(|| ResourceError::BadConfig("device is not initialized".to_string()))?;
        let uuid = self.uuid();

        let points: Vec<DataPoint> = self
            .ctx
            .points
            .list_points(&uuid)
            .await
            .map_err(|e| ResourceError::Internal(e.to_string()))?
            .into_iter()
            .filter(|p| matches!(p.address, PointAddress::Modbus { .. }))
            .collect();

        self.release_transport().await;
        let transport: SharedTransport = match self.connector.connect(&config.transport).await {
            Ok(transport) => Arc::new(AsyncMutex::new(transport)),
            Err(err) => {
                self.state.set(ResourceState::Down);
                self.ctx.fault(&uuid, &err);
                warn!(target: "edge.driver.modbus", device = %uuid, error = %err, "modbus connect failed");
                return Err(protocol_error(err));
            }
        };
        *self.transport.write().unwrap_or_else(|e| e.into_inner()) = Some(transport.clone());
        *self.points.write().unwrap_or_else(|e| e.into_inner()) = points.clone();

        let token = self.tasks.begin(&cancel);
        let poller = Poller {
            ctx: self.ctx.clone(),
            device: uuid.clone(),
            points,
            transport,
            state: self.state.clone(),
            max_failures: config
                .max_failures
                .unwrap_or(self.ctx.settings.device_max_failures)
                .max(1),
        };
        clear_fault(&self.ctx.cache, &uuid);
        self.state.set(ResourceState::Up);
        self.tasks.attach(tokio::spawn(poller.run(token)));
        info!(target: "edge.driver.modbus", device = %uuid, "modbus master started");
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        self.tasks.stop().await;
        self.release_transport().await;
        self.state.set(ResourceState::Stop);
    }

    async fn on_read(&self, cmd: &str) -> Result<Vec<u8>, ResourceError> {
        match cmd {
            "points" => {
                let points = self.points.read().unwrap_or_else(|e| e.into_inner()).clone();
                serde_json::to_vec(&points).map_err(|e| ResourceError::Internal(e.to_string()))
            }
            other => Err(ResourceError::Unsupported(format!("read: {}", other))),
        }
    }

    async fn on_ctrl(&self, cmd: &str, args: &Value) -> Result<Value, ResourceError> {
        match cmd {
            "write" => {
                let (tag, value) = tag_and_value(args)?;
                self.write_point(&tag, &value).await?;
                Ok(json!({ "tag": tag }))
            }
            other => Err(ResourceError::Unsupported(format!("ctrl: {}", other))),
        }
    }

    fn details(&self) -> Value {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        let points = self.points.read().unwrap_or_else(|e| e.into_inner()).len();
        match config {
            Some(config) => json!({
                "mode": config.transport.mode,
                "host": config.transport.host,
                "port": config.transport.port,
                "uart": config.transport.uart,
                "points": points,
            }),
            None => json!({}),
        }
    }
}

enum PollError {
    Transport(ProtocolError),
    Decode,
}

struct Poller {
    ctx: DriverContext,
    device: String,
    points: Vec<DataPoint>,
    transport: SharedTransport,
    state: Arc<StateCell>,
    max_failures: u32,
}

impl Poller {
    async fn run(self, cancel: CancellationToken) {
        if self.points.is_empty() {
            debug!(target: "edge.driver.modbus", device = %self.device, "no modbus points loaded");
            cancel.cancelled().await;
            return;
        }

        let mut next_due = vec![Instant::now(); self.points.len()];
        let mut failures = 0u32;
        loop {
            let Some((index, due)) = next_due
                .iter()
                .copied()
                .enumerate()
                .min_by_key(|(_, due)| *due)
            else {
                break;
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(due) => {}
            }

            let point = &self.points[index];
            next_due[index] = Instant::now() + Duration::from_millis(point.frequency());
            match self.poll(point).await {
                Ok(()) => failures = 0,
                Err(PollError::Decode) => {}
                Err(PollError::Transport(err)) => {
                    failures += 1;
                    if failures >= self.max_failures {
                        warn!(
                            target: "edge.driver.modbus",
                            device = %self.device,
                            failures,
                            error = %err,
                            "too many consecutive failures, device down"
                        );
                        self.ctx.fault(&self.device, &err);
                        self.state.set(ResourceState::Down);
                        break;
                    }
                }
            }
        }
    }

    async fn poll(&self, point: &DataPoint) -> Result<(), PollError> {
        let PointAddress::Modbus {
            function,
            slave_id,
            register: address,
            quantity,
        } = point.address
        else {
            return Ok(());
        };

        let read = {
            let mut transport = self.transport.lock().await;
            transport.read(slave_id, function, address, quantity).await
        };
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(err) => {
                edge_telemetry::record_poll_error();
                debug!(target: "edge.driver.modbus", device = %self.device, tag = %point.tag, error = %err, "poll failed");
                write_point_error(&self.ctx.cache, &self.device, &point.uuid, err.to_string());
                return Err(PollError::Transport(err));
            }
        };

        match register::decode(point.data_type, point.data_order, point.weight, &bytes) {
            Ok(value) => {
                write_point_value(&self.ctx.cache, &self.device, &point.uuid, value.to_string());
                self.ctx
                    .emit(Origin::Device(self.device.clone()), point_record(point, &value));
                Ok(())
            }
            Err(err) => {
                edge_telemetry::record_decode_error();
                debug!(target: "edge.driver.modbus", device = %self.device, tag = %point.tag, error = %err, "decode failed");
                write_point_error(&self.ctx.cache, &self.device, &point.uuid, err.to_string());
                Err(PollError::Decode)
            }
        }
    }
}
