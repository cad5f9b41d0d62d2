//! 串口输出目标

use crate::context::{DriverContext, parse_config, protocol_error};
use crate::target::{Outbox, default_queue_size, with_stats};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::ResourceState;
use edge_protocol::modbus_client::open_serial;
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UartConfig {
    uart: String,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    #[serde(default = "default_parity")]
    parity: String,
    /// payload 为十六进制文本时按字节写出
    #[serde(default)]
    hex: bool,
    #[serde(default = "default_queue_size")]
    queue_size: usize,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_parity() -> String {
    "N".to_string()
}

pub struct UartTarget {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<UartConfig>>,
    outbox: Outbox,
    state: StateCell,
    tasks: TaskSlot,
}

impl UartTarget {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            outbox: Outbox::default(),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }
}

#[async_trait]
impl Resource for UartTarget {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: UartConfig = parse_config(config)?;
        if parsed.uart.is_empty() {
            return Err(ResourceError::BadConfig("uart is required".to_string()));
        }
        edge_protocol::modbus_client::parity(&parsed.parity).map_err(protocol_error)?;
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
            .ok_or_else(|| ResourceError::BadConfig("target is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        let mut port = match open_serial(
            &config.uart,
            config.baud_rate,
            &config.parity,
            self.ctx.settings.serial_timeout,
        ) {
            Ok(port) => port,
            Err(err) => {
                self.state.set(ResourceState::Down);
                self.ctx.fault(&uuid, &err);
                return Err(protocol_error(err));
            }
        };

        let mut queue = self.outbox.open(config.queue_size);
        let token = self.tasks.begin(&cancel);
        let target = uuid.clone();
        let hex_mode = config.hex;
        self.tasks.attach(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = token.cancelled() => break,
                    payload = queue.recv() => payload,
                };
                let Some(payload) = payload else {
                    break;
                };
                let bytes = if hex_mode {
                    match hex::decode(payload.trim()) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            warn!(target: "edge.driver.uart", target_uuid = %target, "bad hex payload: {}", err);
                            continue;
                        }
                    }
                } else {
                    payload.into_bytes()
                };
                if let Err(err) = port.write_all(&bytes).await {
                    warn!(target: "edge.driver.uart", target_uuid = %target, "uart write error: {}", err);
                }
            }
        }));
        self.state.set(ResourceState::Up);
        info!(target: "edge.driver.uart", target_uuid = %uuid, uart = %config.uart, "uart target started");
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        self.outbox.close();
        self.tasks.stop().await;
        self.state.set(ResourceState::Stop);
    }

    fn details(&self) -> Value {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        let details = match config {
            Some(c) => json!({ "uart": c.uart, "baudRate": c.baud_rate }),
            None => json!({}),
        };
        with_stats(details, &self.outbox)
    }

    fn to(&self, payload: String) -> Result<(), ResourceError> {
        self.outbox.submit(payload)
    }
}
