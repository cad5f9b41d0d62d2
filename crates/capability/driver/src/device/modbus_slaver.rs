//! 通用 Modbus TCP 从站
//!
//! 对外暴露一块寄存器区；主站每次写入都同步到点位缓存
//! （key 形如 `<device>_HoldingRegisters:<n>`，值为寄存器大端十六进制），并上报规则引擎。

use crate::context::{DriverContext, parse_config};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::{Origin, ResourceState};
use edge_cache::write_point_value;
use edge_protocol::modbus_slave::{encode_mbap, read_mbap_frame};
use edge_protocol::{BankWrite, RegisterArea, RegisterBank};
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlaverConfig {
    #[serde(default = "default_host")]
    host: String,
    port: u16,
    #[serde(default = "default_slave_id")]
    slave_id: u8,
    /// 每个寄存器区的大小
    #[serde(default = "default_capacity")]
    capacity: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_slave_id() -> u8 {
    1
}

fn default_capacity() -> usize {
    64
}

/// 连接任务共享的状态
struct SlaveShared {
    ctx: DriverContext,
    device: String,
    slave_id: u8,
    bank: Mutex<RegisterBank>,
    clients: RwLock<BTreeSet<String>>,
}

impl SlaveShared {
    /// 寄存器变化 → 缓存 + 上报
    fn publish_write(&self, write: &BankWrite) {
        for (offset, value) in write.values.iter().enumerate() {
            let address = write.address.wrapping_add(offset as u16);
            let key = write.area.cache_key(&self.device, address);
            let hex_value = hex::encode(value.to_be_bytes());
            write_point_value(&self.ctx.cache, &self.device, &key, hex_value.clone());
            let record = json!({
                "register": address,
                "area": write.area.as_str(),
                "slaverId": self.slave_id,
                "value": hex_value,
            });
            self.ctx
                .emit(Origin::Device(self.device.clone()), record.to_string());
        }
    }
}

pub struct ModbusSlaver {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<SlaverConfig>>,
    shared: RwLock<Option<Arc<SlaveShared>>>,
    local_addr: RwLock<Option<SocketAddr>>,
    state: StateCell,
    tasks: TaskSlot,
}

impl ModbusSlaver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            shared: RwLock::new(None),
            local_addr: RwLock::new(None),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }

    fn shared(&self) -> Result<Arc<SlaveShared>, ResourceError> {
        self.shared
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ResourceError::Transport("slaver is not running".to_string()))
    }
}

#[async_trait]
impl Resource for ModbusSlaver {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: SlaverConfig = parse_config(config)?;
        if parsed.capacity == 0 || parsed.capacity > u16::MAX as usize {
            return Err(ResourceError::BadConfig(format!(
                "invalid register capacity: {}",
                parsed.capacity
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
            .ok_or_else(|| ResourceError::BadConfig("slaver is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        let listener = match TcpListener::bind((config.host.as_str(), config.port)).await {
            Ok(listener) => listener,
            Err(err) => {
                self.state.set(ResourceState::Down);
                self.ctx.fault(&uuid, &err);
                return Err(ResourceError::Transport(format!(
                    "bind {}:{}: {}",
                    config.host, config.port, err
                )));
            }
        };
        let local = listener
            .local_addr()
            .map_err(|e| ResourceError::Transport(e.to_string()))?;

        // 重启时保留已有寄存器内容
        let previous = self.shared.read().unwrap_or_else(|e| e.into_inner()).clone();
        let bank = match previous {
            Some(shared) => shared.bank.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            None => RegisterBank::new(config.capacity),
        };
        let shared = Arc::new(SlaveShared {
            ctx: self.ctx.clone(),
            device: uuid.clone(),
            slave_id: config.slave_id,
            bank: Mutex::new(bank),
            clients: RwLock::new(BTreeSet::new()),
        });
        *self.shared.write().unwrap_or_else(|e| e.into_inner()) = Some(shared.clone());
        *self.local_addr.write().unwrap_or_else(|e| e.into_inner()) = Some(local);

        let token = self.tasks.begin(&cancel);
        self.state.set(ResourceState::Up);
        self.tasks.attach(tokio::spawn(accept_loop(listener, shared, token)));
        info!(target: "edge.driver.modbus", device = %uuid, addr = %local, "modbus slaver listening");
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
            "listClients" => {
                let shared = self.shared()?;
                let clients: Vec<String> = shared
                    .clients
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .iter()
                    .cloned()
                    .collect();
                Ok(json!(clients))
            }
            "write" => {
                let shared = self.shared()?;
                let write = bank_write_from_args(args)?;
                {
                    let mut bank = shared.bank.lock().unwrap_or_else(|e| e.into_inner());
                    let result = match write.area {
                        RegisterArea::Coils | RegisterArea::DiscreteInputs => {
                            let bits: Vec<bool> = write.values.iter().map(|v| *v != 0).collect();
                            bank.write_bits(write.area, write.address, &bits)
                        }
                        _ => bank.write_registers(write.area, write.address, &write.values),
                    };
                    result.map_err(|e| {
                        ResourceError::BadConfig(format!("register write rejected: {:?}", e))
                    })?;
                }
                shared.publish_write(&write);
                Ok(json!({ "written": write.values.len() }))
            }
            other => Err(ResourceError::Unsupported(format!("ctrl: {}", other))),
        }
    }

    fn details(&self) -> Value {
        let addr = *self.local_addr.read().unwrap_or_else(|e| e.into_inner());
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        json!({
            "listen": addr.map(|a| a.to_string()),
            "port": addr.map(|a| a.port()),
            "slaverId": config.map(|c| c.slave_id),
        })
    }
}

fn bank_write_from_args(args: &Value) -> Result<BankWrite, ResourceError> {
    let area = match args.get("area").and_then(Value::as_str).unwrap_or("HoldingRegisters") {
        "Coils" => RegisterArea::Coils,
        "DiscreteInputs" => RegisterArea::DiscreteInputs,
        "HoldingRegisters" => RegisterArea::HoldingRegisters,
        "InputRegisters" => RegisterArea::InputRegisters,
        other => return Err(ResourceError::BadConfig(format!("unknown area: {}", other))),
    };
    let address = args
        .get("address")
        .and_then(Value::as_u64)
        .and_then(|a| u16::try_from(a).ok())
        .ok_or_else(|| ResourceError::BadConfig("address is required".to_string()))?;
    let values = args
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| ResourceError::BadConfig("values is required".to_string()))?
        .iter()
        .map(|v| v.as_u64().and_then(|v| u16::try_from(v).ok()))
        .collect::<Option<Vec<u16>>>()
        .ok_or_else(|| ResourceError::BadConfig("values must be u16".to_string()))?;
    if values.is_empty() {
        return Err(ResourceError::BadConfig("values is empty".to_string()));
    }
    Ok(BankWrite {
        area,
        address,
        values,
    })
}

async fn accept_loop(listener: TcpListener, shared: Arc<SlaveShared>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(target: "edge.driver.modbus", error = %e, "accept failed");
                continue;
            }
        };
        let peer = addr.to_string();
        shared
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer.clone());
        let shared = shared.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, &shared, &cancel).await {
                debug!(target: "edge.driver.modbus", peer = %peer, error = %e, "slave connection closed");
            }
            shared
                .clients
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&peer);
        });
    }
}

async fn serve(
    mut stream: TcpStream,
    shared: &SlaveShared,
    cancel: &CancellationToken,
) -> Result<(), edge_protocol::ProtocolError> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_mbap_frame(&mut stream) => frame?,
        };
        let Some((header, pdu)) = frame else {
            return Ok(());
        };
        if header.unit_id != shared.slave_id && header.unit_id != 0 {
            debug!(target: "edge.driver.modbus", unit = header.unit_id, "request for other unit ignored");
            continue;
        }
        let (response, write) = shared
            .bank
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handle_pdu(&pdu);
        stream.write_all(&encode_mbap(&header, &response)).await?;
        if let Some(write) = write {
            shared.publish_write(&write);
        }
    }
}
