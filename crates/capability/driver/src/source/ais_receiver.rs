//! AIS / NMEA 接收源
//!
//! `SERVER` 模式监听 TCP，`CLIENT` 模式主动连接转发服务器（断线重连）。
//! 只放行前缀白名单内的语句；`parseAis=false` 时原样上报，否则解码后上报。

use crate::context::{DriverContext, parse_config, protocol_error};
use crate::source::custom_protocol::list_peers;
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::{Origin, ResourceState};
use edge_protocol::ais::{self, AisAssembler, NmeaSentence};
use edge_protocol::{
    Framing, PeerRegistry, ProtocolError, StreamHandler, TcpClientConfig, TcpServer,
    TcpServerConfig, run_line_client,
};
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
enum AisMode {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AisConfig {
    #[serde(default)]
    mode: AisMode,
    #[serde(default = "default_host")]
    host: String,
    port: u16,
    /// 网关序列号，随原始报文一起上报
    #[serde(default)]
    gwsn: String,
    #[serde(default)]
    parse_ais: bool,
    #[serde(default = "default_prefixes")]
    allow_prefixes: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_prefixes() -> Vec<String> {
    ["!AIVDM", "!AIVDO", "$GNGNS", "$GNRMC"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

struct SentenceHandler {
    ctx: DriverContext,
    source: String,
    config: AisConfig,
    assembler: Mutex<AisAssembler>,
}

impl SentenceHandler {
    fn decode(&self, line: &str) -> Result<Option<Value>, ProtocolError> {
        let sentence = NmeaSentence::parse(line)?;
        match sentence.kind() {
            "VDM" | "VDO" => self
                .assembler
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(&sentence),
            _ => ais::decode_position_sentence(&sentence).map(Some),
        }
    }
}

#[async_trait]
impl StreamHandler for SentenceHandler {
    async fn on_message(&self, peer: &str, data: Vec<u8>) {
        let text = String::from_utf8_lossy(&data);
        let line = text.trim();
        if line.is_empty() || !ais::allowed(line, &self.config.allow_prefixes) {
            return;
        }
        if !self.config.parse_ais {
            let record = json!({ "gwsn": self.config.gwsn, "ais_data": line });
            self.ctx
                .emit(Origin::Source(self.source.clone()), record.to_string());
            return;
        }
        match self.decode(line) {
            Ok(Some(mut message)) => {
                if let Value::Object(fields) = &mut message {
                    fields.insert("gwsn".to_string(), Value::String(self.config.gwsn.clone()));
                }
                self.ctx
                    .emit(Origin::Source(self.source.clone()), message.to_string());
            }
            // 多段报文尚未收齐
            Ok(None) => {}
            Err(e) => {
                edge_telemetry::record_decode_error();
                debug!(target: "edge.driver.ais", source = %self.source, peer, error = %e, "sentence dropped");
            }
        }
    }
}

pub struct AisReceiver {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<AisConfig>>,
    peers: RwLock<Option<PeerRegistry>>,
    local_addr: RwLock<Option<SocketAddr>>,
    state: StateCell,
    tasks: TaskSlot,
}

impl AisReceiver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            peers: RwLock::new(None),
            local_addr: RwLock::new(None),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }
}

#[async_trait]
impl Resource for AisReceiver {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: AisConfig = parse_config(config)?;
        if parsed.mode == AisMode::Client && parsed.host.is_empty() {
            return Err(ResourceError::BadConfig("host is required in CLIENT mode".to_string()));
        }
        if parsed.allow_prefixes.is_empty() {
            return Err(ResourceError::BadConfig("allowPrefixes is empty".to_string()));
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
            .ok_or_else(|| ResourceError::BadConfig("source is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();
        let handler = Arc::new(SentenceHandler {
            ctx: self.ctx.clone(),
            source: uuid.clone(),
            config: config.clone(),
            assembler: Mutex::new(AisAssembler::new()),
        });

        match config.mode {
            AisMode::Server => {
                let server =
                    match TcpServer::bind(TcpServerConfig::new(config.host.clone(), config.port)).await {
                        Ok(server) => server,
                        Err(err) => {
                            self.state.set(ResourceState::Down);
                            self.ctx.fault(&uuid, &err);
                            return Err(protocol_error(err));
                        }
                    };
                let local = server.local_addr().map_err(protocol_error)?;
                *self.peers.write().unwrap_or_else(|e| e.into_inner()) = Some(server.peers());
                *self.local_addr.write().unwrap_or_else(|e| e.into_inner()) = Some(local);
                let token = self.tasks.begin(&cancel);
                self.tasks
                    .attach(tokio::spawn(server.run(Framing::Line, handler, token)));
                info!(target: "edge.driver.ais", source = %uuid, addr = %local, "ais receiver listening");
            }
            AisMode::Client => {
                let mut client = TcpClientConfig::new(config.host.clone(), config.port);
                client.connect_timeout_ms = self.ctx.settings.tcp_timeout.as_millis() as u64;
                let token = self.tasks.begin(&cancel);
                self.tasks
                    .attach(tokio::spawn(run_line_client(client, handler, token)));
                info!(target: "edge.driver.ais", source = %uuid, host = %config.host, port = config.port, "ais receiver connecting");
            }
        }
        self.state.set(ResourceState::Up);
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

    async fn on_ctrl(&self, cmd: &str, _args: &Value) -> Result<Value, ResourceError> {
        match cmd {
            "listClients" => Ok(json!(list_peers(&self.peers))),
            other => Err(ResourceError::Unsupported(format!("ctrl: {}", other))),
        }
    }

    fn details(&self) -> Value {
        let addr = *self.local_addr.read().unwrap_or_else(|e| e.into_inner());
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        json!({
            "mode": config.as_ref().map(|c| if c.mode == AisMode::Server { "SERVER" } else { "CLIENT" }),
            "listen": addr.map(|a| a.to_string()),
            "port": addr.map(|a| a.port()),
            "parseAis": config.map(|c| c.parse_ais),
        })
    }
}
