//! 自定义二进制协议源
//!
//! TCP 监听，按 `AF 00 | len | payload | crc | FA 00` 分帧，
//! 再用字段表达式（如 `a:1:I:B;b:2:F:L;`）把 payload 解成 JSON 上报。

use crate::context::{DriverContext, parse_config, protocol_error};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::{Origin, ResourceState};
use edge_protocol::{
    Expression, FrameConfig, Framing, PeerRegistry, ProtocolError, StreamHandler, TcpServer,
    TcpServerConfig,
};
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomProtocolConfig {
    #[serde(flatten)]
    server: TcpServerConfig,
    #[serde(default)]
    frame: FrameConfig,
    expression: String,
}

struct FrameDecoder {
    ctx: DriverContext,
    source: String,
    expression: Expression,
}

#[async_trait]
impl StreamHandler for FrameDecoder {
    async fn on_message(&self, peer: &str, data: Vec<u8>) {
        match self.expression.decode(&data) {
            Ok(fields) => {
                self.ctx.emit(
                    Origin::Source(self.source.clone()),
                    Value::Object(fields).to_string(),
                );
            }
            Err(e) => {
                edge_telemetry::record_decode_error();
                debug!(target: "edge.driver.custom", source = %self.source, peer, error = %e, "payload decode failed");
            }
        }
    }

    async fn on_decode_error(&self, peer: &str, err: ProtocolError) {
        edge_telemetry::record_decode_error();
        debug!(target: "edge.driver.custom", source = %self.source, peer, error = %err, "bad frame dropped");
    }
}

pub struct CustomProtocolSource {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<(CustomProtocolConfig, Expression)>>,
    peers: RwLock<Option<PeerRegistry>>,
    local_addr: RwLock<Option<SocketAddr>>,
    state: StateCell,
    tasks: TaskSlot,
}

impl CustomProtocolSource {
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
impl Resource for CustomProtocolSource {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: CustomProtocolConfig = parse_config(config)?;
        parsed.frame.validate().map_err(protocol_error)?;
        let expression = Expression::parse(&parsed.expression).map_err(protocol_error)?;
        *self.uuid.write().unwrap_or_else(|e| e.into_inner()) = uuid.to_string();
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Some((parsed, expression));
        Ok(())
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), ResourceError> {
        let (config, expression) = self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ResourceError::BadConfig("source is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        let server = match TcpServer::bind(config.server.clone()).await {
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

        let handler = Arc::new(FrameDecoder {
            ctx: self.ctx.clone(),
            source: uuid.clone(),
            expression,
        });
        let token = self.tasks.begin(&cancel);
        self.state.set(ResourceState::Up);
        self.tasks.attach(tokio::spawn(server.run(
            Framing::Frame(config.frame),
            handler,
            token,
        )));
        info!(target: "edge.driver.custom", source = %uuid, addr = %local, "custom protocol listening");
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
        json!({
            "listen": addr.map(|a| a.to_string()),
            "port": addr.map(|a| a.port()),
            "clients": list_peers(&self.peers).len(),
        })
    }
}

pub(crate) fn list_peers(peers: &RwLock<Option<PeerRegistry>>) -> Vec<String> {
    let registry = peers.read().unwrap_or_else(|e| e.into_inner()).clone();
    match registry {
        Some(registry) => registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect(),
        None => Vec::new(),
    }
}
