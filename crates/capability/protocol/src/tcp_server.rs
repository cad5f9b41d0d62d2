//! TCP 监听器
//!
//! 接受多个客户端连接，按分帧模式把字节流切成帧或行交给 [`StreamHandler`]。
//!
//! ## 配置示例
//! ```json
//! { "host": "0.0.0.0", "port": 6005, "maxConnections": 64, "idleTimeoutMs": 300000 }
//! ```

use crate::error::ProtocolError;
use crate::frame::{FrameConfig, FrameParser};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// TCP 监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpServerConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    pub port: u16,
    /// 最大并发连接数，超出的连接直接关闭
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// 连接空闲超时（毫秒），超时未收到数据则断开
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    64
}

fn default_idle_timeout() -> u64 {
    300_000
}

impl TcpServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout(),
        }
    }

    pub fn from_json(config: &serde_json::Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(config.clone()).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }
}

/// 字节流切分方式
#[derive(Debug, Clone)]
pub enum Framing {
    /// 定长头尾 + 长度 + CRC 的二进制帧
    Frame(FrameConfig),
    /// 以 `\n` 结尾的文本行（去掉行尾 `\r\n`）
    Line,
}

/// 连接数据回调
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// 一帧 payload 或一行文本
    async fn on_message(&self, peer: &str, data: Vec<u8>);

    /// 帧解码失败（已丢弃坏数据）
    async fn on_decode_error(&self, peer: &str, error: ProtocolError) {
        debug!(target: "edge.protocol", peer, error = %error, "frame decode error");
    }
}

/// 当前已连接的客户端地址集合
pub type PeerRegistry = Arc<RwLock<BTreeSet<String>>>;

/// 已绑定的 TCP 监听器
pub struct TcpServer {
    listener: TcpListener,
    config: TcpServerConfig,
    peers: PeerRegistry,
}

impl TcpServer {
    pub async fn bind(config: TcpServerConfig) -> Result<Self, ProtocolError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProtocolError::Connection(format!("bind {}: {}", addr, e)))?;
        info!(target: "edge.protocol", addr = %addr, "tcp server listening");
        Ok(Self {
            listener,
            config,
            peers: Arc::new(RwLock::new(BTreeSet::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn peers(&self) -> PeerRegistry {
        Arc::clone(&self.peers)
    }

    /// 接受连接直到 `cancel` 触发；每个连接一个任务。
    pub async fn run(self, framing: Framing, handler: Arc<dyn StreamHandler>, cancel: CancellationToken) {
        let idle = Duration::from_millis(self.config.idle_timeout_ms.max(1));
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(target: "edge.protocol", error = %e, "accept failed");
                    continue;
                }
            };
            let peer = addr.to_string();
            {
                let Ok(mut peers) = self.peers.write() else {
                    break;
                };
                if peers.len() >= self.config.max_connections {
                    warn!(target: "edge.protocol", peer = %peer, "too many connections, rejected");
                    continue;
                }
                peers.insert(peer.clone());
            }
            info!(target: "edge.protocol", peer = %peer, "client connected");

            let peers = Arc::clone(&self.peers);
            let handler = Arc::clone(&handler);
            let framing = framing.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let result = match framing {
                    Framing::Frame(config) => {
                        serve_frames(stream, &peer, config, handler.as_ref(), idle, &cancel).await
                    }
                    Framing::Line => serve_lines(stream, &peer, handler.as_ref(), idle, &cancel).await,
                };
                if let Err(e) = result {
                    debug!(target: "edge.protocol", peer = %peer, error = %e, "connection closed with error");
                }
                if let Ok(mut peers) = peers.write() {
                    peers.remove(&peer);
                }
                info!(target: "edge.protocol", peer = %peer, "client disconnected");
            });
        }
        info!(target: "edge.protocol", "tcp server stopped");
    }
}

async fn serve_frames(
    mut stream: TcpStream,
    peer: &str,
    config: FrameConfig,
    handler: &dyn StreamHandler,
    idle: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProtocolError> {
    let mut parser = FrameParser::new(config);
    let mut buf = vec![0u8; 4096];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = tokio::time::timeout(idle, stream.read(&mut buf)) => read,
        };
        let n = read.map_err(|_| ProtocolError::Timeout(format!("idle {}", peer)))??;
        if n == 0 {
            return Ok(());
        }
        let mut chunk = &buf[..n];
        loop {
            match parser.parse(chunk) {
                Ok(Some(payload)) => handler.on_message(peer, payload).await,
                Ok(None) => break,
                Err(e) => handler.on_decode_error(peer, e).await,
            }
            chunk = &[];
        }
    }
}

async fn serve_lines(
    stream: TcpStream,
    peer: &str,
    handler: &dyn StreamHandler,
    idle: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProtocolError> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = tokio::time::timeout(idle, reader.read_line(&mut line)) => read,
        };
        let n = read.map_err(|_| ProtocolError::Timeout(format!("idle {}", peer)))??;
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }
        handler.on_message(peer, trimmed.as_bytes().to_vec()).await;
    }
}
