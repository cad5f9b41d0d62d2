//! TCP 行客户端
//!
//! 主动连接远端（如 AIS 转发服务器），逐行读取文本；断线后按间隔自动重连，直到取消。

use crate::error::ProtocolError;
use crate::tcp_server::StreamHandler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// TCP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpClientConfig {
    pub host: String,
    pub port: u16,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 读超时（毫秒），超时视为断线
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// 重连间隔（毫秒）
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    60_000
}

fn default_reconnect_interval() -> u64 {
    5000
}

impl TcpClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            reconnect_interval_ms: default_reconnect_interval(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 连接并读取，直到 `cancel` 触发。
pub async fn run_line_client(
    config: TcpClientConfig,
    handler: Arc<dyn StreamHandler>,
    cancel: CancellationToken,
) {
    let addr = config.addr();
    let reconnect = Duration::from_millis(config.reconnect_interval_ms.max(1));
    while !cancel.is_cancelled() {
        match read_session(&config, handler.as_ref(), &cancel).await {
            Ok(()) => info!(target: "edge.protocol", addr = %addr, "tcp client session ended"),
            Err(e) => warn!(target: "edge.protocol", addr = %addr, error = %e, "tcp client session failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect) => {}
        }
    }
    info!(target: "edge.protocol", addr = %addr, "tcp client stopped");
}

async fn read_session(
    config: &TcpClientConfig,
    handler: &dyn StreamHandler,
    cancel: &CancellationToken,
) -> Result<(), ProtocolError> {
    let addr = config.addr();
    let stream = tokio::time::timeout(
        Duration::from_millis(config.connect_timeout_ms.max(1)),
        TcpStream::connect(&addr),
    )
    .await
    .map_err(|_| ProtocolError::Timeout(format!("connect {}", addr)))?
    .map_err(|e| ProtocolError::Connection(format!("{}: {}", addr, e)))?;
    info!(target: "edge.protocol", addr = %addr, "tcp client connected");

    let read_timeout = Duration::from_millis(config.read_timeout_ms.max(1));
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = tokio::time::timeout(read_timeout, reader.read_line(&mut line)) => read,
        };
        let n = read.map_err(|_| ProtocolError::Timeout(format!("read {}", addr)))??;
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if !trimmed.is_empty() {
            handler.on_message(&addr, trimmed.as_bytes().to_vec()).await;
        }
    }
}
