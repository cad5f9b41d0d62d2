//! Modbus 主站传输（TCP / RTU）
//!
//! 每次请求都包在超时内；读结果统一为大端字节（寄存器按 BE 展开，线圈每位一个字节）。
//!
//! ## 配置示例
//!
//! ```json
//! { "mode": "TCP", "host": "192.168.1.100", "port": 502, "timeoutMs": 5000 }
//! { "mode": "RTU", "uart": "/dev/ttyUSB0", "baudRate": 9600, "parity": "N", "timeoutMs": 3000 }
//! ```

use crate::error::ProtocolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_modbus::prelude::*;
use tracing::debug;

/// 传输模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModbusMode {
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "RTU")]
    Rtu,
}

/// Modbus 主站传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModbusClientConfig {
    #[serde(default)]
    pub mode: ModbusMode,
    /// TCP 主机地址
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP 端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// RTU 串口路径
    #[serde(default)]
    pub uart: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// `N` / `E` / `O`
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// 单次请求超时（毫秒）
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout() -> u64 {
    3000
}

impl Default for ModbusClientConfig {
    fn default() -> Self {
        Self {
            mode: ModbusMode::Tcp,
            host: default_host(),
            port: default_modbus_port(),
            uart: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_timeout(),
        }
    }
}

/// Modbus 主站传输抽象。
///
/// 同一传输不可并发访问（串口总线只能串行），因此方法取 `&mut self`。
#[async_trait]
pub trait ModbusTransport: Send {
    /// 读功能码 1/2/3/4，返回大端字节。
    async fn read(
        &mut self,
        slave: u8,
        function: u8,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, ProtocolError>;

    async fn write_registers(
        &mut self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), ProtocolError>;

    async fn write_coil(&mut self, slave: u8, address: u16, value: bool) -> Result<(), ProtocolError>;

    /// 释放底层连接。
    async fn close(&mut self);
}

/// 基于 tokio-modbus 的主站传输
pub struct ModbusClient {
    ctx: client::Context,
    timeout: Duration,
}

impl ModbusClient {
    /// 按配置建立 TCP 连接或打开串口。
    pub async fn connect(config: &ModbusClientConfig) -> Result<Self, ProtocolError> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let ctx = match config.mode {
            ModbusMode::Tcp => {
                let target = format!("{}:{}", config.host, config.port);
                let addr = tokio::net::lookup_host(&target)
                    .await?
                    .next()
                    .ok_or_else(|| ProtocolError::ConfigParse(format!("invalid address: {}", target)))?;
                tokio::time::timeout(timeout, tcp::connect(addr))
                    .await
                    .map_err(|_| ProtocolError::Timeout(format!("connect {}", target)))?
                    .map_err(|e| ProtocolError::Connection(e.to_string()))?
            }
            ModbusMode::Rtu => {
                if config.uart.is_empty() {
                    return Err(ProtocolError::ConfigParse("uart is required for RTU".to_string()));
                }
                let builder = tokio_serial::new(&config.uart, config.baud_rate)
                    .data_bits(data_bits(config.data_bits)?)
                    .parity(parity(&config.parity)?)
                    .stop_bits(stop_bits(config.stop_bits)?)
                    .timeout(timeout);
                let port = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| ProtocolError::Connection(e.to_string()))?;
                rtu::attach_slave(port, Slave(1))
            }
        };
        Ok(Self { ctx, timeout })
    }
}

#[async_trait]
impl ModbusTransport for ModbusClient {
    async fn read(
        &mut self,
        slave: u8,
        function: u8,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.ctx.set_slave(Slave(slave));
        let ctx = &mut self.ctx;
        let request = async move {
            let bytes = match function {
                1 => bits_to_bytes(
                    ctx.read_coils(address, quantity)
                        .await
                        .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                        .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?,
                ),
                2 => bits_to_bytes(
                    ctx.read_discrete_inputs(address, quantity)
                        .await
                        .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                        .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?,
                ),
                3 => registers_to_bytes(
                    ctx.read_holding_registers(address, quantity)
                        .await
                        .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                        .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?,
                ),
                4 => registers_to_bytes(
                    ctx.read_input_registers(address, quantity)
                        .await
                        .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                        .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?,
                ),
                other => {
                    return Err(ProtocolError::ConfigParse(format!(
                        "unsupported function code: {}",
                        other
                    )));
                }
            };
            Ok(bytes)
        };
        let bytes = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ProtocolError::Timeout(format!("read slave {} @{}", slave, address)))??;
        debug!(slave, function, address, quantity, bytes = bytes.len(), "read modbus registers");
        Ok(bytes)
    }

    async fn write_registers(
        &mut self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), ProtocolError> {
        self.ctx.set_slave(Slave(slave));
        let request = async {
            if values.len() == 1 {
                self.ctx.write_single_register(address, values[0]).await
            } else {
                self.ctx.write_multiple_registers(address, values).await
            }
        };
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ProtocolError::Timeout(format!("write slave {} @{}", slave, address)))?
            .map_err(|e| ProtocolError::Modbus(e.to_string()))?
            .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
        Ok(())
    }

    async fn write_coil(&mut self, slave: u8, address: u16, value: bool) -> Result<(), ProtocolError> {
        self.ctx.set_slave(Slave(slave));
        tokio::time::timeout(self.timeout, self.ctx.write_single_coil(address, value))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("write coil {} @{}", slave, address)))?
            .map_err(|e| ProtocolError::Modbus(e.to_string()))?
            .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.ctx.disconnect().await;
    }
}

fn bits_to_bytes(bits: Vec<bool>) -> Vec<u8> {
    bits.into_iter().map(u8::from).collect()
}

fn registers_to_bytes(registers: Vec<u16>) -> Vec<u8> {
    registers
        .into_iter()
        .flat_map(|register| register.to_be_bytes())
        .collect()
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits, ProtocolError> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(ProtocolError::ConfigParse(format!("invalid data bits: {}", other))),
    }
}

/// `N` / `E` / `O` → 串口校验位。
pub fn parity(value: &str) -> Result<tokio_serial::Parity, ProtocolError> {
    match value.to_ascii_uppercase().as_str() {
        "N" | "NONE" => Ok(tokio_serial::Parity::None),
        "E" | "EVEN" => Ok(tokio_serial::Parity::Even),
        "O" | "ODD" => Ok(tokio_serial::Parity::Odd),
        other => Err(ProtocolError::ConfigParse(format!("invalid parity: {}", other))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits, ProtocolError> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(ProtocolError::ConfigParse(format!("invalid stop bits: {}", other))),
    }
}

/// 打开一个异步串口（UART 目标等场景复用）。
pub fn open_serial(
    path: &str,
    baud_rate: u32,
    parity_flag: &str,
    timeout: Duration,
) -> Result<tokio_serial::SerialStream, ProtocolError> {
    let builder = tokio_serial::new(path, baud_rate)
        .parity(parity(parity_flag)?)
        .timeout(timeout);
    tokio_serial::SerialStream::open(&builder).map_err(|e| ProtocolError::Connection(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{"mode": "TCP", "host": "192.168.1.100", "port": 1502}"#;
        let config: ModbusClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, ModbusMode::Tcp);
        assert_eq!(config.host, "192.168.1.100");
        assert_eq!(config.port, 1502);
        assert_eq!(config.timeout_ms, 3000);

        let json = r#"{"mode": "RTU", "uart": "/dev/ttyS1", "baudRate": 19200, "parity": "E"}"#;
        let config: ModbusClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, ModbusMode::Rtu);
        assert_eq!(config.baud_rate, 19200);
        assert!(parity(&config.parity).is_ok());
        assert!(parity("X").is_err());
    }

    #[test]
    fn register_bytes_are_big_endian() {
        assert_eq!(registers_to_bytes(vec![0x007B, 0xABCD]), vec![0x00, 0x7B, 0xAB, 0xCD]);
        assert_eq!(bits_to_bytes(vec![true, false]), vec![1, 0]);
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = ModbusClientConfig {
            port,
            timeout_ms: 500,
            ..ModbusClientConfig::default()
        };
        assert!(ModbusClient::connect(&config).await.is_err());
    }
}
