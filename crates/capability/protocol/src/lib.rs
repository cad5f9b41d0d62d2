//! # 协议编解码能力模块
//!
//! 网关接入层用到的纯编解码与传输原语：
//! - **frame**：定长头尾 + 长度 + CRC16 的分帧状态机
//! - **register**：寄存器字节按数据类型与字节序解码/编码
//! - **expression**：自定义字节协议的字段表达式
//! - **ais**：NMEA 0183 句子与 AIS 报文解码
//! - **modbus_client / modbus_slave**：Modbus 主站传输与从站寄存器区
//! - **bacnet**：BACnet/IP Who-Is、I-Am、ReadProperty 报文
//! - **tcp_server / tcp_client**：带取消的 TCP 监听与行客户端
//!
//! ```text
//! 设备/传感器 ──bytes──► FrameParser / NmeaSentence / ModbusTransport
//!                              │
//!                              ▼
//!                     register::decode / Expression
//!                              │
//!                              ▼
//!                  edge-driver（资源）→ 规则引擎
//! ```

pub mod ais;
pub mod bacnet;
mod crc;
mod error;
pub mod expression;
pub mod frame;
pub mod modbus_client;
pub mod modbus_slave;
pub mod register;
mod tcp_client;
mod tcp_server;
mod types;

pub use crc::crc16;
pub use error::ProtocolError;
pub use expression::Expression;
pub use frame::{FrameConfig, FrameParser};
pub use modbus_client::{ModbusClient, ModbusClientConfig, ModbusMode, ModbusTransport};
pub use modbus_slave::{BankWrite, MbapHeader, RegisterBank};
pub use tcp_client::{TcpClientConfig, run_line_client};
pub use tcp_server::{Framing, PeerRegistry, StreamHandler, TcpServer, TcpServerConfig};
pub use types::*;
