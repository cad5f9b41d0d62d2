//! 协议错误类型定义

use domain::ErrorKind;

/// 协议编解码与通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 帧长度不在允许范围内
    #[error("bad length: {len} not in [{min}, {max}]")]
    BadLength { len: usize, min: usize, max: usize },

    /// 校验和不匹配
    #[error("checksum mismatch: expected {expected:04x}, got {actual:04x}")]
    Checksum { expected: u16, actual: u16 },

    /// 帧尾不匹配
    #[error("bad tail")]
    BadTail,

    /// 数据类型与字节序组合不支持，或字节数不匹配
    #[error("bad encoding: {0}")]
    BadEncoding(String),

    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 通道关闭
    #[error("channel closed")]
    ChannelClosed,
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadLength { .. }
            | Self::Checksum { .. }
            | Self::BadTail
            | Self::BadEncoding(_)
            | Self::DataParse(_) => ErrorKind::DecodeError,
            Self::ConfigParse(_) => ErrorKind::BadConfig,
            Self::Connection(_)
            | Self::Io(_)
            | Self::Modbus(_)
            | Self::Timeout(_)
            | Self::ChannelClosed => ErrorKind::TransportFailure,
        }
    }

    /// 是否为单条记录级别的解码错误（不影响驱动状态）。
    pub fn is_decode(&self) -> bool {
        self.kind() == ErrorKind::DecodeError
    }
}
