//! 设备点位模型。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 采集频率下限（毫秒）。
pub const MIN_FREQUENCY_MS: u64 = 50;
/// 采集频率上限（毫秒）。
pub const MAX_FREQUENCY_MS: u64 = 100_000;

/// 点位数值类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Bool,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Int64,
    Uint64,
    Float64,
    Utf8,
    Raw,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Byte => "BYTE",
            Self::Int16 => "INT16",
            Self::Uint16 => "UINT16",
            Self::Int32 => "INT32",
            Self::Uint32 => "UINT32",
            Self::Float32 => "FLOAT32",
            Self::Int64 => "INT64",
            Self::Uint64 => "UINT64",
            Self::Float64 => "FLOAT64",
            Self::Utf8 => "UTF8",
            Self::Raw => "RAW",
        }
    }

    /// 定长类型的字节数；UTF8/RAW 为变长。
    pub fn byte_len(&self) -> Option<usize> {
        match self {
            Self::Bool | Self::Byte => Some(1),
            Self::Int16 | Self::Uint16 => Some(2),
            Self::Int32 | Self::Uint32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Uint64 | Self::Float64 => Some(8),
            Self::Utf8 | Self::Raw => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.trim().to_ascii_uppercase().as_str() {
            "BOOL" => Self::Bool,
            "BYTE" => Self::Byte,
            "INT16" | "SHORT" => Self::Int16,
            "UINT16" | "USHORT" => Self::Uint16,
            "INT32" | "INT" => Self::Int32,
            "UINT32" | "UINT" => Self::Uint32,
            "FLOAT32" | "FLOAT" => Self::Float32,
            "INT64" => Self::Int64,
            "UINT64" => Self::Uint64,
            "FLOAT64" | "DOUBLE" => Self::Float64,
            "UTF8" | "STRING" => Self::Utf8,
            "RAW" => Self::Raw,
            other => return Err(format!("unknown data type: {}", other)),
        };
        Ok(value)
    }
}

/// 字节序。字母序列描述“线上字节”相对大端序 `A..` 的排列。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataOrder {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "AB")]
    Ab,
    #[serde(rename = "BA")]
    Ba,
    #[serde(rename = "ABCD")]
    Abcd,
    #[serde(rename = "BADC")]
    Badc,
    #[serde(rename = "CDAB")]
    Cdab,
    #[serde(rename = "DCBA")]
    Dcba,
    #[serde(rename = "ABCDEFGH")]
    Abcdefgh,
    #[serde(rename = "BADCFEHG")]
    Badcfehg,
    #[serde(rename = "GHEFCDAB")]
    Ghefcdab,
    #[serde(rename = "HGFEDCBA")]
    Hgfedcba,
    #[serde(rename = "BIG_ENDIAN")]
    BigEndian,
    #[serde(rename = "LITTLE_ENDIAN")]
    LittleEndian,
}

impl DataOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Ab => "AB",
            Self::Ba => "BA",
            Self::Abcd => "ABCD",
            Self::Badc => "BADC",
            Self::Cdab => "CDAB",
            Self::Dcba => "DCBA",
            Self::Abcdefgh => "ABCDEFGH",
            Self::Badcfehg => "BADCFEHG",
            Self::Ghefcdab => "GHEFCDAB",
            Self::Hgfedcba => "HGFEDCBA",
            Self::BigEndian => "BIG_ENDIAN",
            Self::LittleEndian => "LITTLE_ENDIAN",
        }
    }
}

impl fmt::Display for DataOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.trim().to_ascii_uppercase().as_str() {
            "A" => Self::A,
            "AB" => Self::Ab,
            "BA" => Self::Ba,
            "ABCD" => Self::Abcd,
            "BADC" => Self::Badc,
            "CDAB" => Self::Cdab,
            "DCBA" => Self::Dcba,
            "ABCDEFGH" => Self::Abcdefgh,
            "BADCFEHG" => Self::Badcfehg,
            "GHEFCDAB" => Self::Ghefcdab,
            "HGFEDCBA" => Self::Hgfedcba,
            "BIG_ENDIAN" | "BE" => Self::BigEndian,
            "LITTLE_ENDIAN" | "LE" => Self::LittleEndian,
            other => return Err(format!("unknown data order: {}", other)),
        };
        Ok(value)
    }
}

/// 点位地址：不同协议的寻址元组。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "camelCase")]
pub enum PointAddress {
    /// Modbus：功能码 / 从站 / 寄存器起始地址 / 寄存器数量
    #[serde(rename_all = "camelCase")]
    Modbus {
        function: u8,
        slave_id: u8,
        register: u16,
        #[serde(default = "default_quantity")]
        quantity: u16,
    },
    /// BACnet：对象类型 / 实例号
    #[serde(rename_all = "camelCase")]
    Bacnet { object_type: String, instance: u32 },
    /// SNMP：OID
    Snmp { oid: String },
    /// Siemens S7：地址字符串（如 `DB1.DBW0`）
    S7 { address: String },
}

fn default_quantity() -> u16 {
    1
}

/// 设备点位。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub uuid: String,
    pub device_uuid: String,
    pub tag: String,
    #[serde(default)]
    pub alias: String,
    pub address: PointAddress,
    pub data_type: DataType,
    pub data_order: DataOrder,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_frequency")]
    pub frequency_ms: u64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_frequency() -> u64 {
    1000
}

impl DataPoint {
    /// 钳制后的采集频率。
    pub fn frequency(&self) -> u64 {
        clamp_frequency(self.frequency_ms)
    }
}

/// 将采集频率钳制到 `[50, 100000]` 毫秒。
pub fn clamp_frequency(frequency_ms: u64) -> u64 {
    frequency_ms.clamp(MIN_FREQUENCY_MS, MAX_FREQUENCY_MS)
}
