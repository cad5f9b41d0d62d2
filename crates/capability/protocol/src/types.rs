//! Modbus 相关类型定义

use serde::{Deserialize, Serialize};

/// Modbus 功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModbusFunctionCode {
    /// 读线圈状态 (0x01)
    ReadCoils = 1,
    /// 读离散输入 (0x02)
    ReadDiscreteInputs = 2,
    /// 读保持寄存器 (0x03)
    ReadHoldingRegisters = 3,
    /// 读输入寄存器 (0x04)
    ReadInputRegisters = 4,
    /// 写单个线圈 (0x05)
    WriteSingleCoil = 5,
    /// 写单个寄存器 (0x06)
    WriteSingleRegister = 6,
    /// 写多个线圈 (0x0F)
    WriteMultipleCoils = 15,
    /// 写多个寄存器 (0x10)
    WriteMultipleRegisters = 16,
}

impl ModbusFunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        let value = match code {
            1 => Self::ReadCoils,
            2 => Self::ReadDiscreteInputs,
            3 => Self::ReadHoldingRegisters,
            4 => Self::ReadInputRegisters,
            5 => Self::WriteSingleCoil,
            6 => Self::WriteSingleRegister,
            15 => Self::WriteMultipleCoils,
            16 => Self::WriteMultipleRegisters,
            _ => return None,
        };
        Some(value)
    }

    pub fn is_read(&self) -> bool {
        (*self as u8) <= 4
    }
}

/// 从站寄存器区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterArea {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl RegisterArea {
    /// 缓存键后缀：`<device>_<Area>:<n>`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coils => "Coils",
            Self::DiscreteInputs => "DiscreteInputs",
            Self::HoldingRegisters => "HoldingRegisters",
            Self::InputRegisters => "InputRegisters",
        }
    }

    pub fn cache_key(&self, device_uuid: &str, address: u16) -> String {
        format!("{}_{}:{}", device_uuid, self.as_str(), address)
    }
}

/// Modbus 异常码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
}
