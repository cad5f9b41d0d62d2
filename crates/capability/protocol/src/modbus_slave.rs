//! Modbus 从站报文编解码
//!
//! MBAP 头 + PDU，支持功能码 1/2/3/4/5/6/15/16，异常响应为 `fc | 0x80`。

use crate::error::ProtocolError;
use crate::types::{ModbusException, ModbusFunctionCode, RegisterArea};
use tokio::io::{AsyncRead, AsyncReadExt};

const MBAP_LEN: usize = 7;
const MAX_READ_BITS: u16 = 2000;
const MAX_READ_REGISTERS: u16 = 125;
const MAX_WRITE_BITS: u16 = 1968;
const MAX_WRITE_REGISTERS: u16 = 123;

/// MBAP 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub unit_id: u8,
}

/// 读取一个 MBAP 帧；对端关闭时返回 `Ok(None)`。
pub async fn read_mbap_frame<R>(reader: &mut R) -> Result<Option<(MbapHeader, Vec<u8>)>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; MBAP_LEN];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let header = MbapHeader {
        transaction_id: u16::from_be_bytes([head[0], head[1]]),
        protocol_id: u16::from_be_bytes([head[2], head[3]]),
        unit_id: head[6],
    };
    let length = u16::from_be_bytes([head[4], head[5]]) as usize;
    if !(2..=254).contains(&length) {
        return Err(ProtocolError::BadLength {
            len: length,
            min: 2,
            max: 254,
        });
    }
    let mut pdu = vec![0u8; length - 1];
    reader.read_exact(&mut pdu).await?;
    Ok(Some((header, pdu)))
}

/// 编码 MBAP 帧。
pub fn encode_mbap(header: &MbapHeader, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_LEN + pdu.len());
    frame.extend_from_slice(&header.transaction_id.to_be_bytes());
    frame.extend_from_slice(&header.protocol_id.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(header.unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// 主站写入导致的寄存器变化（线圈以 0/1 表示）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankWrite {
    pub area: RegisterArea,
    pub address: u16,
    pub values: Vec<u16>,
}

/// 从站寄存器区。
#[derive(Debug, Clone)]
pub struct RegisterBank {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl RegisterBank {
    /// 四个区使用同一容量。
    pub fn new(capacity: usize) -> Self {
        Self::with_sizes(capacity, capacity, capacity, capacity)
    }

    pub fn with_sizes(coils: usize, discrete_inputs: usize, holding: usize, input: usize) -> Self {
        Self {
            coils: vec![false; coils],
            discrete_inputs: vec![false; discrete_inputs],
            holding_registers: vec![0; holding],
            input_registers: vec![0; input],
        }
    }

    pub fn capacity(&self, area: RegisterArea) -> usize {
        match area {
            RegisterArea::Coils => self.coils.len(),
            RegisterArea::DiscreteInputs => self.discrete_inputs.len(),
            RegisterArea::HoldingRegisters => self.holding_registers.len(),
            RegisterArea::InputRegisters => self.input_registers.len(),
        }
    }

    pub fn read_bits(
        &self,
        area: RegisterArea,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ModbusException> {
        let bank = match area {
            RegisterArea::Coils => &self.coils,
            RegisterArea::DiscreteInputs => &self.discrete_inputs,
            _ => return Err(ModbusException::IllegalFunction),
        };
        let range = window(bank.len(), address, quantity)?;
        Ok(bank[range].to_vec())
    }

    pub fn read_registers(
        &self,
        area: RegisterArea,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ModbusException> {
        let bank = match area {
            RegisterArea::HoldingRegisters => &self.holding_registers,
            RegisterArea::InputRegisters => &self.input_registers,
            _ => return Err(ModbusException::IllegalFunction),
        };
        let range = window(bank.len(), address, quantity)?;
        Ok(bank[range].to_vec())
    }

    /// 写位区（线圈或离散输入）。
    pub fn write_bits(
        &mut self,
        area: RegisterArea,
        address: u16,
        values: &[bool],
    ) -> Result<(), ModbusException> {
        let bank = match area {
            RegisterArea::Coils => &mut self.coils,
            RegisterArea::DiscreteInputs => &mut self.discrete_inputs,
            _ => return Err(ModbusException::IllegalFunction),
        };
        let range = window(bank.len(), address, values.len() as u16)?;
        bank[range].copy_from_slice(values);
        Ok(())
    }

    /// 写寄存器区（保持寄存器或输入寄存器）。
    pub fn write_registers(
        &mut self,
        area: RegisterArea,
        address: u16,
        values: &[u16],
    ) -> Result<(), ModbusException> {
        let bank = match area {
            RegisterArea::HoldingRegisters => &mut self.holding_registers,
            RegisterArea::InputRegisters => &mut self.input_registers,
            _ => return Err(ModbusException::IllegalFunction),
        };
        let range = window(bank.len(), address, values.len() as u16)?;
        bank[range].copy_from_slice(values);
        Ok(())
    }

    /// 处理一个请求 PDU，返回响应 PDU 以及主站写入的内容。
    pub fn handle_pdu(&mut self, pdu: &[u8]) -> (Vec<u8>, Option<BankWrite>) {
        let Some(&code) = pdu.first() else {
            return (exception(0, ModbusException::IllegalFunction), None);
        };
        match self.apply(code, &pdu[1..]) {
            Ok(result) => result,
            Err(err) => (exception(code, err), None),
        }
    }

    fn apply(
        &mut self,
        code: u8,
        body: &[u8],
    ) -> Result<(Vec<u8>, Option<BankWrite>), ModbusException> {
        let function =
            ModbusFunctionCode::from_u8(code).ok_or(ModbusException::IllegalFunction)?;
        let address = be_u16(body, 0)?;
        let value = be_u16(body, 2)?;
        match function {
            ModbusFunctionCode::ReadCoils | ModbusFunctionCode::ReadDiscreteInputs => {
                if value == 0 || value > MAX_READ_BITS {
                    return Err(ModbusException::IllegalDataValue);
                }
                let area = if function == ModbusFunctionCode::ReadCoils {
                    RegisterArea::Coils
                } else {
                    RegisterArea::DiscreteInputs
                };
                let bits = self.read_bits(area, address, value)?;
                let packed = pack_bits(&bits);
                let mut out = vec![code, packed.len() as u8];
                out.extend(packed);
                Ok((out, None))
            }
            ModbusFunctionCode::ReadHoldingRegisters | ModbusFunctionCode::ReadInputRegisters => {
                if value == 0 || value > MAX_READ_REGISTERS {
                    return Err(ModbusException::IllegalDataValue);
                }
                let area = if function == ModbusFunctionCode::ReadHoldingRegisters {
                    RegisterArea::HoldingRegisters
                } else {
                    RegisterArea::InputRegisters
                };
                let registers = self.read_registers(area, address, value)?;
                let mut out = vec![code, (registers.len() * 2) as u8];
                for register in registers {
                    out.extend_from_slice(&register.to_be_bytes());
                }
                Ok((out, None))
            }
            ModbusFunctionCode::WriteSingleCoil => {
                let on = match value {
                    0xFF00 => true,
                    0x0000 => false,
                    _ => return Err(ModbusException::IllegalDataValue),
                };
                self.write_bits(RegisterArea::Coils, address, &[on])?;
                let write = BankWrite {
                    area: RegisterArea::Coils,
                    address,
                    values: vec![u16::from(on)],
                };
                Ok((echo(code, body), Some(write)))
            }
            ModbusFunctionCode::WriteSingleRegister => {
                self.write_registers(RegisterArea::HoldingRegisters, address, &[value])?;
                let write = BankWrite {
                    area: RegisterArea::HoldingRegisters,
                    address,
                    values: vec![value],
                };
                Ok((echo(code, body), Some(write)))
            }
            ModbusFunctionCode::WriteMultipleCoils => {
                let byte_count = *body.get(4).ok_or(ModbusException::IllegalDataValue)? as usize;
                if value == 0 || value > MAX_WRITE_BITS || byte_count != (value as usize).div_ceil(8) {
                    return Err(ModbusException::IllegalDataValue);
                }
                let data = body
                    .get(5..5 + byte_count)
                    .ok_or(ModbusException::IllegalDataValue)?;
                let bits: Vec<bool> = (0..value as usize)
                    .map(|index| data[index / 8] >> (index % 8) & 1 == 1)
                    .collect();
                self.write_bits(RegisterArea::Coils, address, &bits)?;
                let write = BankWrite {
                    area: RegisterArea::Coils,
                    address,
                    values: bits.iter().map(|bit| u16::from(*bit)).collect(),
                };
                Ok((echo(code, &body[..4]), Some(write)))
            }
            ModbusFunctionCode::WriteMultipleRegisters => {
                let byte_count = *body.get(4).ok_or(ModbusException::IllegalDataValue)? as usize;
                if value == 0 || value > MAX_WRITE_REGISTERS || byte_count != value as usize * 2 {
                    return Err(ModbusException::IllegalDataValue);
                }
                let data = body
                    .get(5..5 + byte_count)
                    .ok_or(ModbusException::IllegalDataValue)?;
                let registers: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                self.write_registers(RegisterArea::HoldingRegisters, address, &registers)?;
                let write = BankWrite {
                    area: RegisterArea::HoldingRegisters,
                    address,
                    values: registers,
                };
                Ok((echo(code, &body[..4]), Some(write)))
            }
        }
    }
}

fn window(len: usize, address: u16, quantity: u16) -> Result<std::ops::Range<usize>, ModbusException> {
    let start = address as usize;
    let end = start + quantity as usize;
    if end > len {
        return Err(ModbusException::IllegalDataAddress);
    }
    Ok(start..end)
}

fn be_u16(body: &[u8], at: usize) -> Result<u16, ModbusException> {
    match body.get(at..at + 2) {
        Some(pair) => Ok(u16::from_be_bytes([pair[0], pair[1]])),
        None => Err(ModbusException::IllegalDataValue),
    }
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (index, bit) in bits.iter().enumerate() {
        if *bit {
            out[index / 8] |= 1 << (index % 8);
        }
    }
    out
}

fn echo(code: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(code);
    out.extend_from_slice(&body[..body.len().min(4)]);
    out
}

fn exception(code: u8, err: ModbusException) -> Vec<u8> {
    vec![code | 0x80, err as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_single_register_then_read_back() {
        let mut bank = RegisterBank::new(64);
        let (response, write) = bank.handle_pdu(&[0x06, 0x00, 0x05, 0x00, 0x64]);
        assert_eq!(response, vec![0x06, 0x00, 0x05, 0x00, 0x64]);
        assert_eq!(
            write,
            Some(BankWrite {
                area: RegisterArea::HoldingRegisters,
                address: 5,
                values: vec![0x0064],
            })
        );
        let (response, write) = bank.handle_pdu(&[0x03, 0x00, 0x04, 0x00, 0x02]);
        assert_eq!(response, vec![0x03, 0x04, 0x00, 0x00, 0x00, 0x64]);
        assert!(write.is_none());
    }

    #[test]
    fn coils_are_packed_lsb_first() {
        let mut bank = RegisterBank::new(16);
        let (_, write) = bank.handle_pdu(&[0x0F, 0x00, 0x00, 0x00, 0x0A, 0x02, 0b0000_0101, 0b0000_0010]);
        assert_eq!(write.unwrap().values, vec![1, 0, 1, 0, 0, 0, 0, 0, 0, 1]);
        let (response, _) = bank.handle_pdu(&[0x01, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(response, vec![0x01, 0x02, 0b0000_0101, 0b0000_0010]);

        let (response, _) = bank.handle_pdu(&[0x05, 0x00, 0x03, 0xFF, 0x00]);
        assert_eq!(response, vec![0x05, 0x00, 0x03, 0xFF, 0x00]);
        assert_eq!(bank.read_bits(RegisterArea::Coils, 3, 1).unwrap(), vec![true]);
    }

    #[test]
    fn write_multiple_registers() {
        let mut bank = RegisterBank::new(8);
        let (response, write) =
            bank.handle_pdu(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x12, 0x34, 0xAB, 0xCD]);
        assert_eq!(response, vec![0x10, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(write.unwrap().values, vec![0x1234, 0xABCD]);
        assert_eq!(
            bank.read_registers(RegisterArea::HoldingRegisters, 1, 2).unwrap(),
            vec![0x1234, 0xABCD]
        );
    }

    #[test]
    fn exceptions() {
        let mut bank = RegisterBank::new(4);
        assert_eq!(bank.handle_pdu(&[0x03, 0x00, 0x03, 0x00, 0x02]).0, vec![0x83, 0x02]);
        assert_eq!(bank.handle_pdu(&[0x2B, 0x00, 0x00, 0x00, 0x01]).0, vec![0xAB, 0x01]);
        assert_eq!(bank.handle_pdu(&[0x05, 0x00, 0x00, 0x12, 0x34]).0, vec![0x85, 0x03]);
        assert_eq!(bank.handle_pdu(&[0x03, 0x00, 0x00, 0x00, 0x00]).0, vec![0x83, 0x03]);
    }

    #[tokio::test]
    async fn mbap_round_trip() {
        let header = MbapHeader {
            transaction_id: 7,
            protocol_id: 0,
            unit_id: 1,
        };
        let frame = encode_mbap(&header, &[0x06, 0x00, 0x05, 0x00, 0x64]);
        assert_eq!(&frame[..7], &[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01]);
        let mut reader = &frame[..];
        let (decoded, pdu) = read_mbap_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(pdu, vec![0x06, 0x00, 0x05, 0x00, 0x64]);
        assert!(read_mbap_frame(&mut reader).await.unwrap().is_none());
    }
}
