//! 寄存器值解码 / 编码
//!
//! 字节序字符串描述线上字节相对大端序 `A B C D ...` 的排列：
//! `DCBA` 表示线上第 0 字节是大端序的第 3 字节。

use crate::error::ProtocolError;
use domain::{DataOrder, DataType, PointValueData};

/// UTF8 点位的最大字节数。
pub const MAX_UTF8_LEN: usize = 255;

/// 按数据类型、字节序与权重解码寄存器字节。
pub fn decode(
    data_type: DataType,
    order: DataOrder,
    weight: f64,
    bytes: &[u8],
) -> Result<PointValueData, ProtocolError> {
    match data_type {
        DataType::Raw => Ok(PointValueData::String(hex::encode(bytes))),
        DataType::Utf8 => decode_utf8(order, bytes),
        DataType::Bool => {
            let raw = canonical(data_type, order, bytes)?;
            Ok(PointValueData::Bool(raw[0] != 0))
        }
        DataType::Byte => {
            let raw = canonical(data_type, order, bytes)?;
            Ok(scaled_unsigned(raw[0] as u64, weight))
        }
        DataType::Int16 => {
            let raw = canonical(data_type, order, bytes)?;
            Ok(scaled_signed(
                i16::from_be_bytes([raw[0], raw[1]]) as i64,
                weight,
            ))
        }
        DataType::Uint16 => {
            let raw = canonical(data_type, order, bytes)?;
            Ok(scaled_unsigned(
                u16::from_be_bytes([raw[0], raw[1]]) as u64,
                weight,
            ))
        }
        DataType::Int32 => {
            let raw = canonical(data_type, order, bytes)?;
            Ok(scaled_signed(i32::from_be_bytes(array4(&raw)) as i64, weight))
        }
        DataType::Uint32 => {
            let raw = canonical(data_type, order, bytes)?;
            Ok(scaled_unsigned(u32::from_be_bytes(array4(&raw)) as u64, weight))
        }
        DataType::Float32 => {
            let raw = canonical(data_type, order, bytes)?;
            let value = f32::from_be_bytes(array4(&raw));
            if weight == 1.0 {
                Ok(PointValueData::F32(value))
            } else {
                Ok(PointValueData::F32(value * weight as f32))
            }
        }
        DataType::Int64 => {
            let raw = canonical(data_type, order, bytes)?;
            let value = i64::from_be_bytes(array8(&raw));
            if weight == 1.0 {
                Ok(PointValueData::I64(value))
            } else {
                Ok(PointValueData::F64(value as f64 * weight))
            }
        }
        DataType::Uint64 => {
            let raw = canonical(data_type, order, bytes)?;
            let value = u64::from_be_bytes(array8(&raw));
            if weight == 1.0 {
                Ok(PointValueData::U64(value))
            } else {
                Ok(PointValueData::F64(value as f64 * weight))
            }
        }
        DataType::Float64 => {
            let raw = canonical(data_type, order, bytes)?;
            Ok(PointValueData::F64(f64::from_be_bytes(array8(&raw)) * weight))
        }
    }
}

/// 将值按数据类型与字节序编码为线上字节（用于写寄存器）。
pub fn encode(
    data_type: DataType,
    order: DataOrder,
    value: &PointValueData,
) -> Result<Vec<u8>, ProtocolError> {
    let canonical: Vec<u8> = match data_type {
        DataType::Raw => {
            let text = value.to_string();
            return hex::decode(text.trim())
                .map_err(|e| ProtocolError::BadEncoding(format!("raw value: {}", e)));
        }
        DataType::Utf8 => {
            let mut bytes = value.to_string().into_bytes();
            if bytes.len() > MAX_UTF8_LEN {
                return Err(ProtocolError::BadEncoding(format!(
                    "utf8 value exceeds {} bytes",
                    MAX_UTF8_LEN
                )));
            }
            match order {
                DataOrder::BigEndian => {}
                DataOrder::LittleEndian => bytes.reverse(),
                other => return Err(unsupported(data_type, other)),
            }
            if bytes.len() % 2 != 0 {
                bytes.push(0);
            }
            return Ok(bytes);
        }
        DataType::Bool => vec![u8::from(number(value)? != 0.0)],
        DataType::Byte => vec![number(value)? as u8],
        DataType::Int16 => (number(value)? as i16).to_be_bytes().to_vec(),
        DataType::Uint16 => (number(value)? as u16).to_be_bytes().to_vec(),
        DataType::Int32 => (number(value)? as i32).to_be_bytes().to_vec(),
        DataType::Uint32 => (number(value)? as u32).to_be_bytes().to_vec(),
        DataType::Float32 => (number(value)? as f32).to_be_bytes().to_vec(),
        DataType::Int64 => (number(value)? as i64).to_be_bytes().to_vec(),
        DataType::Uint64 => (number(value)? as u64).to_be_bytes().to_vec(),
        DataType::Float64 => number(value)?.to_be_bytes().to_vec(),
    };
    let pattern = order_pattern(data_type, order)?;
    let mut wire = vec![0u8; canonical.len()];
    for (pos, letter) in pattern.bytes().enumerate() {
        wire[pos] = canonical[(letter - b'A') as usize];
    }
    Ok(wire)
}

/// 数据类型允许的字节序，及其字母排列。
fn order_pattern(data_type: DataType, order: DataOrder) -> Result<&'static str, ProtocolError> {
    let allowed = match (data_type.byte_len(), order) {
        (Some(1), DataOrder::A) => true,
        (Some(2), DataOrder::Ab | DataOrder::Ba) => true,
        (
            Some(4),
            DataOrder::Abcd | DataOrder::Badc | DataOrder::Cdab | DataOrder::Dcba,
        ) => true,
        (
            Some(8),
            DataOrder::Abcdefgh | DataOrder::Badcfehg | DataOrder::Ghefcdab | DataOrder::Hgfedcba,
        ) => true,
        _ => false,
    };
    if !allowed {
        return Err(unsupported(data_type, order));
    }
    Ok(order.as_str())
}

/// 把线上字节重排为大端序。
fn canonical(
    data_type: DataType,
    order: DataOrder,
    bytes: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let pattern = order_pattern(data_type, order)?;
    let need = pattern.len();
    if bytes.len() < need {
        return Err(ProtocolError::BadEncoding(format!(
            "{} needs {} bytes, got {}",
            data_type,
            need,
            bytes.len()
        )));
    }
    let mut out = vec![0u8; need];
    for (pos, letter) in pattern.bytes().enumerate() {
        out[(letter - b'A') as usize] = bytes[pos];
    }
    Ok(out)
}

/// UTF8 占整数个寄存器（2·N 字节），尾部 NUL 为填充。
fn decode_utf8(order: DataOrder, bytes: &[u8]) -> Result<PointValueData, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::BadEncoding(format!(
            "utf8 value must span whole registers, got {} bytes",
            bytes.len()
        )));
    }
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == 0 {
        end -= 1;
    }
    if end > MAX_UTF8_LEN {
        return Err(ProtocolError::BadEncoding(format!(
            "utf8 value exceeds {} bytes",
            MAX_UTF8_LEN
        )));
    }
    let mut trimmed = bytes[..end].to_vec();
    match order {
        DataOrder::BigEndian => {}
        DataOrder::LittleEndian => trimmed.reverse(),
        other => return Err(unsupported(DataType::Utf8, other)),
    }
    String::from_utf8(trimmed)
        .map(PointValueData::String)
        .map_err(|e| ProtocolError::BadEncoding(format!("invalid utf8: {}", e)))
}

fn scaled_signed(value: i64, weight: f64) -> PointValueData {
    if weight == 1.0 {
        PointValueData::I64(value)
    } else {
        PointValueData::F32(value as f32 * weight as f32)
    }
}

fn scaled_unsigned(value: u64, weight: f64) -> PointValueData {
    if weight == 1.0 {
        PointValueData::U64(value)
    } else {
        PointValueData::F32(value as f32 * weight as f32)
    }
}

fn number(value: &PointValueData) -> Result<f64, ProtocolError> {
    value
        .as_f64()
        .ok_or_else(|| ProtocolError::BadEncoding(format!("not a number: {}", value)))
}

fn unsupported(data_type: DataType, order: DataOrder) -> ProtocolError {
    ProtocolError::BadEncoding(format!("unsupported combination {}/{}", data_type, order))
}

fn array4(raw: &[u8]) -> [u8; 4] {
    [raw[0], raw[1], raw[2], raw[3]]
}

fn array8(raw: &[u8]) -> [u8; 8] {
    [
        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_f64(value: PointValueData) -> f64 {
        value.as_f64().unwrap()
    }

    #[test]
    fn float32_orders() {
        let pi = as_f64(decode(DataType::Float32, DataOrder::Dcba, 1.0, &[0xDC, 0x0F, 0x49, 0x40]).unwrap());
        assert!((pi - 3.14159).abs() < 1e-5);

        let abcd = as_f64(decode(DataType::Float32, DataOrder::Abcd, 1.0, &[0x40, 0x49, 0x0F, 0xDC]).unwrap());
        let cdab = as_f64(decode(DataType::Float32, DataOrder::Cdab, 1.0, &[0x0F, 0xDC, 0x40, 0x49]).unwrap());
        let badc = as_f64(decode(DataType::Float32, DataOrder::Badc, 1.0, &[0x49, 0x40, 0xDC, 0x0F]).unwrap());
        assert_eq!(abcd, pi);
        assert_eq!(cdab, pi);
        assert_eq!(badc, pi);
    }

    #[test]
    fn uint16_little_endian() {
        assert_eq!(
            decode(DataType::Uint16, DataOrder::Ba, 1.0, &[0xD2, 0x04]).unwrap(),
            PointValueData::U64(1234)
        );
        assert_eq!(
            decode(DataType::Int16, DataOrder::Ab, 1.0, &[0xFF, 0x9C]).unwrap(),
            PointValueData::I64(-100)
        );
    }

    #[test]
    fn weight_scales_to_f32() {
        let value = decode(DataType::Int16, DataOrder::Ab, 0.1, &[0x00, 0x7B]).unwrap();
        assert!((as_f64(value.clone()) - 12.3).abs() < 1e-5);
        assert_eq!(value.to_string(), "12.3");
    }

    #[test]
    fn utf8_trims_and_reverses() {
        assert_eq!(
            decode(DataType::Utf8, DataOrder::LittleEndian, 1.0, b"olleh\0\0\0").unwrap(),
            PointValueData::String("hello".to_string())
        );
        assert_eq!(
            decode(DataType::Utf8, DataOrder::BigEndian, 1.0, b"hi\0\0").unwrap(),
            PointValueData::String("hi".to_string())
        );
        assert!(decode(DataType::Utf8, DataOrder::BigEndian, 1.0, &[b'a'; 256]).is_err());
    }

    #[test]
    fn utf8_spans_whole_registers() {
        let err = decode(DataType::Utf8, DataOrder::BigEndian, 1.0, b"abc").unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));

        let value = PointValueData::String("abc".to_string());
        let wire = encode(DataType::Utf8, DataOrder::BigEndian, &value).unwrap();
        assert_eq!(wire, b"abc\0".to_vec());
        assert_eq!(decode(DataType::Utf8, DataOrder::BigEndian, 1.0, &wire).unwrap(), value);

        let wire = encode(DataType::Utf8, DataOrder::LittleEndian, &value).unwrap();
        assert_eq!(wire, b"cba\0".to_vec());
        assert_eq!(decode(DataType::Utf8, DataOrder::LittleEndian, 1.0, &wire).unwrap(), value);
    }

    #[test]
    fn raw_is_lower_hex() {
        assert_eq!(
            decode(DataType::Raw, DataOrder::A, 1.0, &[0xAB, 0x01]).unwrap(),
            PointValueData::String("ab01".to_string())
        );
    }

    #[test]
    fn eight_byte_orders() {
        let be = 1_234_567_890_123i64.to_be_bytes();
        let mut le = be;
        le.reverse();
        assert_eq!(
            decode(DataType::Int64, DataOrder::Hgfedcba, 1.0, &le).unwrap(),
            PointValueData::I64(1_234_567_890_123)
        );
        let wire = encode(DataType::Float64, DataOrder::Ghefcdab, &PointValueData::F64(2.5)).unwrap();
        assert_eq!(
            decode(DataType::Float64, DataOrder::Ghefcdab, 1.0, &wire).unwrap(),
            PointValueData::F64(2.5)
        );
    }

    #[test]
    fn unknown_combination_is_bad_encoding() {
        let err = decode(DataType::Int16, DataOrder::Dcba, 1.0, &[0, 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));
        assert!(decode(DataType::Int32, DataOrder::Abcd, 1.0, &[0, 1]).is_err());
        assert!(decode(DataType::Utf8, DataOrder::Ab, 1.0, b"xy").is_err());
    }

    #[test]
    fn encode_scatters_bytes() {
        assert_eq!(
            encode(DataType::Uint16, DataOrder::Ba, &PointValueData::U64(1234)).unwrap(),
            vec![0xD2, 0x04]
        );
        assert_eq!(
            encode(DataType::Float32, DataOrder::Cdab, &PointValueData::F32(3.1415927)).unwrap(),
            vec![0x0F, 0xDB, 0x40, 0x49]
        );
    }
}
