//! 自定义字节协议字段表达式
//!
//! 形如 `name:width:type:endian;`，例如 `a:1:I:B;temp:4:F:L;sn:8:S:B;`：
//! - `width` 为字节数（至多 6 位数字）
//! - `type` ∈ `I/int`（无符号整数，1..=8 字节）、`F/float`（4 或 8 字节）、`S/string`
//! - `endian` ∈ `B/BE`、`L/LE`

use crate::error::ProtocolError;
use regex::Regex;
use serde_json::{Map, Value};

const FIELD_PATTERN: &str =
    r"^([A-Za-z_][A-Za-z0-9_]{0,63}):([0-9]{1,6}):(I|S|F|int|string|float):(B|L|BE|LE)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub width: usize,
    pub kind: FieldType,
    pub endian: Endian,
}

/// 已解析的字段表达式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    fields: Vec<Field>,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let re = Regex::new(FIELD_PATTERN).map_err(|e| ProtocolError::ConfigParse(e.to_string()))?;
        let mut fields = Vec::new();
        for part in text.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let caps = re
                .captures(part)
                .ok_or_else(|| ProtocolError::ConfigParse(format!("invalid field: {}", part)))?;
            let width: usize = caps[2]
                .parse()
                .map_err(|_| ProtocolError::ConfigParse(format!("invalid width: {}", part)))?;
            let kind = match &caps[3] {
                "I" | "int" => FieldType::Int,
                "F" | "float" => FieldType::Float,
                _ => FieldType::Str,
            };
            let endian = match &caps[4] {
                "B" | "BE" => Endian::Big,
                _ => Endian::Little,
            };
            let valid_width = match kind {
                FieldType::Int => (1..=8).contains(&width),
                FieldType::Float => width == 4 || width == 8,
                FieldType::Str => width > 0,
            };
            if !valid_width {
                return Err(ProtocolError::ConfigParse(format!(
                    "invalid width {} for field {}",
                    width, &caps[1]
                )));
            }
            fields.push(Field {
                name: caps[1].to_string(),
                width,
                kind,
                endian,
            });
        }
        if fields.is_empty() {
            return Err(ProtocolError::ConfigParse("empty expression".to_string()));
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// 所有字段宽度之和。
    pub fn total_width(&self) -> usize {
        self.fields.iter().map(|field| field.width).sum()
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Map<String, Value>, ProtocolError> {
        let total = self.total_width();
        if total > payload.len() {
            return Err(ProtocolError::DataParse(format!(
                "expression needs {} bytes, payload has {}",
                total,
                payload.len()
            )));
        }
        let mut out = Map::new();
        let mut offset = 0;
        for field in &self.fields {
            let slice = &payload[offset..offset + field.width];
            offset += field.width;
            let value = match field.kind {
                FieldType::Int => Value::from(read_uint(slice, field.endian)),
                FieldType::Float => {
                    let bits = read_uint(slice, field.endian);
                    let number = if field.width == 4 {
                        f32::from_bits(bits as u32) as f64
                    } else {
                        f64::from_bits(bits)
                    };
                    serde_json::Number::from_f64(number)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
                FieldType::Str => {
                    let mut end = slice.len();
                    while end > 0 && slice[end - 1] == 0 {
                        end -= 1;
                    }
                    Value::String(String::from_utf8_lossy(&slice[..end]).into_owned())
                }
            };
            out.insert(field.name.clone(), value);
        }
        Ok(out)
    }
}

fn read_uint(bytes: &[u8], endian: Endian) -> u64 {
    let fold = |acc: u64, byte: &u8| (acc << 8) | *byte as u64;
    match endian {
        Endian::Big => bytes.iter().fold(0, fold),
        Endian::Little => bytes.iter().rev().fold(0, fold),
    }
}
