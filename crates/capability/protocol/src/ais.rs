//! NMEA-0183 / AIS 解码
//!
//! - 校验 `*hh` 校验和（`!`/`$` 与 `*` 之间字符的异或）
//! - `!AIVDM` / `!AIVDO` 多分片组装与六比特反铠装
//! - 消息类型 1/2/3、5、18、19、24
//! - `$GNRMC` / `$GNGNS` 定位语句

use crate::error::ProtocolError;
use serde_json::{Value, json};
use std::collections::HashMap;

const SIXBIT_ASCII: &[u8; 64] =
    b"@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_ !\"#$%&'()*+,-./0123456789:;<=>?";

/// 校验通过的 NMEA 语句。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaSentence {
    /// 语句标识（含起始符），如 `!AIVDM`
    pub head: String,
    /// 逗号分隔的字段（不含标识）
    pub fields: Vec<String>,
    /// 去掉厂商前缀后的原始语句
    pub raw: String,
}

impl NmeaSentence {
    /// 解析一行语句；会去掉第一个 `!`/`$` 之前的厂商前缀。
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let start = line
            .find(['!', '$'])
            .ok_or_else(|| ProtocolError::DataParse("no nmea start delimiter".to_string()))?;
        let raw = &line[start..];
        let (body, checksum) = raw
            .rsplit_once('*')
            .ok_or_else(|| ProtocolError::DataParse("missing nmea checksum".to_string()))?;
        let expected = u8::from_str_radix(checksum.trim(), 16)
            .map_err(|_| ProtocolError::DataParse(format!("bad checksum field: {}", checksum)))?;
        let actual = body[1..].bytes().fold(0u8, |acc, byte| acc ^ byte);
        if expected != actual {
            return Err(ProtocolError::Checksum {
                expected: expected as u16,
                actual: actual as u16,
            });
        }
        let mut parts = body.split(',');
        let head = parts.next().unwrap_or_default().to_string();
        Ok(Self {
            head,
            fields: parts.map(str::to_string).collect(),
            raw: raw.to_string(),
        })
    }

    /// 语句类型（去掉起始符和两位 talker），如 `VDM`、`RMC`。
    pub fn kind(&self) -> &str {
        self.head.get(3..).unwrap_or_default()
    }

    fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or_default()
    }
}

/// 允许前缀判断：语句（去厂商前缀后）以任一前缀开头。
pub fn allowed(line: &str, prefixes: &[String]) -> bool {
    let Some(start) = line.find(['!', '$']) else {
        return false;
    };
    let line = &line[start..];
    prefixes.iter().any(|prefix| line.starts_with(prefix.as_str()))
}

/// 多分片 AIS 消息组装器。
#[derive(Debug, Default)]
pub struct AisAssembler {
    pending: HashMap<String, Vec<Option<(String, u8)>>>,
}

impl AisAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一条 `!AIVDM/!AIVDO` 语句；分片未齐时返回 `Ok(None)`。
    pub fn push(&mut self, sentence: &NmeaSentence) -> Result<Option<Value>, ProtocolError> {
        if sentence.kind() != "VDM" && sentence.kind() != "VDO" {
            return Err(ProtocolError::DataParse(format!(
                "not an ais sentence: {}",
                sentence.head
            )));
        }
        let total: usize = parse_num(sentence.field(0))?;
        let number: usize = parse_num(sentence.field(1))?;
        let seq = sentence.field(2);
        let channel = sentence.field(3);
        let payload = sentence.field(4).to_string();
        let fill: u8 = parse_num(sentence.field(5))?;
        if total == 0 || number == 0 || number > total || total > 9 {
            return Err(ProtocolError::DataParse(format!(
                "bad fragment {}/{}",
                number, total
            )));
        }
        if total == 1 {
            return decode_payload(&[(payload, fill)]).map(Some);
        }
        let key = format!("{}:{}", seq, channel);
        let slots = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| vec![None; total]);
        if slots.len() != total {
            *slots = vec![None; total];
        }
        slots[number - 1] = Some((payload, fill));
        if slots.iter().any(Option::is_none) {
            return Ok(None);
        }
        let parts: Vec<(String, u8)> = self
            .pending
            .remove(&key)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        decode_payload(&parts).map(Some)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// 解码一条已校验的 NMEA 语句（GNRMC / GNGNS）。
pub fn decode_position_sentence(sentence: &NmeaSentence) -> Result<Value, ProtocolError> {
    match sentence.kind() {
        "RMC" => Ok(json!({
            "sentence": "RMC",
            "time": sentence.field(0),
            "status": sentence.field(1),
            "latitude": coordinate(sentence.field(2), sentence.field(3))?,
            "longitude": coordinate(sentence.field(4), sentence.field(5))?,
            "speed": optional_f64(sentence.field(6)),
            "course": optional_f64(sentence.field(7)),
            "date": sentence.field(8),
        })),
        "GNS" => Ok(json!({
            "sentence": "GNS",
            "time": sentence.field(0),
            "latitude": coordinate(sentence.field(1), sentence.field(2))?,
            "longitude": coordinate(sentence.field(3), sentence.field(4))?,
            "mode": sentence.field(5),
            "satellites": sentence.field(6).parse::<u32>().ok(),
            "hdop": optional_f64(sentence.field(7)),
            "altitude": optional_f64(sentence.field(8)),
        })),
        other => Err(ProtocolError::DataParse(format!(
            "unsupported sentence: {}",
            other
        ))),
    }
}

fn parse_num<T: std::str::FromStr + Default>(text: &str) -> Result<T, ProtocolError> {
    if text.is_empty() {
        return Ok(T::default());
    }
    text.parse()
        .map_err(|_| ProtocolError::DataParse(format!("bad number: {}", text)))
}

fn optional_f64(text: &str) -> Option<f64> {
    text.parse().ok()
}

/// `ddmm.mmmm` + 半球 → 十进制度。
fn coordinate(value: &str, hemisphere: &str) -> Result<Option<f64>, ProtocolError> {
    if value.is_empty() {
        return Ok(None);
    }
    let raw: f64 = value
        .parse()
        .map_err(|_| ProtocolError::DataParse(format!("bad coordinate: {}", value)))?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let mut decimal = degrees + minutes / 60.0;
    if hemisphere == "S" || hemisphere == "W" {
        decimal = -decimal;
    }
    Ok(Some((decimal * 1e6).round() / 1e6))
}

/// 六比特位流。
struct Bits {
    bits: Vec<u8>,
}

impl Bits {
    fn from_armored(parts: &[(String, u8)]) -> Result<Self, ProtocolError> {
        let mut bits = Vec::new();
        let last = parts.len().saturating_sub(1);
        for (index, (payload, fill)) in parts.iter().enumerate() {
            for ch in payload.bytes() {
                let mut value = ch
                    .checked_sub(48)
                    .ok_or_else(|| ProtocolError::DataParse(format!("bad armor char {}", ch)))?;
                if value > 40 {
                    value -= 8;
                }
                if value > 63 {
                    return Err(ProtocolError::DataParse(format!("bad armor char {}", ch)));
                }
                for shift in (0..6).rev() {
                    bits.push((value >> shift) & 1);
                }
            }
            if index == last {
                let keep = bits.len().saturating_sub(*fill as usize);
                bits.truncate(keep);
            }
        }
        Ok(Self { bits })
    }

    fn len(&self) -> usize {
        self.bits.len()
    }

    fn uint(&self, start: usize, width: usize) -> Result<u64, ProtocolError> {
        if start + width > self.bits.len() {
            return Err(ProtocolError::DataParse(format!(
                "ais message truncated at bit {}",
                start + width
            )));
        }
        Ok(self.bits[start..start + width]
            .iter()
            .fold(0u64, |acc, bit| (acc << 1) | *bit as u64))
    }

    fn int(&self, start: usize, width: usize) -> Result<i64, ProtocolError> {
        let raw = self.uint(start, width)?;
        if width > 0 && raw >> (width - 1) & 1 == 1 {
            Ok(raw as i64 - (1i64 << width))
        } else {
            Ok(raw as i64)
        }
    }

    fn text(&self, start: usize, width: usize) -> Result<String, ProtocolError> {
        let mut out = String::with_capacity(width / 6);
        for index in 0..width / 6 {
            let code = self.uint(start + index * 6, 6)? as usize;
            out.push(SIXBIT_ASCII[code] as char);
        }
        Ok(out.trim_end_matches('@').trim().to_string())
    }
}

fn decode_payload(parts: &[(String, u8)]) -> Result<Value, ProtocolError> {
    let bits = Bits::from_armored(parts)?;
    let kind = bits.uint(0, 6)?;
    let repeat = bits.uint(6, 2)?;
    let mmsi = bits.uint(8, 30)?;
    let mut record = json!({ "type": kind, "repeat": repeat, "mmsi": mmsi });
    let Value::Object(map) = &mut record else {
        return Ok(record);
    };
    match kind {
        1..=3 => {
            map.insert("status".into(), bits.uint(38, 4)?.into());
            map.insert("turn".into(), bits.int(42, 8)?.into());
            map.insert("speed".into(), tenth(bits.uint(50, 10)?));
            map.insert("accuracy".into(), (bits.uint(60, 1)? == 1).into());
            map.insert("lon".into(), degrees(bits.int(61, 28)?));
            map.insert("lat".into(), degrees(bits.int(89, 27)?));
            map.insert("course".into(), tenth(bits.uint(116, 12)?));
            map.insert("heading".into(), bits.uint(128, 9)?.into());
            map.insert("second".into(), bits.uint(137, 6)?.into());
        }
        5 => {
            map.insert("aisVersion".into(), bits.uint(38, 2)?.into());
            map.insert("imo".into(), bits.uint(40, 30)?.into());
            map.insert("callsign".into(), bits.text(70, 42)?.into());
            map.insert("shipname".into(), bits.text(112, 120)?.into());
            map.insert("shiptype".into(), bits.uint(232, 8)?.into());
            dimensions(map, &bits, 240)?;
            map.insert("epfd".into(), bits.uint(270, 4)?.into());
            map.insert("month".into(), bits.uint(274, 4)?.into());
            map.insert("day".into(), bits.uint(278, 5)?.into());
            map.insert("hour".into(), bits.uint(283, 5)?.into());
            map.insert("minute".into(), bits.uint(288, 6)?.into());
            map.insert("draught".into(), tenth(bits.uint(294, 8)?));
            map.insert("destination".into(), bits.text(302, 120)?.into());
        }
        18 | 19 => {
            map.insert("speed".into(), tenth(bits.uint(46, 10)?));
            map.insert("accuracy".into(), (bits.uint(56, 1)? == 1).into());
            map.insert("lon".into(), degrees(bits.int(57, 28)?));
            map.insert("lat".into(), degrees(bits.int(85, 27)?));
            map.insert("course".into(), tenth(bits.uint(112, 12)?));
            map.insert("heading".into(), bits.uint(124, 9)?.into());
            map.insert("second".into(), bits.uint(133, 6)?.into());
            if kind == 19 {
                map.insert("shipname".into(), bits.text(143, 120)?.into());
                map.insert("shiptype".into(), bits.uint(263, 8)?.into());
                dimensions(map, &bits, 271)?;
                map.insert("epfd".into(), bits.uint(301, 4)?.into());
            }
        }
        24 => {
            let part = bits.uint(38, 2)?;
            map.insert("partno".into(), part.into());
            if part == 0 {
                map.insert("shipname".into(), bits.text(40, 120)?.into());
            } else {
                map.insert("shiptype".into(), bits.uint(40, 8)?.into());
                map.insert("vendorid".into(), bits.text(48, 18)?.into());
                map.insert("callsign".into(), bits.text(90, 42)?.into());
                dimensions(map, &bits, 132)?;
            }
        }
        _ => {
            map.insert("bits".into(), bits.len().into());
        }
    }
    Ok(record)
}

fn dimensions(
    map: &mut serde_json::Map<String, Value>,
    bits: &Bits,
    start: usize,
) -> Result<(), ProtocolError> {
    map.insert("toBow".into(), bits.uint(start, 9)?.into());
    map.insert("toStern".into(), bits.uint(start + 9, 9)?.into());
    map.insert("toPort".into(), bits.uint(start + 18, 6)?.into());
    map.insert("toStarboard".into(), bits.uint(start + 24, 6)?.into());
    Ok(())
}

fn tenth(raw: u64) -> Value {
    json!(raw as f64 / 10.0)
}

fn degrees(raw: i64) -> Value {
    json!(((raw as f64 / 600_000.0) * 1e6).round() / 1e6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_class_a_position_report() {
        let sentence =
            NmeaSentence::parse("!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5C").unwrap();
        let mut assembler = AisAssembler::new();
        let record = assembler.push(&sentence).unwrap().unwrap();
        assert_eq!(record["type"], 1);
        assert_eq!(record["mmsi"], 477553000);
        assert_eq!(record["status"], 5);
        assert_eq!(record["speed"], 0.0);
        assert_eq!(record["lon"], -122.345833);
        assert_eq!(record["lat"], 47.582833);
        assert_eq!(record["course"], 51.0);
        assert_eq!(record["heading"], 181);
        assert_eq!(record["second"], 15);
    }

    #[test]
    fn assembles_two_fragment_static_report() {
        let mut assembler = AisAssembler::new();
        let first = NmeaSentence::parse(
            "!AIVDM,2,1,1,A,55?MbV02;H;s<HtKR20EHE:0@T4@Dn2222222216L961O5Gf0NSQEp6ClRp8,0*1C",
        )
        .unwrap();
        let second = NmeaSentence::parse("!AIVDM,2,2,1,A,88888888880,2*25").unwrap();
        assert!(assembler.push(&first).unwrap().is_none());
        assert_eq!(assembler.pending(), 1);
        let record = assembler.push(&second).unwrap().unwrap();
        assert_eq!(assembler.pending(), 0);
        assert_eq!(record["type"], 5);
        assert_eq!(record["mmsi"], 351759000);
        assert_eq!(record["imo"], 9134270);
        assert_eq!(record["callsign"], "3FOF8");
        assert_eq!(record["shipname"], "EVER DIADEM");
        assert_eq!(record["shiptype"], 70);
        assert_eq!(record["destination"], "NEW YORK");
        assert_eq!(record["draught"], 12.2);
        assert_eq!(record["toBow"], 225);
    }

    #[test]
    fn rejects_bad_checksum() {
        let err = NmeaSentence::parse("!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5D").unwrap_err();
        assert!(matches!(err, ProtocolError::Checksum { .. }));
        assert!(NmeaSentence::parse("!AIVDM,1,1,,B,177KQJ5000G").is_err());
    }

    #[test]
    fn strips_vendor_prefix_and_checks_allow_list() {
        let line = "AIS33VR1!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5C";
        let sentence = NmeaSentence::parse(line).unwrap();
        assert_eq!(sentence.head, "!AIVDM");
        let prefixes = vec!["!AIVDM".to_string(), "$GNRMC".to_string()];
        assert!(allowed(line, &prefixes));
        assert!(!allowed("$GPGSV,1,1,00*79", &prefixes));
    }

    #[test]
    fn decodes_gnrmc_and_gngns() {
        let rmc = NmeaSentence::parse(
            "$GNRMC,083559.00,A,4717.11437,N,00833.91522,E,0.004,77.52,091202,,,A*49",
        )
        .unwrap();
        let record = decode_position_sentence(&rmc).unwrap();
        assert_eq!(record["sentence"], "RMC");
        assert_eq!(record["latitude"], 47.285240);
        assert_eq!(record["longitude"], 8.565254);
        assert_eq!(record["date"], "091202");

        let gns = NmeaSentence::parse(
            "$GNGNS,014035.00,4332.69262,S,17235.48549,E,RR,13,0.9,25.63,11.24,,*70",
        )
        .unwrap();
        let record = decode_position_sentence(&gns).unwrap();
        assert_eq!(record["satellites"], 13);
        assert!(record["latitude"].as_f64().unwrap() < 0.0);
    }
}
