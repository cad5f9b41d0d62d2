//! BACnet/IP 报文子集
//!
//! 仅覆盖路由模式所需：BVLC + NPDU 解析，Who-Is → I-Am，
//! ReadProperty(present-value) → ComplexACK(REAL)，未知对象 → Error PDU。

use crate::error::ProtocolError;

/// BACnet/IP 默认 UDP 端口。
pub const BACNET_PORT: u16 = 47808;

const BVLC_TYPE: u8 = 0x81;
const BVLC_UNICAST: u8 = 0x0A;
const BVLC_BROADCAST: u8 = 0x0B;
const NPDU_VERSION: u8 = 0x01;

const PDU_CONFIRMED: u8 = 0x00;
const PDU_UNCONFIRMED: u8 = 0x10;
const PDU_COMPLEX_ACK: u8 = 0x30;
const PDU_ERROR: u8 = 0x50;

const SERVICE_I_AM: u8 = 0x00;
const SERVICE_WHO_IS: u8 = 0x08;
/// ReadProperty 服务号。
pub const SERVICE_READ_PROPERTY: u8 = 0x0C;

/// 对象类型：analog-input。
pub const OBJECT_ANALOG_INPUT: u16 = 0;
/// 对象类型：device。
pub const OBJECT_DEVICE: u16 = 8;
/// 属性：present-value。
pub const PROPERTY_PRESENT_VALUE: u32 = 85;

/// 错误类别：object。
pub const ERROR_CLASS_OBJECT: u8 = 1;
/// 错误类别：property。
pub const ERROR_CLASS_PROPERTY: u8 = 2;
/// 错误码：unknown-object。
pub const ERROR_UNKNOWN_OBJECT: u8 = 31;
/// 错误码：unknown-property。
pub const ERROR_UNKNOWN_PROPERTY: u8 = 32;

/// 已解析的请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacnetRequest {
    WhoIs {
        low: Option<u32>,
        high: Option<u32>,
    },
    ReadProperty {
        invoke_id: u8,
        object_type: u16,
        instance: u32,
        property: u32,
    },
    /// 其它报文（忽略）
    Other,
}

impl BacnetRequest {
    /// Who-Is 范围是否覆盖给定设备实例。
    pub fn who_is_matches(&self, device_instance: u32) -> bool {
        match self {
            Self::WhoIs { low: Some(low), high: Some(high) } => {
                (*low..=*high).contains(&device_instance)
            }
            Self::WhoIs { .. } => true,
            _ => false,
        }
    }
}

/// 解码一个 BACnet/IP 数据报。
pub fn decode_request(datagram: &[u8]) -> Result<BacnetRequest, ProtocolError> {
    if datagram.len() < 4 || datagram[0] != BVLC_TYPE {
        return Err(ProtocolError::DataParse("not a bacnet/ip datagram".to_string()));
    }
    let length = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    if length != datagram.len() {
        return Err(ProtocolError::BadLength {
            len: datagram.len(),
            min: length,
            max: length,
        });
    }
    if datagram[1] != BVLC_UNICAST && datagram[1] != BVLC_BROADCAST {
        return Ok(BacnetRequest::Other);
    }
    let npdu = &datagram[4..];
    let apdu_at = skip_npdu(npdu)?;
    let Some(apdu) = npdu.get(apdu_at..) else {
        return Ok(BacnetRequest::Other);
    };
    decode_apdu(apdu)
}

/// 返回 APDU 在 NPDU 中的偏移；网络层消息返回越界偏移。
fn skip_npdu(npdu: &[u8]) -> Result<usize, ProtocolError> {
    if npdu.len() < 2 || npdu[0] != NPDU_VERSION {
        return Err(ProtocolError::DataParse("bad npdu version".to_string()));
    }
    let control = npdu[1];
    let mut at = 2;
    let has_dnet = control & 0x20 != 0;
    if has_dnet {
        let dlen = *npdu
            .get(at + 2)
            .ok_or_else(|| ProtocolError::DataParse("truncated npdu".to_string()))?;
        at += 3 + dlen as usize;
    }
    if control & 0x08 != 0 {
        let slen = *npdu
            .get(at + 2)
            .ok_or_else(|| ProtocolError::DataParse("truncated npdu".to_string()))?;
        at += 3 + slen as usize;
    }
    if has_dnet {
        at += 1;
    }
    if control & 0x80 != 0 {
        return Ok(npdu.len());
    }
    Ok(at)
}

fn decode_apdu(apdu: &[u8]) -> Result<BacnetRequest, ProtocolError> {
    let Some(&pdu_type) = apdu.first() else {
        return Ok(BacnetRequest::Other);
    };
    match pdu_type & 0xF0 {
        PDU_UNCONFIRMED if apdu.get(1) == Some(&SERVICE_WHO_IS) => {
            let mut at = 2;
            let mut limits = [None, None];
            for slot in limits.iter_mut() {
                let Some(&tag) = apdu.get(at) else { break };
                let len = (tag & 0x07) as usize;
                let bytes = apdu
                    .get(at + 1..at + 1 + len)
                    .ok_or_else(|| ProtocolError::DataParse("truncated who-is".to_string()))?;
                *slot = Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32));
                at += 1 + len;
            }
            Ok(BacnetRequest::WhoIs {
                low: limits[0],
                high: limits[1],
            })
        }
        PDU_CONFIRMED => {
            if apdu.len() < 4 || apdu[3] != SERVICE_READ_PROPERTY {
                return Ok(BacnetRequest::Other);
            }
            let invoke_id = apdu[2];
            let body = &apdu[4..];
            // 上下文标签 0：对象标识（4 字节）
            if body.len() < 5 || body[0] != 0x0C {
                return Err(ProtocolError::DataParse("missing object identifier".to_string()));
            }
            let object_id = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
            // 上下文标签 1：属性标识（1..=4 字节）
            let tag = *body
                .get(5)
                .ok_or_else(|| ProtocolError::DataParse("missing property identifier".to_string()))?;
            if tag & 0xF8 != 0x18 {
                return Err(ProtocolError::DataParse("missing property identifier".to_string()));
            }
            let len = (tag & 0x07) as usize;
            let bytes = body
                .get(6..6 + len)
                .ok_or_else(|| ProtocolError::DataParse("truncated property identifier".to_string()))?;
            let property = bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
            Ok(BacnetRequest::ReadProperty {
                invoke_id,
                object_type: (object_id >> 22) as u16,
                instance: object_id & 0x003F_FFFF,
                property,
            })
        }
        _ => Ok(BacnetRequest::Other),
    }
}

fn object_id(object_type: u16, instance: u32) -> [u8; 4] {
    (((object_type as u32) << 22) | (instance & 0x003F_FFFF)).to_be_bytes()
}

fn wrap(function: u8, apdu: &[u8]) -> Vec<u8> {
    let length = 4 + 2 + apdu.len();
    let mut out = Vec::with_capacity(length);
    out.push(BVLC_TYPE);
    out.push(function);
    out.extend_from_slice(&(length as u16).to_be_bytes());
    out.push(NPDU_VERSION);
    out.push(0x00);
    out.extend_from_slice(apdu);
    out
}

/// I-Am（广播）。
pub fn encode_i_am(device_instance: u32, vendor_id: u8) -> Vec<u8> {
    let mut apdu = vec![PDU_UNCONFIRMED, SERVICE_I_AM, 0xC4];
    apdu.extend_from_slice(&object_id(OBJECT_DEVICE, device_instance));
    // max-apdu 1476
    apdu.extend_from_slice(&[0x22, 0x05, 0xC4]);
    // segmentation: no-segmentation
    apdu.extend_from_slice(&[0x91, 0x03]);
    apdu.extend_from_slice(&[0x21, vendor_id]);
    wrap(BVLC_BROADCAST, &apdu)
}

/// ReadProperty 的 ComplexACK，值为 REAL。
pub fn encode_read_property_ack(
    invoke_id: u8,
    object_type: u16,
    instance: u32,
    property: u32,
    value: f32,
) -> Vec<u8> {
    let mut apdu = vec![PDU_COMPLEX_ACK, invoke_id, SERVICE_READ_PROPERTY, 0x0C];
    apdu.extend_from_slice(&object_id(object_type, instance));
    apdu.extend_from_slice(&encode_property_tag(property));
    apdu.push(0x3E);
    apdu.push(0x44);
    apdu.extend_from_slice(&value.to_be_bytes());
    apdu.push(0x3F);
    wrap(BVLC_UNICAST, &apdu)
}

/// Error PDU。
pub fn encode_error(invoke_id: u8, service: u8, class: u8, code: u8) -> Vec<u8> {
    let apdu = [PDU_ERROR, invoke_id, service, 0x91, class, 0x91, code];
    wrap(BVLC_UNICAST, &apdu)
}

/// ReadProperty 请求（客户端侧与测试使用）。
pub fn encode_read_property(invoke_id: u8, object_type: u16, instance: u32, property: u32) -> Vec<u8> {
    let mut apdu = vec![PDU_CONFIRMED, 0x05, invoke_id, SERVICE_READ_PROPERTY, 0x0C];
    apdu.extend_from_slice(&object_id(object_type, instance));
    apdu.extend_from_slice(&encode_property_tag(property));
    wrap(BVLC_UNICAST, &apdu)
}

/// Who-Is（广播，不带范围）。
pub fn encode_who_is() -> Vec<u8> {
    wrap(BVLC_BROADCAST, &[PDU_UNCONFIRMED, SERVICE_WHO_IS])
}

fn encode_property_tag(property: u32) -> Vec<u8> {
    if property <= 0xFF {
        vec![0x19, property as u8]
    } else if property <= 0xFFFF {
        let bytes = (property as u16).to_be_bytes();
        vec![0x1A, bytes[0], bytes[1]]
    } else {
        let bytes = property.to_be_bytes();
        vec![0x1C, bytes[0], bytes[1], bytes[2], bytes[3]]
    }
}

/// 从 ComplexACK 中取出 REAL 值。
pub fn decode_real_ack(datagram: &[u8]) -> Option<f32> {
    let at = datagram.iter().position(|b| *b == 0x44)?;
    let bytes = datagram.get(at + 1..at + 5)?;
    Some(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_who_is() {
        let request = decode_request(&encode_who_is()).unwrap();
        assert_eq!(request, BacnetRequest::WhoIs { low: None, high: None });
        assert!(request.who_is_matches(1234));

        let ranged = wrap(
            BVLC_BROADCAST,
            &[PDU_UNCONFIRMED, SERVICE_WHO_IS, 0x09, 0x0A, 0x19, 0x14],
        );
        let request = decode_request(&ranged).unwrap();
        assert_eq!(request, BacnetRequest::WhoIs { low: Some(10), high: Some(20) });
        assert!(!request.who_is_matches(21));
    }

    #[test]
    fn decodes_read_property() {
        let datagram = encode_read_property(3, OBJECT_ANALOG_INPUT, 7, PROPERTY_PRESENT_VALUE);
        assert_eq!(
            decode_request(&datagram).unwrap(),
            BacnetRequest::ReadProperty {
                invoke_id: 3,
                object_type: OBJECT_ANALOG_INPUT,
                instance: 7,
                property: PROPERTY_PRESENT_VALUE,
            }
        );
    }

    #[test]
    fn ack_carries_real_value() {
        let ack = encode_read_property_ack(3, OBJECT_ANALOG_INPUT, 7, PROPERTY_PRESENT_VALUE, 21.5);
        assert_eq!(u16::from_be_bytes([ack[2], ack[3]]) as usize, ack.len());
        assert_eq!(decode_real_ack(&ack), Some(21.5));
    }

    #[test]
    fn i_am_identifies_device() {
        let frame = encode_i_am(1234, 15);
        assert_eq!(frame[1], BVLC_BROADCAST);
        assert_eq!(&frame[6..9], &[PDU_UNCONFIRMED, SERVICE_I_AM, 0xC4]);
        let id = u32::from_be_bytes([frame[9], frame[10], frame[11], frame[12]]);
        assert_eq!(id >> 22, OBJECT_DEVICE as u32);
        assert_eq!(id & 0x003F_FFFF, 1234);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_request(&[0x00, 0x01]).is_err());
        assert!(decode_request(&[0x81, 0x0A, 0x00, 0x09, 0x01]).is_err());
    }
}
