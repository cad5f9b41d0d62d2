//! 分帧状态机
//!
//! 帧格式：`[HEADER | LEN(2, BE) | PAYLOAD(LEN) | CRC16(2, BE) | TAIL]`，
//! CRC 只覆盖 PAYLOAD。
//!
//! ```text
//! Header ──匹配──▶ Length ──范围内──▶ Payload ──▶ Checksum ──▶ Tail ──匹配──▶ Header
//!   │ 不匹配：丢弃 1 字节       │ 越界 / 校验失败 / 帧尾不匹配：丢弃 1 字节回到 Header
//! ```

use crate::crc::crc16;
use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

const LEN_FIELD: usize = 2;
const CRC_FIELD: usize = 2;

/// 帧配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameConfig {
    #[serde(default = "default_header")]
    pub header: Vec<u8>,
    #[serde(default = "default_tail")]
    pub tail: Vec<u8>,
    #[serde(default = "default_min_payload")]
    pub min_payload: usize,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

fn default_header() -> Vec<u8> {
    vec![0xAF, 0x00]
}

fn default_tail() -> Vec<u8> {
    vec![0xFA, 0x00]
}

fn default_min_payload() -> usize {
    1
}

fn default_max_payload() -> usize {
    4096
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            header: default_header(),
            tail: default_tail(),
            min_payload: default_min_payload(),
            max_payload: default_max_payload(),
        }
    }
}

impl FrameConfig {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.header.is_empty() {
            return Err(ProtocolError::ConfigParse("frame header is empty".to_string()));
        }
        if self.min_payload > self.max_payload || self.max_payload > u16::MAX as usize {
            return Err(ProtocolError::ConfigParse(format!(
                "invalid payload range [{}, {}]",
                self.min_payload, self.max_payload
            )));
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<(), ProtocolError> {
        if len < self.min_payload || len > self.max_payload {
            return Err(ProtocolError::BadLength {
                len,
                min: self.min_payload,
                max: self.max_payload,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Length,
    Payload,
    Checksum,
    Tail,
}

/// 增量分帧解析器。
///
/// `parse` 追加数据并尽量推进；返回 `Ok(None)` 表示需要更多字节。
/// 一次调用至多产出一帧，缓冲区里剩余的帧可以用 `parse(&[])` 继续取出。
#[derive(Debug)]
pub struct FrameParser {
    config: FrameConfig,
    buffer: BytesMut,
    state: State,
    payload_len: usize,
}

impl FrameParser {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::with_capacity(256),
            state: State::Header,
            payload_len: 0,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// 缓冲区中尚未消费的字节数。
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::Header;
        self.payload_len = 0;
    }

    pub fn parse(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.buffer.extend_from_slice(chunk);
        let header_len = self.config.header.len();
        loop {
            match self.state {
                State::Header => {
                    if self.buffer.len() < header_len {
                        return Ok(None);
                    }
                    if self.buffer[..header_len] == self.config.header[..] {
                        self.state = State::Length;
                    } else {
                        self.buffer.advance(1);
                    }
                }
                State::Length => {
                    if self.buffer.len() < header_len + LEN_FIELD {
                        return Ok(None);
                    }
                    let len = u16::from_be_bytes([
                        self.buffer[header_len],
                        self.buffer[header_len + 1],
                    ]) as usize;
                    if let Err(err) = self.config.check_len(len) {
                        self.resync();
                        return Err(err);
                    }
                    self.payload_len = len;
                    self.state = State::Payload;
                }
                State::Payload => {
                    if self.buffer.len() < self.payload_end() {
                        return Ok(None);
                    }
                    self.state = State::Checksum;
                }
                State::Checksum => {
                    let end = self.payload_end();
                    if self.buffer.len() < end + CRC_FIELD {
                        return Ok(None);
                    }
                    let expected = crc16(&self.buffer[header_len + LEN_FIELD..end]);
                    let actual = u16::from_be_bytes([self.buffer[end], self.buffer[end + 1]]);
                    if expected != actual {
                        self.resync();
                        return Err(ProtocolError::Checksum { expected, actual });
                    }
                    self.state = State::Tail;
                }
                State::Tail => {
                    let tail_start = self.payload_end() + CRC_FIELD;
                    let total = tail_start + self.config.tail.len();
                    if self.buffer.len() < total {
                        return Ok(None);
                    }
                    if self.buffer[tail_start..total] != self.config.tail[..] {
                        self.resync();
                        return Err(ProtocolError::BadTail);
                    }
                    let payload = self.buffer[header_len + LEN_FIELD..self.payload_end()].to_vec();
                    self.buffer.advance(total);
                    self.state = State::Header;
                    self.payload_len = 0;
                    return Ok(Some(payload));
                }
            }
        }
    }

    fn payload_end(&self) -> usize {
        self.config.header.len() + LEN_FIELD + self.payload_len
    }

    fn resync(&mut self) {
        self.buffer.advance(1);
        self.state = State::Header;
        self.payload_len = 0;
    }
}

/// 按帧格式打包。
pub fn pack(config: &FrameConfig, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    config.check_len(payload.len())?;
    let mut frame = Vec::with_capacity(
        config.header.len() + LEN_FIELD + payload.len() + CRC_FIELD + config.tail.len(),
    );
    frame.extend_from_slice(&config.header);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&crc16(payload).to_be_bytes());
    frame.extend_from_slice(&config.tail);
    Ok(frame)
}
