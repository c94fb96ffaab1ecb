//! Binary event-stream framing
//!
//! Message layout (all integers big-endian):
//!
//! ```text
//! [total_len: u32][headers_len: u32][prelude_crc: u32][headers][payload][message_crc: u32]
//! ```
//!
//! CRC fields are read past without verification.

use crate::error::GatewayError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + CRC_LEN;

/// One decoded event-stream message
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    /// String-valued headers such as `:event-type`; other header types are skipped
    pub headers: Vec<(String, String)>,
    pub payload: Bytes,
}

impl EventMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The JSON text carried by this message.
    ///
    /// Payloads wrapped as `{"bytes": "<base64 json>"}` are unwrapped.
    pub fn json_payload(&self) -> Option<String> {
        let text = std::str::from_utf8(&self.payload).ok()?.trim();
        if text.is_empty() {
            return None;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
            if let Some(encoded) = map.get("bytes").and_then(Value::as_str) {
                let decoded = STANDARD.decode(encoded).ok()?;
                return String::from_utf8(decoded).ok();
            }
        }
        Some(text.to_string())
    }
}

/// Incremental decoder over a growing byte buffer
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buf: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every complete message now available
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<EventMessage>, GatewayError> {
        self.buf.extend_from_slice(bytes);
        let mut messages = Vec::new();
        while self.buf.len() >= PRELUDE_LEN {
            let total = read_u32(&self.buf, 0) as usize;
            let headers_len = read_u32(&self.buf, 4) as usize;
            if total < MIN_MESSAGE_LEN || PRELUDE_LEN + headers_len + CRC_LEN > total {
                return Err(GatewayError::Stream(format!(
                    "malformed event-stream prelude (total {}, headers {})",
                    total, headers_len
                )));
            }
            if self.buf.len() < total {
                break;
            }

            let frame: Vec<u8> = self.buf.drain(..total).collect();
            let headers_end = PRELUDE_LEN + headers_len;
            let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
            let payload = Bytes::copy_from_slice(&frame[headers_end..total - CRC_LEN]);
            messages.push(EventMessage { headers, payload });
        }
        Ok(messages)
    }

    /// Bytes left over that never formed a complete message
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn parse_headers(mut raw: &[u8]) -> Result<Vec<(String, String)>, GatewayError> {
    let malformed = || GatewayError::Stream("malformed event-stream header block".to_string());
    let mut headers = Vec::new();

    while !raw.is_empty() {
        let name_len = raw[0] as usize;
        if raw.len() < 1 + name_len + 1 {
            return Err(malformed());
        }
        let name = String::from_utf8_lossy(&raw[1..1 + name_len]).to_string();
        let value_type = raw[1 + name_len];
        raw = &raw[2 + name_len..];

        let fixed = match value_type {
            0 | 1 => Some(0),
            2 => Some(1),
            3 => Some(2),
            4 => Some(4),
            5 | 8 => Some(8),
            9 => Some(16),
            6 | 7 => None,
            _ => return Err(malformed()),
        };

        match fixed {
            Some(len) => {
                if raw.len() < len {
                    return Err(malformed());
                }
                raw = &raw[len..];
            }
            None => {
                if raw.len() < 2 {
                    return Err(malformed());
                }
                let len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
                if raw.len() < 2 + len {
                    return Err(malformed());
                }
                if value_type == 7 {
                    headers.push((name, String::from_utf8_lossy(&raw[2..2 + len]).to_string()));
                }
                raw = &raw[2 + len..];
            }
        }
    }
    Ok(headers)
}

/// Encode one message; CRC fields are written as zero
pub fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_block = Vec::new();
    for (name, value) in headers {
        header_block.push(name.len() as u8);
        header_block.extend_from_slice(name.as_bytes());
        header_block.push(7);
        header_block.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_block.extend_from_slice(value.as_bytes());
    }
    let total = PRELUDE_LEN + header_block.len() + payload.len() + CRC_LEN;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&header_block);
    out.extend_from_slice(payload);
    out.extend_from_slice(&0u32.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_split_across_reads() {
        let frame = encode_message(&[(":event-type", "chunk")], b"{\"a\":1}");
        let mut decoder = EventStreamDecoder::new();

        assert!(decoder.push(&frame[..10]).unwrap().is_empty());
        let messages = decoder.push(&frame[10..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].header(":event-type"), Some("chunk"));
        assert_eq!(messages[0].json_payload().as_deref(), Some("{\"a\":1}"));
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_base64_wrapped_payload_unwrapped() {
        let inner = STANDARD.encode("{\"type\":\"message_stop\"}");
        let payload = format!("{{\"bytes\":\"{}\"}}", inner);
        let mut frames = encode_message(&[], payload.as_bytes());
        frames.extend(encode_message(&[], b"{\"b\":2}"));

        let messages = EventStreamDecoder::new().push(&frames).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].json_payload().as_deref(),
            Some("{\"type\":\"message_stop\"}")
        );
    }

    #[test]
    fn test_malformed_prelude_rejected() {
        let mut bad = vec![0, 0, 0, 4];
        bad.extend_from_slice(&[0; 8]);
        assert!(EventStreamDecoder::new().push(&bad).is_err());
    }
}
