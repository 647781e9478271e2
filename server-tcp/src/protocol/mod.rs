use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

// Command type identifiers
pub const CMD_PING: u8 = 0x00;
pub const CMD_PUT: u8 = 0x01;
pub const CMD_GET: u8 = 0x02;
pub const CMD_DELETE: u8 = 0x03;

// Response type identifiers
pub const RESP_PONG: u8 = 0x00;
pub const RESP_OK: u8 = 0x01;
pub const RESP_VALUE: u8 = 0x02;
pub const RESP_NOT_FOUND: u8 = 0x03;
pub const RESP_ERROR: u8 = 0x04;

pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Length-delimited framing shared by client and server:
/// 4-byte big-endian length prefix, frames capped at 8 MiB
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    /// `ttl_ms` of 0 stores without expiry
    Put { key: Bytes, value: Bytes, ttl_ms: u64 },
    Get { key: Bytes },
    Delete { key: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Pong,
    Ok,
    Value { value: Bytes },
    NotFound,
    Error { msg: String },
}

impl Request {
    /// Encode a Request into Bytes for transmission
    ///
    /// Format:
    /// - PING: [0x00]
    /// - PUT: [0x01][key_len: u32][value_len: u32][ttl_ms: u64][key bytes][value bytes]
    /// - GET: [0x02][key_len: u32][key bytes]
    /// - DELETE: [0x03][key_len: u32][key bytes]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Request::Ping => {
                buf.put_u8(CMD_PING);
            }
            Request::Put { key, value, ttl_ms } => {
                buf.put_u8(CMD_PUT);
                buf.put_u32(key.len() as u32);
                buf.put_u32(value.len() as u32);
                buf.put_u64(*ttl_ms);
                buf.put_slice(key);
                buf.put_slice(value);
            }
            Request::Get { key } => {
                buf.put_u8(CMD_GET);
                buf.put_u32(key.len() as u32);
                buf.put_slice(key);
            }
            Request::Delete { key } => {
                buf.put_u8(CMD_DELETE);
                buf.put_u32(key.len() as u32);
                buf.put_slice(key);
            }
        }

        buf.freeze()
    }

    /// Decode a Request from Bytes received from the network
    ///
    /// This is called AFTER LengthDelimitedCodec has extracted the frame,
    /// so we receive a complete message as Bytes
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let cmd = buf.get_u8();

        match cmd {
            CMD_PING => Ok(Request::Ping),
            CMD_PUT => {
                if buf.remaining() < 16 {
                    return Err("Invalid PUT: missing length or ttl fields".to_string());
                }
                let key_len = buf.get_u32() as usize;
                let value_len = buf.get_u32() as usize;
                let ttl_ms = buf.get_u64();

                if buf.remaining() < key_len + value_len {
                    return Err(format!(
                        "Invalid PUT: expected {} bytes, got {}",
                        key_len + value_len,
                        buf.remaining()
                    ));
                }

                let key = buf.copy_to_bytes(key_len);
                let value = buf.copy_to_bytes(value_len);

                Ok(Request::Put { key, value, ttl_ms })
            }
            CMD_GET => Ok(Request::Get {
                key: decode_key(&mut buf, "GET")?,
            }),
            CMD_DELETE => Ok(Request::Delete {
                key: decode_key(&mut buf, "DELETE")?,
            }),
            _ => Err(format!("Unknown command: 0x{:02X}", cmd)),
        }
    }
}

fn decode_key(buf: &mut Bytes, command: &str) -> Result<Bytes, String> {
    if buf.remaining() < 4 {
        return Err(format!("Invalid {command}: missing key length"));
    }
    let key_len = buf.get_u32() as usize;

    if buf.remaining() < key_len {
        return Err(format!(
            "Invalid {command}: expected {} bytes, got {}",
            key_len,
            buf.remaining()
        ));
    }

    Ok(buf.copy_to_bytes(key_len))
}

impl Response {
    /// Encode a Response into Bytes for transmission
    ///
    /// Format:
    /// - PONG: [0x00]
    /// - OK: [0x01]
    /// - VALUE: [0x02][value_len: u32][value bytes]
    /// - NOT_FOUND: [0x03]
    /// - ERROR: [0x04][msg_len: u32][msg bytes]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Response::Pong => {
                buf.put_u8(RESP_PONG);
            }
            Response::Ok => {
                buf.put_u8(RESP_OK);
            }
            Response::Value { value } => {
                buf.put_u8(RESP_VALUE);
                buf.put_u32(value.len() as u32);
                buf.put_slice(value);
            }
            Response::NotFound => {
                buf.put_u8(RESP_NOT_FOUND);
            }
            Response::Error { msg } => {
                buf.put_u8(RESP_ERROR);
                let msg_bytes = msg.as_bytes();
                buf.put_u32(msg_bytes.len() as u32);
                buf.put_slice(msg_bytes);
            }
        }

        buf.freeze()
    }

    /// Decode a Response from Bytes received from the network
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let resp_type = buf.get_u8();

        match resp_type {
            RESP_PONG => Ok(Response::Pong),
            RESP_OK => Ok(Response::Ok),
            RESP_VALUE => {
                if buf.remaining() < 4 {
                    return Err("Invalid VALUE: missing length".to_string());
                }

                let value_len = buf.get_u32() as usize;

                if buf.remaining() < value_len {
                    return Err(format!(
                        "Invalid VALUE: expected {} bytes, got {}",
                        value_len,
                        buf.remaining()
                    ));
                }

                let value = buf.copy_to_bytes(value_len);
                Ok(Response::Value { value })
            }
            RESP_NOT_FOUND => Ok(Response::NotFound),
            RESP_ERROR => {
                if buf.remaining() < 4 {
                    return Err("Invalid ERROR: missing length".to_string());
                }

                let msg_len = buf.get_u32() as usize;

                if buf.remaining() < msg_len {
                    return Err(format!(
                        "Invalid ERROR: expected {} bytes, got {}",
                        msg_len,
                        buf.remaining()
                    ));
                }

                let msg_bytes = buf.copy_to_bytes(msg_len);
                let msg = String::from_utf8_lossy(&msg_bytes).to_string();
                Ok(Response::Error { msg })
            }
            _ => Err(format!("Unknown response type: 0x{:02X}", resp_type)),
        }
    }
}
