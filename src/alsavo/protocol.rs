//! Alsavo wire protocol: packet framing, auth messages, payload blocks.
//!
//! Every multi-byte integer on this wire is big-endian, with one exception:
//! the auth confirmation verdict, which the device sends little-endian.

use chrono::{Datelike, Timelike, Utc};
use md5::{Digest, Md5};

use super::error::{AlsavoError, Result};

/// Header tag carried by request packets.
pub const HDR_REQUEST: u8 = 0x32;
/// Header tag carried by device replies.
pub const HDR_RESPONSE: u8 = 0x30;

// Command codes
pub const CMD_AUTH: u16 = 0xf2;
pub const CMD_QUERY: u16 = 0xf4;

/// Packet header length.
pub const HEADER_SIZE: usize = 16;

/// Auth intro payload: action(4) + token(4) + serial(8) + uuid(16) + timestamp(8).
pub const AUTH_INTRO_LEN: u16 = 0x28;
/// Auth response payload: action(4) + digest(16) + timestamp(8).
pub const AUTH_RESPONSE_LEN: u16 = 0x1c;

/// Fixed client identifier sent in every auth intro.
pub const CLIENT_UUID: [u32; 4] = [0x97e8ced0, 0xf83640bc, 0xb4dd57e3, 0x22adc3a0];

/// Verdict the device sends when the auth digest checks out.
pub const AUTH_OK: u32 = 5;

/// Query-all command payload: requests every status+config block.
pub const QUERY_ALL_PAYLOAD: [u8; 12] = [
    0x08, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x2e, 0xff, 0xff, 0x00, 0x00,
];

/// Set-config command template; register index and value follow as
/// big-endian u16.
pub const SET_CONFIG_TEMPLATE: [u8; 12] = [
    0x09, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x2e, 0x00, 0x02, 0x00, 0x04,
];

// Payload block subtypes
pub const SUBTYPE_STATUS: u16 = 1;
pub const SUBTYPE_CONFIG: u16 = 2;
pub const SUBTYPE_DEVICE_INFO: u16 = 3;

const ACT_INTRO: [u8; 4] = [1, 1, 2, 0];
const ACT_CHALLENGE_OK: [u8; 4] = [3, 0, 0, 0];
const ACT_RESPONSE: [u8; 4] = [4, 0, 0, 3];

/// 16-byte header common to every packet.
///
/// Layout: hdr(1) pad(1) seq(2) csid(4) dsid(4) cmd(2) payload_len(2).
/// `payload_len` must equal the byte length of the payload that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub hdr: u8,
    pub pad: u8,
    pub seq: u16,
    pub csid: u32,
    pub dsid: u32,
    pub cmd: u16,
    pub payload_len: u16,
}

impl PacketHeader {
    /// Header for an outgoing request. `seq` is unused by this client and
    /// stays 0.
    pub fn request(csid: u32, dsid: u32, cmd: u16, payload_len: u16) -> Self {
        Self {
            hdr: HDR_REQUEST,
            pad: 0,
            seq: 0,
            csid,
            dsid,
            cmd,
            payload_len,
        }
    }

    /// Bit 1 of the tag is clear on device replies.
    pub fn is_reply(&self) -> bool {
        self.hdr & 2 == 0
    }

    pub fn pack(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.hdr;
        buf[1] = self.pad;
        buf[2..4].copy_from_slice(&self.seq.to_be_bytes());
        buf[4..8].copy_from_slice(&self.csid.to_be_bytes());
        buf[8..12].copy_from_slice(&self.dsid.to_be_bytes());
        buf[12..14].copy_from_slice(&self.cmd.to_be_bytes());
        buf[14..16].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(AlsavoError::Malformed(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            hdr: data[0],
            pad: data[1],
            seq: u16::from_be_bytes([data[2], data[3]]),
            csid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            dsid: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            cmd: u16::from_be_bytes([data[12], data[13]]),
            payload_len: u16::from_be_bytes([data[14], data[15]]),
        })
    }
}

/// 8-byte UTC wall-clock stamp carried by auth packets.
///
/// The trailing byte is nominally a timezone; the protocol always sends
/// the placeholder 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    pub tz: u8,
}

const TZ_PLACEHOLDER: u8 = 2;

impl Timestamp {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            year: now.year() as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            min: now.minute() as u8,
            sec: now.second() as u8,
            tz: TZ_PLACEHOLDER,
        }
    }

    pub fn pack(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&self.year.to_be_bytes());
        buf[2] = self.month;
        buf[3] = self.day;
        buf[4] = self.hour;
        buf[5] = self.min;
        buf[6] = self.sec;
        buf[7] = self.tz;
        buf
    }
}

/// First handshake message: announces the client token and target serial.
#[derive(Debug, Clone)]
pub struct AuthIntro {
    pub client_token: u32,
    pub serial: u64,
    pub timestamp: Timestamp,
}

impl AuthIntro {
    pub fn new(client_token: u32, serial: u64) -> Self {
        Self {
            client_token,
            serial,
            timestamp: Timestamp::now(),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let header = PacketHeader::request(0, 0, CMD_AUTH, AUTH_INTRO_LEN);
        let mut buf = Vec::with_capacity(HEADER_SIZE + AUTH_INTRO_LEN as usize);
        buf.extend_from_slice(&header.pack());
        buf.extend_from_slice(&ACT_INTRO);
        buf.extend_from_slice(&self.client_token.to_be_bytes());
        buf.extend_from_slice(&self.serial.to_be_bytes());
        for word in CLIENT_UUID {
            buf.extend_from_slice(&word.to_be_bytes());
        }
        buf.extend_from_slice(&self.timestamp.pack());
        buf
    }
}

/// Device reply to the intro: session ids in the header, a server token in
/// the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChallenge {
    pub header: PacketHeader,
    pub action: [u8; 4],
    pub server_token: u32,
}

impl AuthChallenge {
    /// The device grants a session with action bytes {3,0,0,0}.
    pub fn is_authorized(&self) -> bool {
        self.action == ACT_CHALLENGE_OK
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + 8);
        buf.extend_from_slice(&self.header.pack());
        buf.extend_from_slice(&self.action);
        buf.extend_from_slice(&self.server_token.to_be_bytes());
        buf
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + 8 {
            return Err(AlsavoError::Malformed(format!(
                "auth challenge needs {} bytes, got {}",
                HEADER_SIZE + 8,
                data.len()
            )));
        }
        let header = PacketHeader::unpack(data)?;
        Ok(Self {
            header,
            action: [data[16], data[17], data[18], data[19]],
            server_token: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        })
    }
}

/// Third handshake message: proves password knowledge via the digest.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub csid: u32,
    pub dsid: u32,
    pub digest: [u8; 16],
    pub timestamp: Timestamp,
}

impl AuthResponse {
    pub fn new(csid: u32, dsid: u32, digest: [u8; 16]) -> Self {
        Self {
            csid,
            dsid,
            digest,
            timestamp: Timestamp::now(),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let header = PacketHeader::request(self.csid, self.dsid, CMD_AUTH, AUTH_RESPONSE_LEN);
        let mut buf = Vec::with_capacity(HEADER_SIZE + AUTH_RESPONSE_LEN as usize);
        buf.extend_from_slice(&header.pack());
        buf.extend_from_slice(&ACT_RESPONSE);
        buf.extend_from_slice(&self.digest);
        buf.extend_from_slice(&self.timestamp.pack());
        buf
    }
}

/// MD5(client_token ‖ server_token ‖ MD5(password)), tokens big-endian.
///
/// The password itself never goes on the wire.
pub fn auth_digest(client_token: u32, server_token: u32, password: &str) -> [u8; 16] {
    let password_hash = Md5::digest(password.as_bytes());
    let mut ctx = Md5::new();
    ctx.update(client_token.to_be_bytes());
    ctx.update(server_token.to_be_bytes());
    ctx.update(password_hash);
    ctx.finalize().into()
}

/// One data block inside a query response: status, config or device info.
///
/// A block spans `size + 8` bytes from its own start. Status and config
/// blocks carry `start_idx`/`indices` in the four bytes after the common
/// prefix, so their data array is `(size - 4) / 2` words; other subtypes
/// have data directly after the prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data_type: u32,
    pub sub_type: u16,
    pub start_idx: u16,
    pub data: Vec<u16>,
}

impl Payload {
    fn has_index_header(sub_type: u16) -> bool {
        matches!(sub_type, SUBTYPE_STATUS | SUBTYPE_CONFIG)
    }

    /// Register lookup relative to `start_idx`; out-of-range reads are 0.
    pub fn value(&self, idx: u16) -> u16 {
        let Some(rel) = idx.checked_sub(self.start_idx) else {
            return 0;
        };
        self.data.get(rel as usize).copied().unwrap_or(0)
    }

    /// Bytes this block occupies on the wire.
    pub fn wire_len(&self) -> usize {
        let index_header = if Self::has_index_header(self.sub_type) { 4 } else { 0 };
        8 + index_header + self.data.len() * 2
    }

    pub fn pack(&self) -> Vec<u8> {
        let index_header = Self::has_index_header(self.sub_type);
        let size = self.data.len() * 2 + if index_header { 4 } else { 0 };
        let mut buf = Vec::with_capacity(8 + size);
        buf.extend_from_slice(&self.data_type.to_be_bytes());
        buf.extend_from_slice(&self.sub_type.to_be_bytes());
        buf.extend_from_slice(&(size as u16).to_be_bytes());
        if index_header {
            buf.extend_from_slice(&self.start_idx.to_be_bytes());
            buf.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        }
        for word in &self.data {
            buf.extend_from_slice(&word.to_be_bytes());
        }
        buf
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(AlsavoError::Malformed(format!(
                "payload block needs 8 bytes, got {}",
                data.len()
            )));
        }
        let data_type = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let sub_type = u16::from_be_bytes([data[4], data[5]]);
        let size = u16::from_be_bytes([data[6], data[7]]) as usize;
        if size % 2 != 0 {
            return Err(AlsavoError::Malformed(format!("odd payload size {size}")));
        }
        if data.len() < 8 + size {
            return Err(AlsavoError::Malformed(format!(
                "payload block truncated: size {size}, {} bytes left",
                data.len() - 8
            )));
        }
        let (start_idx, words) = if Self::has_index_header(sub_type) {
            if size < 4 {
                return Err(AlsavoError::Malformed(format!(
                    "indexed payload size {size} below minimum 4"
                )));
            }
            let start_idx = u16::from_be_bytes([data[8], data[9]]);
            (start_idx, &data[12..8 + size])
        } else {
            (0, &data[8..8 + size])
        };
        let values = words
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            data_type,
            sub_type,
            start_idx,
            data: values,
        })
    }
}

/// Full snapshot from one query-all exchange.
///
/// Holds at most one status, config and device-info block each; a repeated
/// subtype overwrites the earlier block. `parts == 0` means the pump sent
/// no data and should be treated as offline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResponse {
    pub action: u8,
    pub parts: u8,
    status: Option<Payload>,
    config: Option<Payload>,
    device_info: Option<Payload>,
}

impl QueryResponse {
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(AlsavoError::Malformed(format!(
                "query response needs 4 bytes, got {}",
                data.len()
            )));
        }
        // data[2..4] is reserved padding
        let mut resp = Self {
            action: data[0],
            parts: data[1],
            ..Self::default()
        };
        let mut idx = 4;
        while idx < data.len() {
            let block = Payload::unpack(&data[idx..])?;
            idx += block.wire_len();
            match block.sub_type {
                SUBTYPE_STATUS => resp.status = Some(block),
                SUBTYPE_CONFIG => resp.config = Some(block),
                SUBTYPE_DEVICE_INFO => resp.device_info = Some(block),
                _ => {}
            }
        }
        Ok(resp)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = vec![self.action, self.parts, 0, 0];
        for block in [&self.status, &self.config, &self.device_info]
            .into_iter()
            .flatten()
        {
            buf.extend_from_slice(&block.pack());
        }
        buf
    }

    pub fn device_info(&self) -> Option<&Payload> {
        self.device_info.as_ref()
    }

    pub fn status_value(&self, idx: u16) -> u16 {
        self.status.as_ref().map_or(0, |block| block.value(idx))
    }

    pub fn config_value(&self, idx: u16) -> u16 {
        self.config.as_ref().map_or(0, |block| block.value(idx))
    }

    /// Status word reinterpreted as a signed 16-bit quantity.
    pub fn signed_status_value(&self, idx: u16) -> i16 {
        self.status_value(idx) as i16
    }

    pub fn signed_config_value(&self, idx: u16) -> i16 {
        self.config_value(idx) as i16
    }

    /// Temperature registers are signed fixed-point, one decimal.
    pub fn status_temperature(&self, idx: u16) -> f64 {
        f64::from(self.signed_status_value(idx)) / 10.0
    }

    pub fn config_temperature(&self, idx: u16) -> f64 {
        f64::from(self.signed_config_value(idx)) / 10.0
    }
}
