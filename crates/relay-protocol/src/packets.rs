//! The four packet shapes this proxy actually needs to parse or
//! synthesize: the client handshake, login-start, and (for the offline
//! status path) the status response and ping.

use crate::error::CodecError;
use crate::fields::{read_string, write_string, Decode, Encode};
use crate::var_int::VarInt;

pub const HANDSHAKE_PACKET_ID: u8 = 0x00;
pub const STATUS_REQUEST_PACKET_ID: u8 = 0x00;
pub const STATUS_RESPONSE_PACKET_ID: u8 = 0x00;
pub const PING_PACKET_ID: u8 = 0x01;
pub const LOGIN_START_PACKET_ID: u8 = 0x00;

/// Maximum length of the handshake's `server_address` field, per the
/// protocol (it must fit a hostname plus the Forge/FML marker suffix).
pub const MAX_SERVER_ADDRESS_LEN: usize = 255;

/// Generous cap on a login username. Vanilla usernames are at most 16
/// characters, but some auth proxies (BungeeCord/Velocity forwarding)
/// pack extra data into this field upstream of us, so we stay lenient.
pub const MAX_USERNAME_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
}

impl NextState {
    pub fn from_var_int(v: i32) -> Result<Self, CodecError> {
        match v {
            1 => Ok(NextState::Status),
            2 => Ok(NextState::Login),
            other => Err(CodecError::FieldDecode(format!(
                "unknown next_state {other}"
            ))),
        }
    }

    pub fn as_var_int(self) -> VarInt {
        match self {
            NextState::Status => VarInt(1),
            NextState::Login => VarInt(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

impl Handshake {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = payload;
        let protocol_version = VarInt::decode(&mut r)?.0;
        let server_address = read_string(&mut r, MAX_SERVER_ADDRESS_LEN)?;
        let server_port = u16::decode(&mut r)?;
        let next_state = NextState::from_var_int(VarInt::decode(&mut r)?.0)?;
        Ok(Handshake {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        VarInt(self.protocol_version)
            .encode(&mut buf)
            .expect("varint encode is infallible");
        write_string(&mut buf, &self.server_address);
        Encode::encode(&self.server_port, &mut buf).expect("u16 encode is infallible");
        self.next_state
            .as_var_int()
            .encode(&mut buf)
            .expect("varint encode is infallible");
        buf
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginStart {
    pub username: String,
}

impl LoginStart {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = payload;
        let username = read_string(&mut r, MAX_USERNAME_LEN)?;
        Ok(LoginStart { username })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusResponse {
    pub json: String,
}

impl StatusResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_string(&mut buf, &self.json);
        buf
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ping {
    pub payload: i64,
}

impl Ping {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = payload;
        Ok(Ping {
            payload: i64::decode(&mut r)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        Encode::encode(&self.payload, &mut buf).expect("i64 encode is infallible");
        buf
    }
}
