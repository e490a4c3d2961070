//! Type-directed field encoding/decoding ("Marshal"/"Scan" in the
//! original), used to build and read packet payloads once framing has
//! already stripped the length prefix and packet id.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};

use crate::error::CodecError;
use crate::var_int::VarInt;

/// The maximum length in bytes of a string field. Matches the protocol's
/// handshake server-address limit; callers that need a different cap
/// (e.g. usernames) pass their own limit to [`read_string`].
pub const MAX_STRING_LEN: usize = 32_767;

pub trait Encode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), CodecError>;
}

pub trait Decode<'a>: Sized {
    fn decode(r: &mut &'a [u8]) -> Result<Self, CodecError>;
}

impl Encode for VarInt {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        VarInt::encode(*self, buf)
    }
}

impl<'a> Decode<'a> for VarInt {
    fn decode(r: &mut &'a [u8]) -> Result<Self, CodecError> {
        VarInt::decode(r)
    }
}

impl Encode for bool {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl<'a> Decode<'a> for bool {
    fn decode(r: &mut &'a [u8]) -> Result<Self, CodecError> {
        let b = r
            .read_u8()
            .map_err(|_| CodecError::FieldDecode("unexpected end of buffer (bool)".into()))?;
        Ok(b != 0)
    }
}

impl Encode for u16 {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.write_u16::<BE>(*self)
            .map_err(|e| CodecError::FieldDecode(e.to_string()))
    }
}

impl<'a> Decode<'a> for u16 {
    fn decode(r: &mut &'a [u8]) -> Result<Self, CodecError> {
        r.read_u16::<BE>()
            .map_err(|_| CodecError::FieldDecode("unexpected end of buffer (u16)".into()))
    }
}

impl Encode for i64 {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.write_i64::<BE>(*self)
            .map_err(|e| CodecError::FieldDecode(e.to_string()))
    }
}

impl<'a> Decode<'a> for i64 {
    fn decode(r: &mut &'a [u8]) -> Result<Self, CodecError> {
        r.read_i64::<BE>()
            .map_err(|_| CodecError::FieldDecode("unexpected end of buffer (i64)".into()))
    }
}

impl Encode for str {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        VarInt(self.len() as i32).encode(buf)?;
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

/// Reads a varint-length-prefixed UTF-8 string, rejecting byte lengths
/// greater than `max_len`.
pub fn read_string<'a>(r: &mut &'a [u8], max_len: usize) -> Result<String, CodecError> {
    let len = VarInt::decode(r)?.0;
    if len < 0 {
        return Err(CodecError::FieldDecode("negative string length".into()));
    }
    let len = len as usize;
    if len > max_len {
        return Err(CodecError::FieldDecode(format!(
            "string length {len} exceeds limit {max_len}"
        )));
    }
    if r.len() < len {
        return Err(CodecError::FieldDecode(
            "unexpected end of buffer (string body)".into(),
        ));
    }
    let (bytes, rest) = r.split_at(len);
    *r = rest;
    String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::FieldDecode(e.to_string()))
}

pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    // `str::encode` cannot fail for a length-prefixed UTF-8 string.
    Encode::encode(s, buf).expect("string encode is infallible");
}
