//! Packet framing and the optional zlib compression wrapper.
//!
//! Everything in this module is a pure function over byte buffers: no
//! sockets, no async, no timeouts. Callers feed it bytes as they arrive
//! and ask whether a full frame is buffered yet.

use std::io::Read;

use bytes::{Buf, BytesMut};
use flate2::bufread::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::error::CodecError;
use crate::var_int::VarInt;

/// A single decoded packet: its id and payload, with framing and
/// compression already stripped away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }
}

/// Largest packet body this proxy will ever construct or accept for the
/// handshake/login/status exchanges it actually parses. Generous enough
/// for any legitimate vhost/username/status-JSON payload while bounding
/// how much a malicious length prefix can make us allocate.
pub const MAX_PACKET_SIZE: i32 = 2 * 1024 * 1024;

/// Encodes one packet into the wire's length-prefixed framing.
///
/// `threshold` mirrors the protocol's compression threshold: `<= 0`
/// disables compression entirely (no inner length prefix); `> 0` means
/// bodies at or above the threshold are zlib-compressed, and smaller
/// ones are sent with a `VarInt(0)` "not compressed" sentinel.
pub fn write_packet(pk: &Packet, threshold: i32) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::with_capacity(1 + pk.payload.len());
    body.push(pk.id);
    body.extend_from_slice(&pk.payload);

    let mut out = Vec::new();

    if threshold > 0 {
        if body.len() >= threshold as usize {
            let mut compressed = Vec::new();
            let mut z = ZlibEncoder::new(body.as_slice(), Compression::new(4));
            z.read_to_end(&mut compressed)
                .map_err(|e| CodecError::Decompress(e.to_string()))?;

            let data_len = VarInt(body.len() as i32);
            let inner_len = data_len.written_size() + compressed.len();
            ensure_packet_size(inner_len)?;

            VarInt(inner_len as i32).encode(&mut out)?;
            data_len.encode(&mut out)?;
            out.extend_from_slice(&compressed);
        } else {
            let inner_len = 1 + body.len();
            ensure_packet_size(inner_len)?;

            VarInt(inner_len as i32).encode(&mut out)?;
            VarInt(0).encode(&mut out)?;
            out.extend_from_slice(&body);
        }
    } else {
        ensure_packet_size(body.len())?;
        VarInt(body.len() as i32).encode(&mut out)?;
        out.extend_from_slice(&body);
    }

    Ok(out)
}

fn ensure_packet_size(len: usize) -> Result<(), CodecError> {
    if len as i32 > MAX_PACKET_SIZE {
        return Err(CodecError::FieldDecode(format!(
            "packet of {len} bytes exceeds the {MAX_PACKET_SIZE} byte limit"
        )));
    }
    Ok(())
}

/// Reads exactly one frame out of `buf`, which must contain the whole
/// frame already (no partial reads). Use [`FrameDecoder`] when reading
/// incrementally from a socket.
pub fn read_packet(buf: &[u8], compressed: bool) -> Result<Packet, CodecError> {
    let mut r = buf;
    let len = VarInt::decode(&mut r)?.0;
    if len < 1 {
        return Err(CodecError::ShortFrame(len));
    }
    if r.len() < len as usize {
        return Err(CodecError::FieldDecode(
            "buffer does not contain a full frame".into(),
        ));
    }
    let mut body = &r[..len as usize];
    decode_body(&mut body, compressed)
}

fn decode_body(body: &mut &[u8], compressed: bool) -> Result<Packet, CodecError> {
    if compressed {
        let data_len = VarInt::decode(body)?.0;
        if data_len == 0 {
            // Sentinel: payload was not compressed.
            return decode_plain(body);
        }
        if data_len < 0 || data_len > MAX_PACKET_SIZE {
            return Err(CodecError::CompressedLengthMismatch {
                declared: data_len,
                actual: 0,
            });
        }
        let mut decompressed = Vec::with_capacity(data_len as usize);
        let mut z = ZlibDecoder::new(*body).take(data_len as u64);
        z.read_to_end(&mut decompressed)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        if decompressed.len() != data_len as usize {
            return Err(CodecError::CompressedLengthMismatch {
                declared: data_len,
                actual: decompressed.len(),
            });
        }
        let mut r = decompressed.as_slice();
        decode_plain(&mut r)
    } else {
        decode_plain(body)
    }
}

fn decode_plain(body: &mut &[u8]) -> Result<Packet, CodecError> {
    if body.is_empty() {
        return Err(CodecError::ShortFrame(0));
    }
    let id = body[0];
    let payload = body[1..].to_vec();
    Ok(Packet { id, payload })
}

/// Incremental frame decoder for use over a live, possibly-partial byte
/// stream: feed it bytes via [`Self::queue_bytes`] after every socket
/// read and call [`Self::try_next_packet`] until it returns `None`.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    compression_enabled: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_compression(&mut self, enabled: bool) {
        self.compression_enabled = enabled;
    }

    pub fn queue_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempts to pull one complete frame out of the buffered bytes.
    /// Returns `Ok(None)` if more bytes are needed; does not consume the
    /// buffer in that case. Also returns the raw bytes of the frame (the
    /// length prefix plus the body) so callers that need to replay the
    /// frame verbatim to another connection can do so.
    pub fn try_next_packet(&mut self) -> Result<Option<(Packet, Vec<u8>)>, CodecError> {
        let mut r = &self.buf[..];
        let len = match VarInt::decode(&mut r) {
            Ok(v) => v.0,
            Err(CodecError::FieldDecode(_)) => return Ok(None), // ran out of bytes
            Err(e) => return Err(e),
        };

        if len < 1 {
            return Err(CodecError::ShortFrame(len));
        }
        if len as i32 > MAX_PACKET_SIZE {
            return Err(CodecError::FieldDecode(format!(
                "frame length {len} exceeds the {MAX_PACKET_SIZE} byte limit"
            )));
        }

        let header_len = self.buf.len() - r.len();
        let total_len = header_len + len as usize;

        if self.buf.len() < total_len {
            return Ok(None);
        }

        let raw = self.buf[..total_len].to_vec();
        let mut body = &self.buf[header_len..total_len];
        let packet = decode_body(&mut body, self.compression_enabled)?;

        self.buf.advance(total_len);

        Ok(Some((packet, raw)))
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }
}
