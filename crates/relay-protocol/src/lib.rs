//! Pure, no-I/O codec for the subset of the Minecraft Java Edition wire
//! protocol this proxy needs to understand: variable-length integers,
//! length-prefixed (optionally zlib-compressed) packet framing, and the
//! handful of fields that appear in the handshake, login-start, and
//! status/ping packets.

pub mod codec;
pub mod error;
pub mod fields;
pub mod packets;
pub mod var_int;

pub use codec::{read_packet, write_packet, FrameDecoder, Packet, MAX_PACKET_SIZE};
pub use error::CodecError;
pub use fields::{Decode, Encode};
pub use var_int::VarInt;
