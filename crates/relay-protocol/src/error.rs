use thiserror::Error;

/// Errors produced while decoding or encoding packets on the wire.
///
/// These map directly onto the error taxonomy of the protocol: every
/// variant here is something a single malformed or over-sized connection
/// can trigger, and none of them indicate a bug in this crate itself.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("varint is more than 5 bytes long")]
    VarIntTooLong,

    #[error("frame length must be at least 1 byte, got {0}")]
    ShortFrame(i32),

    #[error("compressed packet declared {declared} uncompressed bytes but decompression \
             produced {actual}")]
    CompressedLengthMismatch { declared: i32, actual: usize },

    #[error("failed to decompress packet body: {0}")]
    Decompress(String),

    #[error("failed to decode field: {0}")]
    FieldDecode(String),
}
