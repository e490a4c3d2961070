use std::io::Write;

use byteorder::ReadBytesExt;

use crate::error::CodecError;

/// A signed 32-bit integer encoded with the protocol's variable-length
/// scheme: 7 data bits per byte, LSB-first, with bit 7 of each byte set
/// when another byte follows.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct VarInt(pub i32);

impl VarInt {
    /// The maximum number of bytes a `VarInt` can occupy on the wire.
    pub const MAX_SIZE: usize = 5;

    /// The exact number of bytes [`Self::encode`] will write.
    pub fn written_size(self) -> usize {
        match self.0 {
            0 => 1,
            n => (31 - (n as u32).leading_zeros() as usize) / 7 + 1,
        }
    }

    pub fn encode(self, mut w: impl Write) -> Result<(), CodecError> {
        let mut value = self.0 as u32;
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            w.write_all(&[byte])
                .map_err(|e| CodecError::FieldDecode(e.to_string()))?;
            if value == 0 {
                return Ok(());
            }
        }
    }

    /// Decodes a `VarInt` from the front of `r`, advancing `r` past the
    /// bytes consumed.
    pub fn decode(r: &mut &[u8]) -> Result<Self, CodecError> {
        let mut val: i32 = 0;
        for i in 0..Self::MAX_SIZE {
            let byte = r
                .read_u8()
                .map_err(|_| CodecError::FieldDecode("unexpected end of buffer".into()))?;
            val |= ((byte & 0x7F) as i32) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(VarInt(val));
            }
        }
        Err(CodecError::VarIntTooLong)
    }
}

impl From<i32> for VarInt {
    fn from(v: i32) -> Self {
        VarInt(v)
    }
}

impl From<VarInt> for i32 {
    fn from(v: VarInt) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::*;

    #[test]
    fn written_size_matches_encoded_length() {
        let mut buf = Vec::new();
        let mut rng = thread_rng();

        for n in (0..100_000)
            .map(|_| rng.gen())
            .chain([0, 1, -1, i32::MIN, i32::MAX])
        {
            buf.clear();
            VarInt(n).encode(&mut buf).unwrap();
            assert_eq!(buf.len(), VarInt(n).written_size());
        }
    }

    #[test]
    fn round_trip() {
        let mut buf = Vec::new();
        let mut rng = thread_rng();

        for n in (0..1_000_000)
            .map(|_| rng.gen())
            .chain([0, 1, -1, i32::MIN, i32::MAX])
        {
            buf.clear();
            VarInt(n).encode(&mut buf).unwrap();
            assert!(buf.len() <= VarInt::MAX_SIZE);

            let mut slice = buf.as_slice();
            assert_eq!(VarInt::decode(&mut slice).unwrap().0, n);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn boundary_table() {
        // 7 bits per byte: 1 byte covers up to 2^7-1, 2 bytes up to 2^14-1, etc.
        let cases: &[(i32, usize)] = &[
            (0, 1),
            (1, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
            (268_435_455, 4),
            (268_435_456, 5),
            (-1, 5),
            (i32::MIN, 5),
            (i32::MAX, 5),
        ];
        for &(n, expected_len) in cases {
            assert_eq!(VarInt(n).written_size(), expected_len, "n={n}");
            let mut buf = Vec::new();
            VarInt(n).encode(&mut buf).unwrap();
            assert_eq!(buf.len(), expected_len, "n={n}");
        }
    }

    #[test]
    fn too_many_continuation_bytes_errors() {
        let buf = [0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut slice = &buf[..];
        assert!(matches!(
            VarInt::decode(&mut slice),
            Err(CodecError::VarIntTooLong)
        ));
    }
}
