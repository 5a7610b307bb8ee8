use std::io::{Read, Write};

use anyhow::bail;
use byteorder::ReadBytesExt;
use thiserror::Error;

use crate::{Decode, Encode};

/// A `u32` encoded with variable length. Used for frame lengths and for the
/// length prefixes of strings and sequences.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct VarUint(pub u32);

impl VarUint {
    /// The maximum number of bytes a `VarUint` occupies on the wire.
    pub const MAX_SIZE: usize = 5;

    /// Returns the exact number of bytes this value will write when
    /// [`Encode::encode`] is called, assuming no error occurs.
    pub fn written_size(self) -> usize {
        match self.0 {
            0 => 1,
            n => (31 - n.leading_zeros() as usize) / 7 + 1,
        }
    }

    /// Decodes from a reader that may end mid-value, distinguishing "need
    /// more bytes" from a malformed value. Used by the frame decoder.
    pub fn decode_partial(mut r: impl Read) -> Result<u32, VarUintDecodeError> {
        let mut val = 0;
        for i in 0..Self::MAX_SIZE {
            let byte = r.read_u8().map_err(|_| VarUintDecodeError::Incomplete)?;
            val |= u32::from(byte & 0x7F) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(val);
            }
        }

        Err(VarUintDecodeError::TooLarge)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
pub enum VarUintDecodeError {
    #[error("incomplete VarUint decode")]
    Incomplete,
    #[error("VarUint is too large")]
    TooLarge,
}

impl Encode for VarUint {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        let mut n = self.0;
        loop {
            let byte = (n & 0x7F) as u8;
            n >>= 7;
            if n == 0 {
                w.write_all(&[byte])?;
                return Ok(());
            }
            w.write_all(&[byte | 0x80])?;
        }
    }
}

impl Decode<'_> for VarUint {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let mut val = 0;
        for i in 0..Self::MAX_SIZE {
            let byte = r.read_u8()?;
            val |= u32::from(byte & 0x7F) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(VarUint(val));
            }
        }
        bail!("VarUint is too large")
    }
}

impl From<u32> for VarUint {
    fn from(n: u32) -> Self {
        VarUint(n)
    }
}

impl From<VarUint> for u32 {
    fn from(n: VarUint) -> Self {
        n.0
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::*;

    #[test]
    fn var_uint_written_size() {
        let mut rng = thread_rng();
        let mut buf = vec![];

        for n in (0..100_000).map(|_| rng.gen()).chain([0, u32::MAX]).map(VarUint) {
            buf.clear();
            n.encode(&mut buf).unwrap();
            assert_eq!(buf.len(), n.written_size());
        }
    }

    #[test]
    fn var_uint_round_trip() {
        let mut rng = thread_rng();
        let mut buf = vec![];

        for n in (0..1_000_000).map(|_| rng.gen()).chain([0, u32::MAX]) {
            VarUint(n).encode(&mut buf).unwrap();

            let mut slice = buf.as_slice();
            assert!(slice.len() <= VarUint::MAX_SIZE);

            assert_eq!(n, VarUint::decode(&mut slice).unwrap().0);

            assert!(slice.is_empty());
            buf.clear();
        }
    }

    #[test]
    fn partial_decode_reports_incomplete() {
        let mut buf = vec![];
        VarUint(300_000).encode(&mut buf).unwrap();

        for cut in 0..buf.len() {
            assert_eq!(
                VarUint::decode_partial(&buf[..cut]),
                Err(VarUintDecodeError::Incomplete)
            );
        }

        assert_eq!(VarUint::decode_partial(&buf[..]), Ok(300_000));
    }
}
