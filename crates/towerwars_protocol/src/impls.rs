//! `Encode`/`Decode` implementations for primitives and std types.

use std::io::Write;

use anyhow::{bail, ensure};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec2;
use uuid::Uuid;

use crate::{Decode, Encode, VarUint, MAX_STRING_SIZE};

impl Encode for bool {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u8(u8::from(*self))?)
    }
}

impl Decode<'_> for bool {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        match r.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            n => bail!("invalid bool byte {n}"),
        }
    }
}

impl Encode for u8 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u8(*self)?)
    }
}

impl Decode<'_> for u8 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u8()?)
    }
}

impl Encode for i8 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_i8(*self)?)
    }
}

impl Decode<'_> for i8 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_i8()?)
    }
}

impl Encode for u16 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u16::<LittleEndian>(*self)?)
    }
}

impl Decode<'_> for u16 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u16::<LittleEndian>()?)
    }
}

impl Encode for u32 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LittleEndian>(*self)?)
    }
}

impl Decode<'_> for u32 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u32::<LittleEndian>()?)
    }
}

impl Encode for i32 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_i32::<LittleEndian>(*self)?)
    }
}

impl Decode<'_> for i32 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_i32::<LittleEndian>()?)
    }
}

impl Encode for u64 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u64::<LittleEndian>(*self)?)
    }
}

impl Decode<'_> for u64 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u64::<LittleEndian>()?)
    }
}

impl Encode for f32 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_f32::<LittleEndian>(*self)?)
    }
}

impl Decode<'_> for f32 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_f32::<LittleEndian>()?)
    }
}

impl Encode for f64 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_f64::<LittleEndian>(*self)?)
    }
}

impl Decode<'_> for f64 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_f64::<LittleEndian>()?)
    }
}

impl Encode for str {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        ensure!(
            self.len() <= MAX_STRING_SIZE,
            "byte length of string exceeds maximum (expected <= {MAX_STRING_SIZE}, got {})",
            self.len()
        );

        VarUint(self.len() as u32).encode(&mut w)?;
        Ok(w.write_all(self.as_bytes())?)
    }
}

impl<'a> Decode<'a> for &'a str {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let len = VarUint::decode(r)?.0 as usize;
        ensure!(
            len <= MAX_STRING_SIZE,
            "byte length of string exceeds maximum (expected <= {MAX_STRING_SIZE}, got {len})"
        );
        ensure!(
            len <= r.len(),
            "not enough data remaining to decode string of {len} bytes"
        );

        let (res, remaining) = r.split_at(len);
        let res = std::str::from_utf8(res)?;
        *r = remaining;

        Ok(res)
    }
}

impl Encode for String {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.as_str().encode(w)
    }
}

impl Decode<'_> for String {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(<&str>::decode(r)?.into())
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        match self {
            Some(t) => {
                true.encode(&mut w)?;
                t.encode(w)
            }
            None => false.encode(w),
        }
    }
}

impl<'a, T: Decode<'a>> Decode<'a> for Option<T> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        Ok(if bool::decode(r)? {
            Some(T::decode(r)?)
        } else {
            None
        })
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        VarUint(self.len() as u32).encode(&mut w)?;
        for value in self {
            value.encode(&mut w)?;
        }
        Ok(())
    }
}

impl<'a, T: Decode<'a>> Decode<'a> for Vec<T> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let len = VarUint::decode(r)?.0 as usize;
        // Every element takes at least one byte, so a length beyond the
        // remaining input is malformed rather than merely incomplete.
        ensure!(
            len <= r.len(),
            "not enough data remaining to decode sequence of {len} elements"
        );

        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(T::decode(r)?);
        }
        Ok(vec)
    }
}

impl Encode for Uuid {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u128::<LittleEndian>(self.as_u128())?)
    }
}

impl Decode<'_> for Uuid {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Uuid::from_u128(r.read_u128::<LittleEndian>()?))
    }
}

impl Encode for Vec2 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.x.encode(&mut w)?;
        self.y.encode(w)
    }
}

impl Decode<'_> for Vec2 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Vec2::new(f32::decode(r)?, f32::decode(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut buf = vec![];
        "hello zone".encode(&mut buf).unwrap();

        let mut r = buf.as_slice();
        assert_eq!(<&str>::decode(&mut r).unwrap(), "hello zone");
        assert!(r.is_empty());
    }

    #[test]
    fn bool_rejects_garbage() {
        let mut r: &[u8] = &[2];
        assert!(bool::decode(&mut r).is_err());
    }

    #[test]
    fn sequence_length_is_bounded_by_input() {
        let mut buf = vec![];
        VarUint(1000).encode(&mut buf).unwrap();
        buf.extend_from_slice(&[0; 4]);

        let mut r = buf.as_slice();
        assert!(Vec::<u32>::decode(&mut r).is_err());
    }
}
