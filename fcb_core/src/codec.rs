//! Little-endian primitives shared by the header and feature record codecs.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};

/// Bounds-checked reader over a fully fetched section buffer. Running past
/// the end means the fetched range was shorter than the declared length.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated {
                expected: self.pos + n,
                actual: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// u16-length-prefixed UTF-8 string (short names and labels).
    pub fn read_str16(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Parse(format!("invalid utf-8: {e}")))
    }

    /// u32-length-prefixed UTF-8 string (attribute values, JSON documents).
    pub fn read_str32(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Parse(format!("invalid utf-8: {e}")))
    }

    /// u32-length-prefixed list of u32 values.
    pub fn read_u32_vec(&mut self) -> Result<Vec<u32>> {
        let len = self.read_u32()? as usize;
        let mut values = Vec::with_capacity(len.min(self.remaining() / 4));
        for _ in 0..len {
            values.push(self.read_u32()?);
        }
        Ok(values)
    }
}

pub(crate) fn write_str16(out: &mut Vec<u8>, s: &str) {
    out.write_u16::<LittleEndian>(s.len() as u16)
        .expect("write to Vec cannot fail");
    out.extend_from_slice(s.as_bytes());
}

pub(crate) fn write_str32(out: &mut Vec<u8>, s: &str) {
    out.write_u32::<LittleEndian>(s.len() as u32)
        .expect("write to Vec cannot fail");
    out.extend_from_slice(s.as_bytes());
}

pub(crate) fn write_u32_vec(out: &mut Vec<u8>, values: &[u32]) {
    out.write_u32::<LittleEndian>(values.len() as u32)
        .expect("write to Vec cannot fail");
    for v in values {
        out.write_u32::<LittleEndian>(*v)
            .expect("write to Vec cannot fail");
    }
}
