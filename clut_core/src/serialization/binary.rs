use std::io::{Read, Write};

use crate::error::{ClutError, Result};

/// Upper bound on the capacity reserved up front for a length read from the input.
pub(crate) const MAX_PREALLOCATION: usize = 1 << 20;

/// Reads exactly `len` bytes without trusting `len` for the allocation.
pub(crate) fn read_len_prefixed<R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(MAX_PREALLOCATION));
    (&mut *reader).take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(ClutError::format(format!("Truncated input: expected {len} bytes, found {}", buf.len())));
    }
    Ok(buf)
}

/// Little-endian primitives, 7-bit group integers and length-prefixed strings.
pub(crate) trait BinaryRead: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_i32_le(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// A non-negative `i32` count or size.
    fn read_count(&mut self) -> Result<usize> {
        let n = self.read_i32_le()?;
        usize::try_from(n).map_err(|_| ClutError::format(format!("Negative count {n}")))
    }

    fn read_7bit_u64(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ClutError::format("7-bit encoded integer is too long"))
    }

    fn read_7bit_u32(&mut self) -> Result<u32> {
        let value = self.read_7bit_u64()?;
        u32::try_from(value).map_err(|_| ClutError::format(format!("7-bit encoded integer {value} exceeds 32 bits")))
    }

    fn read_7bit_i64(&mut self) -> Result<i64> {
        Ok(self.read_7bit_u64()? as i64)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_7bit_u32()? as usize;
        let buf = read_len_prefixed(self, len)?;
        String::from_utf8(buf).map_err(|e| ClutError::format(format!("Invalid UTF-8 string: {e}")))
    }
}

impl<R: Read + ?Sized> BinaryRead for R {}

pub(crate) trait BinaryWrite: Write {
    fn write_u8(&mut self, value: u8) -> Result<()> {
        Ok(self.write_all(&[value])?)
    }

    fn write_u16_le(&mut self, value: u16) -> Result<()> {
        Ok(self.write_all(&value.to_le_bytes())?)
    }

    fn write_i32_le(&mut self, value: i32) -> Result<()> {
        Ok(self.write_all(&value.to_le_bytes())?)
    }

    fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count).map_err(|_| ClutError::validation(format!("Count {count} does not fit in 32 bits")))?;
        self.write_i32_le(count)
    }

    fn write_7bit_u64(&mut self, mut value: u64) -> Result<()> {
        let mut buf = [0u8; 10];
        let mut len = 0;
        while value >= 0x80 {
            buf[len] = (value as u8) | 0x80;
            value >>= 7;
            len += 1;
        }
        buf[len] = value as u8;
        Ok(self.write_all(&buf[..=len])?)
    }

    fn write_7bit_u32(&mut self, value: u32) -> Result<()> {
        self.write_7bit_u64(value as u64)
    }

    /// Negative values are written as their two's complement bit pattern.
    fn write_7bit_i64(&mut self, value: i64) -> Result<()> {
        self.write_7bit_u64(value as u64)
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len()).map_err(|_| ClutError::validation("String too long"))?;
        self.write_7bit_u32(len)?;
        Ok(self.write_all(value.as_bytes())?)
    }
}

impl<W: Write + ?Sized> BinaryWrite for W {}
