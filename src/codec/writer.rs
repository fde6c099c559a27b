//! Typed primitive encoding into a request buffer.
//!
//! A [`WireWriter`] accumulates one request (or one server-side response in
//! tests) in memory; the finished buffer is written to the socket in a single
//! `write_all` + flush. All fixed-width integers are Big Endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::compress::write_varint;
use crate::error::{LinkError, Result};

/// Maximum byte length of a bounded string.
///
/// Anything larger must travel as a long string ([`WireWriter::write_long_string`]).
pub const MAX_STRING_LEN: usize = 1 << 20;

/// Buffered encoder for the wire primitive set.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Create a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes encoded so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been encoded.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and take the encoded buffer.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.buf.put_u8(v);
        Ok(())
    }

    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        self.buf.put_i8(v);
        Ok(())
    }

    /// Booleans travel as a single byte, 1 for true and 0 for false.
    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.buf.put_u8(u8::from(v));
        Ok(())
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.buf.put_i16(v);
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.buf.put_i32(v);
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.buf.put_i64(v);
        Ok(())
    }

    /// Write a compressed integer (see [`crate::codec::compress`]).
    pub fn write_compressed(&mut self, v: i64) -> Result<()> {
        write_varint(&mut self.buf, v);
        Ok(())
    }

    /// Raw byte block, no length prefix. The caller owns the framing.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Bounded UTF-8 string: compressed byte length, then the bytes.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        if s.len() > MAX_STRING_LEN {
            return Err(LinkError::Protocol(format!(
                "string of {} bytes exceeds bounded maximum {}",
                s.len(),
                MAX_STRING_LEN
            )));
        }
        self.write_compressed(s.len() as i64)?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// Size-unbounded UTF-8 string: u32 byte length, then the bytes.
    pub fn write_long_string(&mut self, s: &str) -> Result<()> {
        if s.len() > u32::MAX as usize {
            return Err(LinkError::Protocol(format!(
                "long string of {} bytes exceeds u32 length prefix",
                s.len()
            )));
        }
        self.buf.put_u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// An enum travels as its compressed ordinal.
    pub fn write_enum_ordinal(&mut self, ordinal: u16) -> Result<()> {
        self.write_compressed(i64::from(ordinal))
    }

    // Nullable variants: a presence flag precedes the value.

    pub fn write_nullable_bool(&mut self, v: Option<bool>) -> Result<()> {
        self.write_bool(v.is_some())?;
        if let Some(v) = v {
            self.write_bool(v)?;
        }
        Ok(())
    }

    pub fn write_nullable_i16(&mut self, v: Option<i16>) -> Result<()> {
        self.write_bool(v.is_some())?;
        if let Some(v) = v {
            self.write_i16(v)?;
        }
        Ok(())
    }

    pub fn write_nullable_i32(&mut self, v: Option<i32>) -> Result<()> {
        self.write_bool(v.is_some())?;
        if let Some(v) = v {
            self.write_i32(v)?;
        }
        Ok(())
    }

    pub fn write_nullable_i64(&mut self, v: Option<i64>) -> Result<()> {
        self.write_bool(v.is_some())?;
        if let Some(v) = v {
            self.write_i64(v)?;
        }
        Ok(())
    }

    pub fn write_nullable_string(&mut self, v: Option<&str>) -> Result<()> {
        self.write_bool(v.is_some())?;
        if let Some(v) = v {
            self.write_string(v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_big_endian() {
        let mut w = WireWriter::new();
        w.write_i16(0x0102).unwrap();
        w.write_i32(0x0304_0506).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn test_bool_encoding() {
        let mut w = WireWriter::new();
        w.write_bool(true).unwrap();
        w.write_bool(false).unwrap();
        assert_eq!(&w.into_bytes()[..], &[1, 0]);
    }

    #[test]
    fn test_bounded_string_layout() {
        let mut w = WireWriter::new();
        w.write_string("hi").unwrap();
        // compressed length 2 = zigzag 4 = 0x04, then the bytes
        assert_eq!(&w.into_bytes()[..], &[0x04, b'h', b'i']);
    }

    #[test]
    fn test_bounded_string_limit() {
        let big = "x".repeat(MAX_STRING_LEN + 1);
        let mut w = WireWriter::new();
        assert!(matches!(
            w.write_string(&big),
            Err(LinkError::Protocol(_))
        ));
    }

    #[test]
    fn test_long_string_layout() {
        let mut w = WireWriter::new();
        w.write_long_string("abc").unwrap();
        assert_eq!(&w.into_bytes()[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_nullable_presence_flag() {
        let mut w = WireWriter::new();
        w.write_nullable_i32(None).unwrap();
        w.write_nullable_i32(Some(7)).unwrap();
        assert_eq!(&w.into_bytes()[..], &[0, 1, 0, 0, 0, 7]);
    }

    #[test]
    fn test_empty_writer() {
        let w = WireWriter::new();
        assert!(w.is_empty());
        assert_eq!(w.len(), 0);
    }
}
