//! Compressed (variable-length) integer encoding.
//!
//! Integers travel as zig-zag mapped base-128 varints, least significant
//! group first, high bit of each byte set while more bytes follow:
//!
//! ```text
//! value   zig-zag   wire bytes
//!     0         0   0x00
//!    -1         1   0x01
//!     1         2   0x02
//!    63       126   0x7E
//!    64       128   0x80 0x01
//! ```
//!
//! A 64-bit value needs at most 10 bytes. Overlong encodings (a redundant
//! trailing 0x00 continuation group) are rejected on decode so every value
//! has exactly one wire form.

use bytes::{BufMut, BytesMut};

use crate::error::{LinkError, Result};

/// Maximum encoded length of a 64-bit compressed integer.
pub const MAX_VARINT_LEN: usize = 10;

/// Map a signed value onto an unsigned one with small absolute values small.
#[inline]
pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(z: u64) -> i64 {
    ((z >> 1) as i64) ^ -((z & 1) as i64)
}

/// Append the compressed form of `v` to `buf`.
pub fn write_varint(buf: &mut BytesMut, v: i64) {
    let mut z = zigzag_encode(v);
    loop {
        let byte = (z & 0x7F) as u8;
        z >>= 7;
        if z == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Decode one compressed integer from the front of `input`.
///
/// Returns the value and the number of bytes consumed. Fails with
/// [`LinkError::Decode`] on truncated input, more than
/// [`MAX_VARINT_LEN`] bytes, or an overlong encoding.
pub fn read_varint(input: &[u8]) -> Result<(i64, usize)> {
    let mut z: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in input.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(LinkError::Decode("compressed integer exceeds 10 bytes".into()));
        }
        if i > 0 && byte == 0 {
            return Err(LinkError::Decode("overlong compressed integer".into()));
        }
        // The 10th byte may only carry the final bit of a 64-bit value.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(LinkError::Decode("compressed integer overflows 64 bits".into()));
        }
        z |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((zigzag_decode(z), i + 1));
        }
        shift += 7;
    }
    Err(LinkError::Decode("truncated compressed integer".into()))
}

/// Fold one wire byte into a varint accumulator.
///
/// Used by the streaming reader, which pulls bytes off the socket one at a
/// time. Returns `Some(value)` once the terminal byte arrives.
pub(crate) fn accumulate(z: &mut u64, index: usize, byte: u8) -> Result<Option<i64>> {
    if index >= MAX_VARINT_LEN {
        return Err(LinkError::Decode("compressed integer exceeds 10 bytes".into()));
    }
    if index > 0 && byte == 0 {
        return Err(LinkError::Decode("overlong compressed integer".into()));
    }
    if index == MAX_VARINT_LEN - 1 && byte > 1 {
        return Err(LinkError::Decode("compressed integer overflows 64 bits".into()));
    }
    *z |= u64::from(byte & 0x7F) << (7 * index as u32);
    if byte & 0x80 == 0 {
        Ok(Some(zigzag_decode(*z)))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: i64) -> usize {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, v);
        let (decoded, used) = read_varint(&buf).unwrap();
        assert_eq!(decoded, v, "round trip failed for {v}");
        assert_eq!(used, buf.len());
        used
    }

    #[test]
    fn test_zigzag_mapping() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MIN)), i64::MIN);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MAX)), i64::MAX);
    }

    #[test]
    fn test_small_values_one_byte() {
        assert_eq!(round_trip(0), 1);
        assert_eq!(round_trip(-1), 1);
        assert_eq!(round_trip(63), 1);
        assert_eq!(round_trip(-64), 1);
        assert_eq!(round_trip(64), 2);
    }

    #[test]
    fn test_sentinel_minus_one_is_single_byte() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, -1);
        assert_eq!(&buf[..], &[0x01]);
    }

    #[test]
    fn test_extreme_values() {
        round_trip(i64::MAX);
        round_trip(i64::MIN);
        round_trip(i32::MAX as i64);
        round_trip(i32::MIN as i64);
    }

    #[test]
    fn test_max_length_is_ten() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, i64::MIN);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, 1 << 40);
        let result = read_varint(&buf[..buf.len() - 1]);
        assert!(matches!(result, Err(LinkError::Decode(_))));
    }

    #[test]
    fn test_overlong_encoding_rejected() {
        // 0x80 0x00 decodes to the same value as plain 0x00.
        let result = read_varint(&[0x80, 0x00]);
        assert!(matches!(result, Err(LinkError::Decode(_))));
    }

    #[test]
    fn test_overflow_rejected() {
        // Ten continuation-heavy bytes claiming more than 64 bits.
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let result = read_varint(&bytes);
        assert!(matches!(result, Err(LinkError::Decode(_))));
    }

    #[test]
    fn test_accumulate_matches_slice_decoder() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, -123_456_789);

        let mut z = 0u64;
        let mut out = None;
        for (i, &b) in buf.iter().enumerate() {
            out = accumulate(&mut z, i, b).unwrap();
        }
        assert_eq!(out, Some(-123_456_789));
    }
}
