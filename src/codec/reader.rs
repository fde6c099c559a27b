//! Typed primitive decoding from a byte stream.
//!
//! A [`WireReader`] wraps any async byte source (in production a buffered
//! TCP read half) and decodes the closed primitive set one value at a time.
//! Responses carry no overall length prefix, so decoding is streaming by
//! construction: each value is pulled off the wire exactly when asked for.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::compress::{self, MAX_VARINT_LEN};
use crate::codec::writer::MAX_STRING_LEN;
use crate::error::{LinkError, Result};

/// Streaming decoder for the wire primitive set.
#[derive(Debug)]
pub struct WireReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one byte; end-of-stream here is [`LinkError::UnexpectedEof`].
    pub async fn read_u8(&mut self) -> Result<u8> {
        match self.inner.read_u8().await {
            Ok(b) => Ok(b),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(LinkError::UnexpectedEof)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8().await? as i8)
    }

    /// Booleans are strict: any byte other than 0 or 1 is a decode error.
    pub async fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8().await? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LinkError::Decode(format!("invalid boolean byte {other:#04x}"))),
        }
    }

    pub async fn read_i16(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf).await?;
        Ok(i16::from_be_bytes(buf))
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf).await?;
        Ok(i32::from_be_bytes(buf))
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf).await?;
        Ok(i64::from_be_bytes(buf))
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a compressed 64-bit integer (see [`crate::codec::compress`]).
    pub async fn read_compressed(&mut self) -> Result<i64> {
        let mut z = 0u64;
        for index in 0..MAX_VARINT_LEN {
            let byte = self.read_u8().await?;
            if let Some(v) = compress::accumulate(&mut z, index, byte)? {
                return Ok(v);
            }
        }
        Err(LinkError::Decode("compressed integer exceeds 10 bytes".into()))
    }

    /// Read a compressed integer that must fit in 32 bits.
    pub async fn read_compressed_i32(&mut self) -> Result<i32> {
        let v = self.read_compressed().await?;
        i32::try_from(v)
            .map_err(|_| LinkError::Decode(format!("compressed value {v} outside i32 range")))
    }

    /// Read `declared` raw bytes. A short read mid-value is reported as a
    /// length mismatch, not a plain EOF, so the caller can tell a truncated
    /// value apart from a cleanly closed stream.
    pub async fn read_bytes(&mut self, declared: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; declared];
        let mut filled = 0;
        while filled < declared {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(LinkError::LengthMismatch {
                    declared,
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(buf)
    }

    /// Bounded UTF-8 string: compressed byte length, then the bytes.
    pub async fn read_string(&mut self) -> Result<String> {
        let len = self.read_compressed().await?;
        let len = usize::try_from(len)
            .map_err(|_| LinkError::Decode(format!("negative string length {len}")))?;
        if len > MAX_STRING_LEN {
            return Err(LinkError::Decode(format!(
                "string length {len} exceeds bounded maximum {MAX_STRING_LEN}"
            )));
        }
        self.read_utf8(len).await
    }

    /// Size-unbounded UTF-8 string: u32 byte length, then the bytes.
    pub async fn read_long_string(&mut self) -> Result<String> {
        let len = self.read_u32().await? as usize;
        self.read_utf8(len).await
    }

    /// Read an enum ordinal and map it through `decode`; an unrecognized
    /// ordinal is a decode error naming the value.
    pub async fn read_enum<T>(&mut self, decode: impl Fn(u16) -> Option<T>) -> Result<T> {
        let ordinal = self.read_compressed().await?;
        let ordinal = u16::try_from(ordinal)
            .map_err(|_| LinkError::Decode(format!("enum ordinal {ordinal} outside u16 range")))?;
        decode(ordinal)
            .ok_or_else(|| LinkError::Decode(format!("unrecognized enum ordinal {ordinal}")))
    }

    // Nullable variants: a presence flag precedes the value.

    pub async fn read_nullable_bool(&mut self) -> Result<Option<bool>> {
        if self.read_bool().await? {
            Ok(Some(self.read_bool().await?))
        } else {
            Ok(None)
        }
    }

    pub async fn read_nullable_i16(&mut self) -> Result<Option<i16>> {
        if self.read_bool().await? {
            Ok(Some(self.read_i16().await?))
        } else {
            Ok(None)
        }
    }

    pub async fn read_nullable_i32(&mut self) -> Result<Option<i32>> {
        if self.read_bool().await? {
            Ok(Some(self.read_i32().await?))
        } else {
            Ok(None)
        }
    }

    pub async fn read_nullable_i64(&mut self) -> Result<Option<i64>> {
        if self.read_bool().await? {
            Ok(Some(self.read_i64().await?))
        } else {
            Ok(None)
        }
    }

    pub async fn read_nullable_string(&mut self) -> Result<Option<String>> {
        if self.read_bool().await? {
            Ok(Some(self.read_string().await?))
        } else {
            Ok(None)
        }
    }

    async fn read_utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len).await?;
        String::from_utf8(bytes).map_err(|e| LinkError::Decode(format!("invalid UTF-8: {e}")))
    }

    /// Fill a fixed-width buffer, mapping EOF like [`read_u8`](Self::read_u8).
    async fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(LinkError::UnexpectedEof)
            }
            Err(e) => Err(e.into()),
        }
    }
}
