//! Error types for tablelink.
//!
//! The taxonomy separates transport failures (retryable) from protocol
//! failures (a framing or version bug, never retried) and from
//! server-reported failures (retryable only when the caller allows it).
//! Some errors are classified *immediate-fail*: they abort a retry loop
//! regardless of the caller's `allow_retry` flag.

use thiserror::Error;

/// Main error type for all tablelink operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Socket or connection failure. Retryable.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed the stream where at least one more byte was required.
    /// Distinct from any status byte. Retryable.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Unexpected status byte or malformed frame. A framing/version bug on
    /// one side or the other; never retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unrecognized enum ordinal, invalid boolean byte, overlong varint, or
    /// similar decode failure. Never retried.
    #[error("decode error: {0}")]
    Decode(String),

    /// Declared transfer length did not match the bytes actually available.
    #[error("length mismatch: declared {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Server-reported I/O failure, message verbatim from the peer.
    #[error("remote I/O error: {0}")]
    RemoteIo(String),

    /// Server-reported data-access failure, message verbatim from the peer.
    #[error("remote data error: {0}")]
    RemoteData(String),

    /// Authentication rejected during the connect handshake. Immediate-fail.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Invalid connector configuration. Immediate-fail.
    #[error("configuration error: {0}")]
    Config(String),

    /// The calling task was cancelled or a body closure requested a prompt
    /// stop. Immediate-fail.
    #[error("operation interrupted")]
    Interrupted,

    /// Pool exhaustion or connect timeout. Retried like a transport error.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// The connection pool has been shut down.
    #[error("connection pool closed")]
    PoolClosed,
}

impl LinkError {
    /// Errors that must never be retried regardless of `allow_retry`.
    pub fn is_immediate_fail(&self) -> bool {
        matches!(
            self,
            LinkError::Auth(_) | LinkError::Config(_) | LinkError::Interrupted
        )
    }

    /// Errors the retry loop may swallow when the caller allows retries.
    ///
    /// Protocol and decode failures are excluded: retrying a framing bug
    /// reproduces it.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Transport(_)
            | LinkError::UnexpectedEof
            | LinkError::RemoteIo(_)
            | LinkError::RemoteData(_)
            | LinkError::Timeout(_) => true,
            LinkError::Protocol(_)
            | LinkError::Decode(_)
            | LinkError::LengthMismatch { .. }
            | LinkError::Auth(_)
            | LinkError::Config(_)
            | LinkError::Interrupted
            | LinkError::PoolClosed => false,
        }
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_fail_classification() {
        assert!(LinkError::Auth("bad password".into()).is_immediate_fail());
        assert!(LinkError::Config("empty endpoint".into()).is_immediate_fail());
        assert!(LinkError::Interrupted.is_immediate_fail());

        assert!(!LinkError::UnexpectedEof.is_immediate_fail());
        assert!(!LinkError::RemoteIo("disk".into()).is_immediate_fail());
        assert!(!LinkError::Timeout("pool").is_immediate_fail());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LinkError::UnexpectedEof.is_retryable());
        assert!(LinkError::RemoteData("deadlock".into()).is_retryable());
        assert!(LinkError::Timeout("connect").is_retryable());

        assert!(!LinkError::Protocol("bad status".into()).is_retryable());
        assert!(!LinkError::Decode("bad ordinal".into()).is_retryable());
        assert!(!LinkError::PoolClosed.is_retryable());
        assert!(!LinkError::LengthMismatch {
            declared: 10,
            actual: 3
        }
        .is_retryable());
    }

    #[test]
    fn test_immediate_fail_never_retryable() {
        for e in [
            LinkError::Auth("x".into()),
            LinkError::Config("x".into()),
            LinkError::Interrupted,
        ] {
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: LinkError = io.into();
        assert!(matches!(err, LinkError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display_includes_remote_message() {
        let err = LinkError::RemoteData("unique constraint violated".into());
        assert!(err.to_string().contains("unique constraint violated"));
    }
}
