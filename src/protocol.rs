//! Protocol constants: command ids, protocol versions, table ids, and
//! response status bytes.
//!
//! Everything here is part of the wire format. [`CommandId`] ordinals are
//! append-only: a released ordinal is never reordered, reused, or removed.
//! [`ProtocolVersion`] ordinals are totally ordered and gate per-field wire
//! presence; the version-gate calls in entity codecs are the single source of
//! backward-compatibility truth.

use std::fmt;

/// Wire-stable integer naming an RPC operation.
///
/// Append-only. New commands go at the end with the next free ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandId {
    /// No-op health check.
    Ping = 0,
    /// Stream every row of one table.
    GetTable = 1,
    /// Fetch a single row by primary key.
    GetRow = 2,
    /// Mutate rows; response carries an invalidation list.
    Update = 3,
    /// Delete rows; response carries an invalidation list.
    Delete = 4,
    /// Switch this connection into the long-lived invalidation push stream.
    Listen = 5,
    /// Release the server-side session on orderly shutdown.
    ReleaseSession = 6,
}

impl CommandId {
    /// The wire ordinal.
    #[inline]
    pub fn ordinal(self) -> u16 {
        self as u16
    }

    /// Map a wire ordinal back to a command, `None` if unrecognized.
    pub fn from_ordinal(ordinal: u16) -> Option<Self> {
        match ordinal {
            0 => Some(CommandId::Ping),
            1 => Some(CommandId::GetTable),
            2 => Some(CommandId::GetRow),
            3 => Some(CommandId::Update),
            4 => Some(CommandId::Delete),
            5 => Some(CommandId::Listen),
            6 => Some(CommandId::ReleaseSession),
            _ => None,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.ordinal())
    }
}

/// Totally ordered wire-format token gating per-field presence.
///
/// The active version is fixed per build ([`CURRENT_VERSION`]); a connector
/// sends it once in the connect handshake with no mid-session renegotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum ProtocolVersion {
    V1_0 = 0,
    V1_1 = 1,
    V1_2 = 2,
    V1_3 = 3,
    V1_4 = 4,
}

/// The protocol version this build speaks.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::V1_4;

impl ProtocolVersion {
    #[inline]
    pub fn ordinal(self) -> u16 {
        self as u16
    }

    pub fn from_ordinal(ordinal: u16) -> Option<Self> {
        match ordinal {
            0 => Some(ProtocolVersion::V1_0),
            1 => Some(ProtocolVersion::V1_1),
            2 => Some(ProtocolVersion::V1_2),
            3 => Some(ProtocolVersion::V1_3),
            4 => Some(ProtocolVersion::V1_4),
            _ => None,
        }
    }

    /// True if a field introduced at `since` is present at this version.
    #[inline]
    pub fn includes(self, since: ProtocolVersion) -> bool {
        self >= since
    }

    /// True if a field introduced at `since` and removed at `until` is
    /// present at this version.
    #[inline]
    pub fn includes_range(self, since: ProtocolVersion, until: ProtocolVersion) -> bool {
        self >= since && self < until
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1_0 => write!(f, "1.0"),
            ProtocolVersion::V1_1 => write!(f, "1.1"),
            ProtocolVersion::V1_2 => write!(f, "1.2"),
            ProtocolVersion::V1_3 => write!(f, "1.3"),
            ProtocolVersion::V1_4 => write!(f, "1.4"),
        }
    }
}

/// Stable identifier for one entity/table type.
///
/// Used as the cache key and the invalidation payload. The core never
/// interprets the value beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u16);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Response status bytes. The server leads every response with one of these.
pub mod status {
    /// More data follows: either another item in a stream, or the single
    /// success payload, depending on the command.
    pub const NEXT: u8 = 0;
    /// Success, no further payload.
    pub const DONE: u8 = 1;
    /// Server-reported I/O failure; a UTF message follows.
    pub const IO_EXCEPTION: u8 = 2;
    /// Server-reported data-access failure; a UTF message follows.
    pub const SQL_EXCEPTION: u8 = 3;
}

/// Compressed-integer sentinel terminating an invalidation list.
pub const INVALIDATION_END: i64 = -1;
