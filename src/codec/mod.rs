//! Wire codec: the closed primitive set every request and response is built
//! from.
//!
//! Three pieces:
//! - [`compress`]: variable-length integer encoding used throughout the
//!   wire format (lengths, ordinals, table ids, sentinels)
//! - [`WireWriter`]: buffered request encoding
//! - [`WireReader`]: streaming response decoding
//!
//! The codec itself is version-agnostic; protocol-version field gating lives
//! in entity `read`/`write` implementations (see [`crate::table::Row`]) and
//! in the connect handshake.

pub mod compress;
mod reader;
mod writer;

pub use reader::WireReader;
pub use writer::{WireWriter, MAX_STRING_LEN};
