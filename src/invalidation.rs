//! Invalidation lists: the server's report of which table caches to discard.
//!
//! The same payload arrives by two paths: piggybacked on a mutating
//! command's response, or pushed asynchronously over the listen connection
//! (see [`crate::monitor`]). On the wire it is a sequence of compressed
//! table ids terminated by the `-1` sentinel.

use crate::codec::{WireReader, WireWriter};
use crate::connection::SocketReader;
use crate::error::{LinkError, Result};
use crate::protocol::{TableId, INVALIDATION_END};

/// Ordered set of table ids whose caches must be discarded.
///
/// Order is preserved from the wire, duplicates are dropped on read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationList {
    tables: Vec<TableId>,
}

impl InvalidationList {
    pub fn new(tables: Vec<TableId>) -> Self {
        let mut list = Self::default();
        for t in tables {
            list.push(t);
        }
        list
    }

    fn push(&mut self, table: TableId) {
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
    }

    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.tables.contains(&table)
    }

    /// Decode a sentinel-terminated list off the wire.
    pub async fn read(reader: &mut SocketReader) -> Result<Self> {
        Self::read_from(reader).await
    }

    /// Generic form of [`read`](Self::read), usable against any byte source.
    pub async fn read_from<R>(reader: &mut WireReader<R>) -> Result<Self>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut list = Self::default();
        loop {
            let raw = reader.read_compressed().await?;
            if raw == INVALIDATION_END {
                return Ok(list);
            }
            let id = u16::try_from(raw)
                .map_err(|_| LinkError::Decode(format!("table id {raw} outside u16 range")))?;
            list.push(TableId(id));
        }
    }

    /// Encode the list, sentinel included.
    pub fn write(&self, writer: &mut WireWriter) -> Result<()> {
        for table in &self.tables {
            writer.write_compressed(i64::from(table.0))?;
        }
        writer.write_compressed(INVALIDATION_END)
    }
}

impl FromIterator<TableId> for InvalidationList {
    fn from_iter<I: IntoIterator<Item = TableId>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
