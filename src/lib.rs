//! Client connector for a table-oriented binary RPC protocol.
//!
//! The server exposes its data as tables of typed rows. This crate speaks
//! the wire protocol (a compact big-endian codec with varint-compressed
//! integers), pools connections, caches whole tables client-side, and keeps
//! those caches coherent through server-pushed invalidation.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablelink::{Connector, ConnectorSpec};
//!
//! # #[derive(Clone)] struct Host { id: i32 }
//! # impl tablelink::Row for Host {
//! #     type Key = i32;
//! #     const TABLE_ID: tablelink::TableId = tablelink::TableId(5);
//! #     fn key(&self) -> i32 { self.id }
//! #     fn read<S: tokio::io::AsyncRead + Unpin + Send>(
//! #         reader: &mut tablelink::WireReader<S>,
//! #         _version: tablelink::ProtocolVersion,
//! #     ) -> impl std::future::Future<Output = tablelink::Result<Self>> + Send {
//! #         async move { Ok(Host { id: reader.read_i32().await? }) }
//! #     }
//! #     fn write(
//! #         &self,
//! #         writer: &mut tablelink::WireWriter,
//! #         _version: tablelink::ProtocolVersion,
//! #     ) -> tablelink::Result<()> { writer.write_i32(self.id) }
//! #     fn columns() -> &'static [&'static str] { &["id"] }
//! # }
//! # async fn demo() -> tablelink::Result<()> {
//! let connector = Connector::connect(ConnectorSpec::new(
//!     "db.example.com:4582",
//!     "app",
//!     "secret",
//! ))?;
//!
//! let hosts = connector.table::<Host>();
//! for host in hosts.rows().await? {
//!     // Rows come from the local cache after the first load.
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`Connector`] is the entry point: one per authenticated identity and
//!   endpoint, always behind an `Arc`. The [`ConnectorRegistry`] shares
//!   connectors between callers with identical specs.
//! - Every command borrows a connection from a bounded pool for exactly one
//!   request/response exchange. Transient failures are retried on a fresh
//!   connection with escalating delays.
//! - [`Table`] caches one entity type's rows, loaded lazily and in full.
//!   Mutating commands carry back an invalidation list naming the tables
//!   they touched; those caches are cleared and their listeners notified.
//! - A background cache monitor holds one extra connection on which the
//!   server pushes invalidations caused by *other* clients.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod invalidation;
pub mod listener;
mod monitor;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod table;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::{BoxFuture, Connector, RETRY_DELAYS};
pub use codec::{WireReader, WireWriter, MAX_STRING_LEN};
pub use config::{ConnectorSpec, PoolConfig};
pub use connection::SocketReader;
pub use error::{LinkError, Result};
pub use invalidation::InvalidationList;
pub use listener::TableListener;
pub use pool::{ConnectionPool, PooledConnection};
pub use protocol::{CommandId, ProtocolVersion, TableId, CURRENT_VERSION};
pub use registry::ConnectorRegistry;
pub use table::{Row, Table};
