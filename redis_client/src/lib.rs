//! A client library for the Redis serialization protocol (RESP2/RESP3)
//! against standalone, Sentinel and Cluster deployments of Redis/Valkey.
//!
//! The crate is organized around the components of the design: a tagged
//! [`resp::Value`] tree and its wire [`resp`] codec, a per-socket
//! [`connection::ClientConnection`], a three-client [`server::ServerInstance`]
//! that multiplexes interactive/pipeline/subscription traffic, the
//! [`pubsub`] and [`pipeline`] background listeners, the [`cluster`] slot
//! router, and [`sentinel`] master discovery.
//!
//! Application code that wants table/hash sugar, JSON pretty-printing, or a
//! CLI front-end builds it on top of the operations exposed here; those
//! concerns are deliberately out of scope for this crate.

pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
pub mod pipeline;
pub mod pubsub;
pub mod resp;
pub mod sentinel;
pub mod server;
pub mod tls;
pub mod transport;

pub use config::{ClientConfig, TlsConfig};
pub use connection::{ClientConnection, Role};
pub use error::{ClientError, ClientErrorKind, ClientResult};
pub use resp::Value;
pub use server::ServerInstance;
