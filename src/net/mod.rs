//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Discovered address
//!     → address.rs (parse host:port)
//!     → ChannelFactory (transport.rs) opens an RpcChannel
//!     → connection.rs (id, failure detection, close-once)
//!     → owned by a pooled entry in load_balancer
//!
//! Attempt:
//!     Connection::send(request, sink)
//!     → channel reports Acknowledged / Response / Error / Cancelled
//!     → ResponseSink forwards the event over mpsc to the caller
//! ```
//!
//! # Design Decisions
//! - Wire format is opaque; requests carry raw attachments
//! - Callback-style transports are adapted to message passing at the sink
//! - Unrecoverable errors are detected here, banning happens in the pool

pub mod address;
pub mod connection;
pub mod error;
pub mod transport;

pub use address::Address;
pub use connection::{BanPredicate, Connection, ConnectionId};
pub use error::{ErrorCode, RpcError};
pub use transport::{ChannelFactory, RequestControl, ResponseSink, RpcChannel, RpcRequest, SinkEvent};
