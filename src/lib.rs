//! Parley: a single-threaded chat server.
//!
//! Clients speak a small binary protocol over TCP: a bit-packed 4-byte header
//! followed by a body of fields terminated by `0x03`. One thread multiplexes
//! every connection with mio and runs each request/response exchange to
//! completion before returning to the readiness wait.
//!
//! # Architecture
//!
//! - [`io::Receiver`] is the only component that reads from a socket
//! - [`protocol`] decodes headers and bodies and assembles responses
//! - [`network`] holds the connection table and the per-exchange driver
//! - [`Server`] owns the listener and enforces the connection limit
//! - [`handler::ChatHandler`] implements the CREATE operations on a [`store::Store`]

/// Configuration and build-time limits
pub mod config;

/// Error types and result aliases
pub mod error;

/// Buffered socket reading
pub mod io;

/// Connection table and exchange driver
pub mod network;

/// Wire protocol codec
pub mod protocol;

/// Event loop and cancellation
pub mod server;

/// Request handling
pub mod handler;

/// Persistence
pub mod store;

/// Signed-in users per connection
pub mod active_users;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{Server, ShutdownHandle};
