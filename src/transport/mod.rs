//! # Transport Layer
//!
//! TCP connections and the event loop that drives them.
//!
//! ## Components
//! - **Reactor**: single-threaded Tokio runtime on a dedicated OS thread,
//!   one per endpoint
//! - **Connection**: framed TCP stream with a read chain feeding the
//!   endpoint inbox and a write chain draining its own outgoing queue
//!
//! ## Threading
//! All socket I/O of an endpoint runs on its reactor thread. Application
//! threads only touch the thread-safe queues and schedule work with
//! `Handle::spawn`.

pub mod connection;
pub mod reactor;

pub use connection::{Connection, ConnectionState, Inbox, Role};
pub use reactor::Reactor;
