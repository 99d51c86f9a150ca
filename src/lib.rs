//! # framewire
//!
//! Length-prefixed message framing over TCP with a threaded client/server
//! endpoint pair.
//!
//! A [`Message`] is a small fixed header (a user-defined type tag and a
//! `u16` body length) followed by a body of plain-old-data fields pushed
//! and popped in LIFO order. Each endpoint runs its sockets on one
//! background reactor thread and hands received messages to the
//! application through a thread-safe inbox.
//!
//! ## Modules
//! - [`core`]: message layout and the stream codec
//! - [`transport`]: connections and the reactor thread
//! - [`service`]: [`ClientEndpoint`] and [`ServerEndpoint`]
//! - [`utils`]: queues, logging setup, metrics
//! - [`config`]: TOML and environment configuration
//! - [`error`]: [`ProtocolError`]
//!
//! ## Example
//! ```rust,no_run
//! use framewire::{message_kind, ClientEndpoint, Message};
//!
//! message_kind! {
//!     pub enum Kind: u32 {
//!         Ping = 0,
//!         Pong = 1,
//!     }
//! }
//!
//! let mut client = ClientEndpoint::<Kind>::new();
//! client.connect("127.0.0.1", 60000)?;
//!
//! let mut ping = Message::new(Kind::Ping);
//! ping.push(7u64)?;
//! client.send(ping)?;
//! # Ok::<(), framewire::ProtocolError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::codec::MessageCodec;
pub use crate::core::message::{ConnectionId, Message, MessageHeader, MessageKind, OwnedMessage};
pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
pub use service::{ClientEndpoint, ServerEndpoint, ServerHandler};
pub use transport::{Connection, ConnectionState};
pub use utils::ThreadSafeQueue;
