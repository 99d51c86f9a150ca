//! # Service Layer
//!
//! Client and server endpoints built on the transport layer.
//!
//! ## Components
//! - **Client**: one outbound connection plus an inbox of server messages
//! - **Server**: listener, admission hook, connection pool, and an inbox
//!   drained on demand through [`ServerHandler`](server::ServerHandler)

pub mod client;
pub mod server;

pub use client::ClientEndpoint;
pub use server::{ServerEndpoint, ServerHandler};
