//! # Error Types
//!
//! Error handling for the framing protocol and its endpoints.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures while reading, writing, or connecting
//! - **Framing Errors**: undecodable headers, bodies that do not fit the
//!   `u16` size field, pops past the start of a body
//! - **Endpoint Errors**: address resolution, connect failures, misuse of
//!   connection or endpoint state
//! - **Configuration Errors**: unreadable or invalid configuration
//!
//! Transport errors are terminal for the connection that produced them. They
//! are logged at the connection and never reach the inbox; endpoints only
//! surface `Result`s from `connect` and `start`.
//!
//! ## Example Usage
//! ```rust
//! use framewire::core::message::Message;
//! use framewire::error::{ProtocolError, Result};
//!
//! fn read_counter(message: &mut Message<u16>) -> Result<u32> {
//!     message.pop::<u32>()
//! }
//!
//! let mut message = Message::new(7u16);
//! assert!(matches!(
//!     read_counter(&mut message),
//!     Err(ProtocolError::BodyUnderflow { requested: 4, available: 0 })
//! ));
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

// ProtocolError is the primary error type for all framewire operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid message header")]
    InvalidHeader,

    #[error("Message body too large: {0} bytes")]
    OversizedBody(usize),

    #[error("Message body underflow: requested {requested} bytes, {available} available")]
    BodyUnderflow { requested: usize, available: usize },

    #[error("Address resolution failed: {0}")]
    ResolutionFailure(String),

    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Endpoint is already running")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
