//! # Core Protocol Components
//!
//! Message layout and stream framing.
//!
//! ## Components
//! - **Message**: header (type tag + body length) and a LIFO body of
//!   fixed-layout fields
//! - **Codec**: Tokio codec reassembling messages from a byte stream
//!
//! ## Wire Format
//! ```text
//! [Kind(size_of Repr)] [pad] [BodySize(u16, native endian)] [pad] [Body(BodySize)]
//! ```
//!
//! The header mirrors the host's C layout of `{ Repr kind; uint16_t size; }`.
//! No byte-order normalization is performed.

pub mod codec;
pub mod message;
