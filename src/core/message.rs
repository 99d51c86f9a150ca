//! # Messages
//!
//! The unit of exchange: a fixed header (`kind` tag plus body length) and an
//! opaque body of fixed-layout fields.
//!
//! Fields are pushed onto and popped off the *end* of the body, so they come
//! back in reverse order:
//!
//! ```rust
//! use framewire::core::message::Message;
//!
//! let mut message = Message::new(1u16);
//! message.push(7u8)?.push(15u32)?;
//! assert_eq!(message.header().body_size, 5);
//!
//! assert_eq!(message.pop::<u32>()?, 15);
//! assert_eq!(message.pop::<u8>()?, 7);
//! assert!(message.body().is_empty());
//! # Ok::<(), framewire::error::ProtocolError>(())
//! ```
//!
//! Values travel in the host's native layout. Peers on different
//! architectures must agree on endianness out of band.

use crate::config::MAX_BODY_SIZE;
use crate::error::{ProtocolError, Result};
use bytemuck::Pod;
use std::fmt;
use std::mem::{align_of, size_of};

/// Identifier of a connection inside a server pool. Never reused.
pub type ConnectionId = u32;

/// Application-defined message type tag.
///
/// The tag is written as its underlying integer (`Repr`). Decoding a value
/// that maps to no tag is a framing error.
pub trait MessageKind: Copy + Send + Sync + fmt::Debug + 'static {
    type Repr: Pod;

    fn to_repr(self) -> Self::Repr;

    fn from_repr(repr: Self::Repr) -> Option<Self>;
}

macro_rules! impl_integer_kind {
    ($($int:ty),+) => {
        $(
            impl MessageKind for $int {
                type Repr = $int;

                #[inline]
                fn to_repr(self) -> $int {
                    self
                }

                #[inline]
                fn from_repr(repr: $int) -> Option<Self> {
                    Some(repr)
                }
            }
        )+
    };
}

impl_integer_kind!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Declare a `#[repr(int)]` enum usable as a [`MessageKind`].
///
/// ```rust
/// framewire::message_kind! {
///     pub enum GameMessage: u16 {
///         Ping = 0,
///         Broadcast = 1,
///     }
/// }
///
/// use framewire::core::message::MessageKind;
/// assert_eq!(GameMessage::from_repr(1), Some(GameMessage::Broadcast));
/// assert_eq!(GameMessage::from_repr(9), None);
/// ```
#[macro_export]
macro_rules! message_kind {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $($variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        $vis enum $name {
            $($variant = $value),+
        }

        impl $crate::core::message::MessageKind for $name {
            type Repr = $repr;

            fn to_repr(self) -> $repr {
                self as $repr
            }

            fn from_repr(repr: $repr) -> Option<Self> {
                $(
                    if repr == $name::$variant as $repr {
                        return Some($name::$variant);
                    }
                )+
                None
            }
        }
    };
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Message header as it appears on the wire.
///
/// The layout matches a C struct `{ Repr kind; uint16_t size; }`: the tag at
/// offset 0, the size aligned to two bytes, the whole record padded to the
/// larger of the two alignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<K> {
    pub kind: K,
    pub body_size: u16,
}

impl<K: MessageKind> MessageHeader<K> {
    const SIZE_OFFSET: usize = align_up(size_of::<K::Repr>(), align_of::<u16>());

    /// Encoded header length in bytes
    pub const SIZE: usize = align_up(
        Self::SIZE_OFFSET + size_of::<u16>(),
        max(align_of::<K::Repr>(), align_of::<u16>()),
    );

    /// Append the encoded header to `dst`. Padding is zero-filled.
    pub fn write_to(&self, dst: &mut Vec<u8>) {
        let start = dst.len();
        let repr = self.kind.to_repr();
        dst.extend_from_slice(bytemuck::bytes_of(&repr));
        dst.resize(start + Self::SIZE_OFFSET, 0);
        dst.extend_from_slice(&self.body_size.to_ne_bytes());
        dst.resize(start + Self::SIZE, 0);
    }

    /// Encoded header bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out);
        out
    }

    /// Parse a header from the first [`Self::SIZE`] bytes of `src`
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        if src.len() < Self::SIZE {
            return Err(ProtocolError::InvalidHeader);
        }

        let repr: K::Repr = bytemuck::pod_read_unaligned(&src[..size_of::<K::Repr>()]);
        let kind = K::from_repr(repr).ok_or(ProtocolError::InvalidHeader)?;
        let body_size = u16::from_ne_bytes([src[Self::SIZE_OFFSET], src[Self::SIZE_OFFSET + 1]]);

        Ok(Self { kind, body_size })
    }
}

/// A framed message. `header.body_size` always equals the body length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<K> {
    header: MessageHeader<K>,
    body: Vec<u8>,
}

impl<K: MessageKind> Message<K> {
    /// Empty message of the given kind
    pub fn new(kind: K) -> Self {
        Self {
            header: MessageHeader { kind, body_size: 0 },
            body: Vec::new(),
        }
    }

    /// Message carrying `body` verbatim
    pub fn with_body(kind: K, body: Vec<u8>) -> Result<Self> {
        let mut message = Self::new(kind);
        message.set_body(body)?;
        Ok(message)
    }

    pub fn header(&self) -> &MessageHeader<K> {
        &self.header
    }

    pub fn kind(&self) -> K {
        self.header.kind
    }

    pub fn set_kind(&mut self, kind: K) {
        self.header.kind = kind;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace the whole body
    pub fn set_body(&mut self, body: Vec<u8>) -> Result<()> {
        if body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::OversizedBody(body.len()));
        }
        self.body = body;
        self.sync_size();
        Ok(())
    }

    /// Drop every field from the body
    pub fn clear(&mut self) {
        self.body.clear();
        self.sync_size();
    }

    /// Header size plus current body length
    pub fn size(&self) -> usize {
        MessageHeader::<K>::SIZE + self.body.len()
    }

    /// Append a fixed-layout value to the end of the body
    pub fn push<T: Pod>(&mut self, value: T) -> Result<&mut Self> {
        let new_len = self.body.len() + size_of::<T>();
        if new_len > MAX_BODY_SIZE {
            return Err(ProtocolError::OversizedBody(new_len));
        }

        self.body.extend_from_slice(bytemuck::bytes_of(&value));
        self.sync_size();
        Ok(self)
    }

    /// Remove the value occupying the last `size_of::<T>()` bytes of the body
    pub fn pop<T: Pod>(&mut self) -> Result<T> {
        let width = size_of::<T>();
        let available = self.body.len();
        if available < width {
            return Err(ProtocolError::BodyUnderflow {
                requested: width,
                available,
            });
        }

        let start = available - width;
        let value = bytemuck::pod_read_unaligned(&self.body[start..]);
        self.body.truncate(start);
        self.sync_size();
        Ok(value)
    }

    /// Header followed by body, exactly as written to the socket
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.body);
        out
    }

    // Callers guarantee `body.len() <= MAX_BODY_SIZE`.
    pub(crate) fn from_parts(kind: K, body: Vec<u8>) -> Self {
        let mut message = Self::new(kind);
        message.body = body;
        message.sync_size();
        message
    }

    fn sync_size(&mut self) {
        self.header.body_size = self.body.len() as u16;
    }
}

/// A delivered message tagged with the server-side connection it came from.
///
/// `source` is a lookup key into the server pool, not an owning reference;
/// client-side deliveries always carry `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage<K> {
    pub source: Option<ConnectionId>,
    pub message: Message<K>,
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::message_kind! {
        enum Wide: u32 {
            Alpha = 1,
            Beta = 0xDEAD,
        }
    }

    #[test]
    fn test_header_layout_matches_c_struct() {
        assert_eq!(MessageHeader::<u8>::SIZE, 4);
        assert_eq!(MessageHeader::<u16>::SIZE, 4);
        assert_eq!(MessageHeader::<u32>::SIZE, 8);
        assert_eq!(MessageHeader::<u64>::SIZE, 16);
        assert_eq!(MessageHeader::<Wide>::SIZE, 8);
    }

    #[test]
    fn test_header_bytes_roundtrip() {
        let header = MessageHeader {
            kind: Wide::Beta,
            body_size: 513,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), MessageHeader::<Wide>::SIZE);
        assert_eq!(&bytes[..4], &0xDEADu32.to_ne_bytes());
        assert_eq!(&bytes[4..6], &513u16.to_ne_bytes());
        assert_eq!(&bytes[6..], &[0, 0]);

        let parsed = MessageHeader::<Wide>::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut bytes = MessageHeader {
            kind: Wide::Alpha,
            body_size: 0,
        }
        .to_bytes();
        bytes[..4].copy_from_slice(&7u32.to_ne_bytes());
        assert!(matches!(
            MessageHeader::<Wide>::from_bytes(&bytes),
            Err(ProtocolError::InvalidHeader)
        ));
    }

    #[test]
    fn test_push_pop_is_lifo() {
        let mut message = Message::new(Wide::Alpha);
        message.push(1u8).unwrap().push(2.5f64).unwrap().push(-3i16).unwrap();
        assert_eq!(message.header().body_size, 11);
        assert_eq!(message.size(), 8 + 11);

        assert_eq!(message.pop::<i16>().unwrap(), -3);
        assert_eq!(message.header().body_size, 9);
        assert_eq!(message.pop::<f64>().unwrap(), 2.5);
        assert_eq!(message.pop::<u8>().unwrap(), 1);
        assert_eq!(message.header().body_size, 0);
        assert_eq!(message.size(), 8);
    }

    #[test]
    fn test_pop_underflow_leaves_body_untouched() {
        let mut message = Message::new(0u16);
        message.push(9u16).unwrap();
        let err = message.pop::<u32>().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BodyUnderflow {
                requested: 4,
                available: 2
            }
        ));
        assert_eq!(message.pop::<u16>().unwrap(), 9);
    }

    #[test]
    fn test_push_past_size_field_is_rejected() {
        let mut message = Message::with_body(0u16, vec![0; MAX_BODY_SIZE - 1]).unwrap();
        assert!(matches!(
            message.push(1u16),
            Err(ProtocolError::OversizedBody(n)) if n == MAX_BODY_SIZE + 1
        ));
        assert_eq!(message.body().len(), MAX_BODY_SIZE - 1);
        message.push(1u8).unwrap();
        assert_eq!(message.header().body_size, u16::MAX);
    }

    #[test]
    fn test_set_body_and_clear_keep_size_in_sync() {
        let mut message = Message::new(3u8);
        message.set_body(vec![1, 2, 3]).unwrap();
        assert_eq!(message.header().body_size, 3);
        message.clear();
        assert_eq!(message.header().body_size, 0);
        assert!(Message::with_body(3u8, vec![0; MAX_BODY_SIZE + 1]).is_err());
    }
}
