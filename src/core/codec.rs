//! # Message Codec
//!
//! Tokio codec reassembling [`Message`]s from a byte stream.
//!
//! Decoding is a two-step state machine: wait for a full header, then wait
//! for exactly `body_size` body bytes. Bytes after a complete message stay in
//! the buffer for the next call, so back-to-back frames are pipelined.
//!
//! The announced body size is checked against `max_body_size` before the
//! body buffer is reserved.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_BODY_SIZE;
use crate::core::message::{Message, MessageHeader, MessageKind};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
enum DecodeState<K> {
    Header,
    Body(MessageHeader<K>),
}

/// Framing codec for `Message<K>`
#[derive(Debug)]
pub struct MessageCodec<K> {
    state: DecodeState<K>,
    max_body_size: usize,
}

impl<K: MessageKind> MessageCodec<K> {
    pub fn new() -> Self {
        Self::with_max_body_size(MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(max_body_size: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_body_size: max_body_size.min(MAX_BODY_SIZE),
        }
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

impl<K: MessageKind> Default for MessageCodec<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> Decoder for MessageCodec<K> {
    type Item = Message<K>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = match self.state {
            DecodeState::Header => {
                let header_len = MessageHeader::<K>::SIZE;
                if src.len() < header_len {
                    src.reserve(header_len - src.len());
                    return Ok(None);
                }

                let header = MessageHeader::<K>::from_bytes(&src[..header_len])?;
                let body_size = header.body_size as usize;
                if body_size > self.max_body_size {
                    return Err(ProtocolError::OversizedBody(body_size));
                }

                src.advance(header_len);
                trace!(kind = ?header.kind, body_size, "Header decoded");

                if body_size == 0 {
                    return Ok(Some(Message::new(header.kind)));
                }

                self.state = DecodeState::Body(header);
                header
            }
            DecodeState::Body(header) => header,
        };

        let body_size = header.body_size as usize;
        if src.len() < body_size {
            src.reserve(body_size - src.len());
            return Ok(None);
        }

        let body = src.split_to(body_size).to_vec();
        self.state = DecodeState::Header;
        Ok(Some(Message::from_parts(header.kind, body)))
    }
}

impl<K: MessageKind> Encoder<Message<K>> for MessageCodec<K> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message<K>, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&Message<K>>::encode(self, &item, dst)
    }
}

impl<'a, K: MessageKind> Encoder<&'a Message<K>> for MessageCodec<K> {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a Message<K>, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.size());
        dst.extend_from_slice(&item.header().to_bytes());
        dst.extend_from_slice(item.body());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_header_then_body() {
        let mut codec = MessageCodec::<u16>::new();
        let mut message = Message::new(4u16);
        message.push(0xABCD_u32).unwrap();
        let bytes = message.to_bytes();

        let mut buf = BytesMut::from(&bytes[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&bytes[3..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        // header consumed, body still pending
        assert_eq!(buf.len(), 2);

        buf.extend_from_slice(&bytes[6..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_body_over_limit() {
        let mut codec = MessageCodec::<u16>::with_max_body_size(8);
        let message = Message::with_body(1u16, vec![0; 9]).unwrap();
        let mut buf = BytesMut::from(&message.to_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedBody(9))
        ));
    }

    #[test]
    fn test_encoder_matches_to_bytes() {
        let mut codec = MessageCodec::<u8>::new();
        let mut message = Message::new(2u8);
        message.push(1.5f32).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(&message, &mut buf).unwrap();
        assert_eq!(&buf[..], &message.to_bytes()[..]);
    }
}
