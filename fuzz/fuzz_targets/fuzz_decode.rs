#![no_main]

use bytes::BytesMut;
use framewire::core::codec::MessageCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary stream bytes must never panic or loop in the decoder
    let mut codec = MessageCodec::<u16>::new();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
