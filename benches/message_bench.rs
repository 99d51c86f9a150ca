use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use framewire::core::codec::MessageCodec;
use framewire::core::message::Message;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_body_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_body");

    group.bench_function("push_pop_16_fields", |b| {
        b.iter_batched(
            || Message::new(1u32),
            |mut message| {
                for i in 0..16u64 {
                    message.push(i).unwrap();
                }
                for _ in 0..16 {
                    let _: u64 = message.pop().unwrap();
                }
                message
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_codec");
    let body_sizes = [0usize, 64, 512, 4096, 65535];

    for &size in &body_sizes {
        let message = Message::with_body(7u16, vec![0xA5; size]).unwrap();
        group.throughput(Throughput::Bytes(message.size() as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            let mut codec = MessageCodec::<u16>::new();
            let mut buf = BytesMut::with_capacity(message.size());
            b.iter(|| {
                buf.clear();
                codec.encode(&message, &mut buf).unwrap();
            })
        });

        let wire = message.to_bytes();
        group.bench_function(format!("decode_{size}b"), |b| {
            let mut codec = MessageCodec::<u16>::new();
            b.iter_batched(
                || BytesMut::from(&wire[..]),
                |mut buf| codec.decode(&mut buf).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_body_stack, bench_codec);
criterion_main!(benches);
