use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use duplex_net::core::codec::EnvelopeCodec;
use duplex_net::core::queue::TsQueue;
use duplex_net::{Envelope, StandardKind};
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_envelope_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        let envelope = Envelope::from_parts(StandardKind::ServerMessage, vec![0u8; size]).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            let mut codec = EnvelopeCodec::<StandardKind>::new();
            let mut buf = BytesMut::with_capacity(size + 8);
            b.iter(|| {
                buf.clear();
                codec.encode(&envelope, &mut buf).unwrap();
            })
        });

        group.bench_function(format!("decode_{size}b"), |b| {
            let mut wire = BytesMut::new();
            EnvelopeCodec::<StandardKind>::new()
                .encode(&envelope, &mut wire)
                .unwrap();
            b.iter_batched(
                || wire.clone(),
                |mut buf| {
                    let mut codec = EnvelopeCodec::<StandardKind>::new();
                    let decoded = codec.decode(&mut buf).unwrap();
                    assert!(decoded.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_payload_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_stack");

    group.bench_function("append_extract_64_u64", |b| {
        b.iter_batched(
            || Envelope::new(StandardKind::ServerMessage),
            |mut env| {
                for i in 0..64u64 {
                    env.append(&i);
                }
                for _ in 0..64 {
                    env.extract::<u64>().unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("queue_push_pop_1k", |b| {
        let queue = TsQueue::new();
        b.iter(|| {
            for i in 0..1_000u32 {
                queue.push_back(i);
            }
            while queue.pop_front().is_some() {}
        })
    });

    group.finish();
}

criterion_group!(benches, bench_envelope_encode_decode, bench_payload_stack);
criterion_main!(benches);
