//! Codec throughput benchmarks.
//!
//! The decode path sits on every panel notification, so regressions here
//! show up directly as access latency.

use bytes::BytesMut;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

use biogate_protocol::{ZkCodec, ZkFrame};

fn encode_match_event(c: &mut Criterion) {
    let frame = ZkFrame::new(501, 0, 0x1000, {
        let mut payload = Vec::new();
        payload.extend_from_slice(&17u32.to_le_bytes());
        payload.extend_from_slice(&92u32.to_le_bytes());
        payload
    });

    c.bench_function("encode_match_event", |b| {
        b.iter(|| {
            let mut codec = ZkCodec::new();
            let mut buf = BytesMut::with_capacity(64);
            codec.encode(black_box(frame.clone()), &mut buf).unwrap();
            black_box(buf);
        });
    });
}

fn decode_match_event(c: &mut Criterion) {
    let mut wire = BytesMut::new();
    let frame = ZkFrame::new(501, 0, 0x1000, vec![0u8; 8]);
    frame.encode(&mut wire);
    let wire = wire.freeze();

    c.bench_function("decode_match_event", |b| {
        b.iter(|| {
            let mut codec = ZkCodec::new();
            let mut buf = BytesMut::from(&wire[..]);
            let decoded = codec.decode(&mut buf).unwrap();
            black_box(decoded);
        });
    });
}

fn decode_pipelined_frames(c: &mut Criterion) {
    // A burst of 100 heartbeats and match events in one buffer, the worst
    // realistic case after a panel reconnects and flushes its queue.
    let mut wire = BytesMut::new();
    for i in 0..100u32 {
        let frame = if i % 2 == 0 {
            ZkFrame::new(500, 0, 0x1000, vec![])
        } else {
            ZkFrame::new(501, 0, 0x1000, vec![0u8; 8])
        };
        frame.encode(&mut wire);
    }
    let wire = wire.freeze();

    c.bench_function("decode_100_pipelined_frames", |b| {
        b.iter(|| {
            let mut codec = ZkCodec::new();
            let mut buf = BytesMut::from(&wire[..]);
            let mut count = 0;
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                black_box(frame);
                count += 1;
            }
            assert_eq!(count, 100);
        });
    });
}

criterion_group!(
    benches,
    encode_match_event,
    decode_match_event,
    decode_pipelined_frames
);
criterion_main!(benches);
