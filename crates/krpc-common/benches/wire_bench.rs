// Criterion benchmarks for krpc-common wire and framing layer
//
// Run benchmarks with:
//   cargo bench -p krpc-common
//
// For detailed output with plots:
//   cargo bench -p krpc-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use krpc_common::pb;
use krpc_common::transport::ProtobufCodec;
use krpc_common::wire;

fn bench_varint(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint");

    group.bench_function("encode_small", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(10);
            wire::encode_varint(black_box(42), &mut buf);
            buf
        });
    });

    group.bench_function("encode_negative_int32", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(10);
            wire::encode_int32(black_box(-33), &mut buf);
            buf
        });
    });

    let mut long = Vec::new();
    wire::encode_varint(u64::MAX, &mut long);
    group.bench_function("decode_ten_bytes", |b| {
        b.iter(|| wire::decode_varint(black_box(&long)));
    });

    group.finish();
}

fn bench_scalars(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalars");

    group.bench_function("encode_double", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(8);
            wire::encode_double(black_box(3.14159265359), &mut buf);
            buf
        });
    });

    let text = "ケルバ種のための小さな一歩！".repeat(8);
    let mut encoded = Vec::new();
    wire::encode_string(&text, &mut encoded);

    group.bench_function("encode_string", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            wire::encode_string(black_box(&text), &mut buf);
            buf
        });
    });

    group.bench_function("decode_string", |b| {
        b.iter(|| wire::decode_string(black_box(&encoded)));
    });

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    let request = pb::Request {
        calls: vec![pb::ProcedureCall {
            service: "SpaceCenter".to_string(),
            procedure: "Vessel_get_Flight".to_string(),
            arguments: vec![pb::Argument {
                position: 0,
                value: vec![0x01],
            }],
            ..Default::default()
        }],
    };
    let update = pb::StreamUpdate {
        results: (0..50)
            .map(|id| pb::StreamResult {
                id,
                result: Some(pb::ProcedureResult {
                    error: None,
                    value: vec![0u8; 8],
                }),
            })
            .collect(),
    };
    let framed_update = ProtobufCodec::encode_framed(&update);

    group.bench_function("encode_request", |b| {
        b.iter(|| ProtobufCodec::encode_framed(black_box(&request)));
    });

    group.bench_function("decode_stream_update_50", |b| {
        b.iter(|| ProtobufCodec::decode_framed::<pb::StreamUpdate>(black_box(&framed_update)));
    });

    group.finish();
}

criterion_group!(benches, bench_varint, bench_scalars, bench_framing);
criterion_main!(benches);
