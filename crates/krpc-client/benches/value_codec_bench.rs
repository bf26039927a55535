// Criterion benchmarks for value encoding and argument binding
//
// Run benchmarks with:
//   cargo bench -p krpc-client

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use krpc_client::encoding;
use krpc_client::types::ValueKind;
use krpc_client::{Arguments, CallExecutor, TypeRegistry, Value};
use std::sync::Arc;

fn bench_collections(c: &mut Criterion) {
    let mut group = c.benchmark_group("collections");
    let registry = TypeRegistry::new();
    let double = registry.value(ValueKind::Double);
    let list = registry.list(&double);

    for size in [10, 100, 1000] {
        let value = Value::List((0..size).map(|i| Value::Double(i as f64)).collect());
        let encoded = encoding::encode(&value, &list).unwrap();

        group.bench_with_input(BenchmarkId::new("encode_list", size), &value, |b, value| {
            b.iter(|| encoding::encode(black_box(value), &list));
        });
        group.bench_with_input(BenchmarkId::new("decode_list", size), &encoded, |b, data| {
            b.iter(|| encoding::decode(black_box(data), &list));
        });
    }

    let dictionary = registry.dictionary(
        &registry.value(ValueKind::String),
        &registry.value(ValueKind::Int32),
    );
    let value = Value::Dictionary(
        (0..100)
            .map(|i| (Value::from(format!("key{}", i)), Value::Int32(i)))
            .collect(),
    );
    group.bench_function("encode_dictionary_100", |b| {
        b.iter(|| encoding::encode(black_box(&value), &dictionary));
    });

    group.finish();
}

fn bench_coercion(c: &mut Criterion) {
    let mut group = c.benchmark_group("coercion");
    let registry = TypeRegistry::new();
    let float = registry.value(ValueKind::Float);
    let int_list = registry.list(&registry.value(ValueKind::Int64));

    group.bench_function("int_to_float", |b| {
        b.iter(|| registry.coerce(black_box(&Value::Int32(42)), &float));
    });

    let ints = Value::List((0..100).map(Value::Int32).collect());
    group.bench_function("list_of_100_widened", |b| {
        b.iter(|| registry.coerce(black_box(&ints), &int_list));
    });

    group.finish();
}

fn bench_binding(c: &mut Criterion) {
    let executor = CallExecutor::new(Arc::new(TypeRegistry::new()), None);
    let set_rate = executor.krpc().set_stream_rate.clone();
    let args = Arguments::new().arg(7u64).arg(30.0);

    c.bench_function("build_call_set_stream_rate", |b| {
        b.iter(|| executor.build_call(&set_rate, black_box(&args)));
    });
}

criterion_group!(benches, bench_collections, bench_coercion, bench_binding);
criterion_main!(benches);
