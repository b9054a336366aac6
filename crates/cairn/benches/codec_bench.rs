//! Benchmarks for Cairn hot paths.
//!
//! Run with: cargo bench --package cairn
//!
//! ## Benchmark Categories
//!
//! - **Column Codec**: encode/decode throughput per generation
//! - **Row Layer**: full tuple-to-bytes round trip
//! - **Histogram**: segment merge under sustained arrival

use std::sync::Arc;

use cairn::histogram::merge;
use cairn::{
    ByteReader, Codec, ColumnDefinition, DataType, EngineConfig, FormatVersion, KvStore, MemKv,
    MessageRegistry, PartitioningSpec, TableDefinition, TimePartitionSchema, Tuple, Value,
    DEFAULT_MAX_BINARY_LENGTH,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_long_codec(c: &mut Criterion) {
    let values: Vec<Value> = (0..10_000).map(|i| Value::Long(i * 37 - 5_000)).collect();
    let mut group = c.benchmark_group("long_codec");
    for version in [FormatVersion::V2, FormatVersion::V3] {
        let codec = Codec::bind(version, DataType::Long, DEFAULT_MAX_BINARY_LENGTH);
        group.bench_with_input(
            BenchmarkId::new("encode_10k", format!("{version:?}")),
            &codec,
            |b, codec| {
                b.iter(|| {
                    let mut out = Vec::with_capacity(8 * values.len());
                    for v in &values {
                        codec.encode(black_box(v), &mut out).unwrap();
                    }
                    out
                })
            },
        );
    }
    group.finish();
}

fn bench_string_codec_v3(c: &mut Criterion) {
    let codec = Codec::bind(FormatVersion::V3, DataType::String, DEFAULT_MAX_BINARY_LENGTH);
    let value = Value::String("MEAS/high_rate_telemetry_frame".to_string());
    let mut encoded = Vec::new();
    codec.encode(&value, &mut encoded).unwrap();

    c.bench_function("string_encode_v3", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(encoded.len());
            codec.encode(black_box(&value), &mut out).unwrap();
            out
        })
    });
    c.bench_function("string_decode_v3", |b| {
        b.iter(|| {
            let mut r = ByteReader::new(black_box(&encoded));
            codec.decode(&mut r).unwrap()
        })
    });
}

fn bench_row_roundtrip(c: &mut Criterion) {
    let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
    let table = TableDefinition::create(
        kv,
        Arc::new(MessageRegistry::new()),
        &EngineConfig::default(),
        "tm",
        vec![
            ColumnDefinition::new("gentime", DataType::Timestamp),
            ColumnDefinition::new("seq", DataType::Int),
            ColumnDefinition::new("pname", DataType::Enum),
            ColumnDefinition::new("packet", DataType::Binary),
        ],
        &["gentime", "seq"],
        PartitioningSpec::Time {
            column: "gentime".into(),
            schema: TimePartitionSchema::Yyyy,
        },
        vec![],
    )
    .unwrap();
    let tuple = Tuple::new()
        .with("gentime", Value::Timestamp(1_700_000_000_000))
        .with("seq", Value::Int(42))
        .with("pname", Value::Enum("power_tm".into()))
        .with("packet", Value::Binary(vec![0x5A; 512]));
    let row = table.encode_row(&tuple).unwrap();

    c.bench_function("row_encode", |b| b.iter(|| table.encode_row(black_box(&tuple)).unwrap()));
    c.bench_function("row_decode", |b| {
        b.iter(|| table.decode_row(black_box(&row.key), black_box(&row.value)).unwrap())
    });
}

fn bench_histogram_merge(c: &mut Criterion) {
    // a segment shaped like bursty telemetry: 200 coalesced runs
    let mut records = Vec::new();
    for t in 0..200 {
        records = merge(&records, t * 150_000);
    }

    c.bench_function("histogram_merge_200_runs", |b| {
        b.iter(|| merge(black_box(&records), 15_000_075))
    });
}

criterion_group!(
    benches,
    bench_long_codec,
    bench_string_codec_v3,
    bench_row_roundtrip,
    bench_histogram_merge
);
criterion_main!(benches);
