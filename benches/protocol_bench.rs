//! Benchmarks for the protocol hot paths.
//!
//! Run with: `cargo bench --bench protocol_bench`

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use pgpipe::protocol::MessageSlicer;
use pgpipe::protocol::backend::{parse_data_row, parse_error_fields};
use pgpipe::value::{Value, oid};

/// One framed DataRow message with a single column of `data_size` bytes.
fn make_data_row_frame(data_size: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + 4 + data_size);
    payload.extend_from_slice(&1i16.to_be_bytes());
    payload.extend_from_slice(&(data_size as i32).to_be_bytes());
    payload.extend_from_slice(&vec![0x42u8; data_size]);

    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(b'D');
    frame.extend_from_slice(&((payload.len() as i32) + 4).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Generate a realistic error response payload.
fn make_error_payload() -> Bytes {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"SERROR\0");
    payload.extend_from_slice(b"VFATAL\0");
    payload.extend_from_slice(b"C42P01\0");
    payload.extend_from_slice(b"Mrelation \"users\" does not exist\0");
    payload.extend_from_slice(b"Dtable was dropped in a previous migration\0");
    payload.extend_from_slice(b"Hcheck your migration scripts\0");
    payload.extend_from_slice(b"Fparse_relation.c\0");
    payload.extend_from_slice(b"L1234\0");
    payload.extend_from_slice(b"Rparseropen\0");
    payload.push(0);
    Bytes::from(payload)
}

fn bench_slicer(c: &mut Criterion) {
    let mut group = c.benchmark_group("slicer");

    for size in [64, 256, 1024, 4096, 16384] {
        let frame = make_data_row_frame(size);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| {
                let mut slicer = MessageSlicer::new();
                slicer.push_chunk(black_box(frame));
                slicer.next_message().unwrap().unwrap()
            });
        });
    }

    group.finish();
}

fn bench_parse_data_row(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_data_row");

    for columns in [1usize, 4, 16, 64] {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(columns as i16).to_be_bytes());
        for _ in 0..columns {
            payload.extend_from_slice(&8i32.to_be_bytes());
            payload.extend_from_slice(b"01234567");
        }
        let payload = Bytes::from(payload);
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(columns),
            &payload,
            |b, payload| {
                b.iter(|| parse_data_row(black_box(payload)).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_parse_error(c: &mut Criterion) {
    let payload = make_error_payload();
    c.bench_function("parse_error_fields", |b| {
        b.iter(|| parse_error_fields(black_box(&payload)).unwrap());
    });
}

fn bench_value_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_codec");

    group.bench_function("encode_int8", |b| {
        b.iter(|| Value::Int8(black_box(0x0123_4567_89ab_cdef)).encode(true));
    });

    let raw = Bytes::from(42i64.to_be_bytes().to_vec());
    group.bench_function("decode_int8_binary", |b| {
        b.iter(|| Value::decode(Some(black_box(&raw)), oid::INT8, 1, true).unwrap());
    });

    let raw = Bytes::from_static(b"123456.789");
    group.bench_function("decode_numeric_text", |b| {
        b.iter(|| Value::decode(Some(black_box(&raw)), oid::NUMERIC, 0, true).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_slicer,
    bench_parse_data_row,
    bench_parse_error,
    bench_value_codec
);
criterion_main!(benches);
