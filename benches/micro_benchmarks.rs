//! Micro benchmarks for the hot paths that need no server
//!
//! Run with: cargo bench --bench micro_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pgwire_lite::protocol::{decode_message, Framer};
use pgwire_lite::{format_query, params, SqlValue};

fn data_row(values: &[&str]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for v in values {
        body.extend_from_slice(&(v.len() as i32).to_be_bytes());
        body.extend_from_slice(v.as_bytes());
    }
    let mut out = vec![b'D'];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn result_stream(rows: usize) -> Vec<u8> {
    let row = data_row(&["12345", "alice@example.com", "2024-03-09 07:05:01+00"]);
    let mut out = Vec::with_capacity(row.len() * rows + 16);
    for _ in 0..rows {
        out.extend_from_slice(&row);
    }
    out.extend_from_slice(&[b'Z', 0, 0, 0, 5, b'I']);
    out
}

// ============================================================================
// Framing and decoding
// ============================================================================

fn framer_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("framer");

    for rows in [10usize, 1_000] {
        let stream = result_stream(rows);
        group.throughput(Throughput::Bytes(stream.len() as u64));

        group.bench_with_input(BenchmarkId::new("single_read", rows), &stream, |b, stream| {
            b.iter(|| {
                let mut framer = Framer::new();
                framer.extend(black_box(stream));
                let frames = framer.drain_frames().unwrap();
                for frame in &frames {
                    black_box(decode_message(frame).unwrap());
                }
            })
        });

        // Typical socket reads split messages at arbitrary points
        group.bench_with_input(BenchmarkId::new("chunked_1460", rows), &stream, |b, stream| {
            b.iter(|| {
                let mut framer = Framer::new();
                let mut count = 0;
                for chunk in stream.chunks(1460) {
                    framer.extend(chunk);
                    while let Some(frame) = framer.next_frame().unwrap() {
                        black_box(decode_message(&frame).unwrap());
                        count += 1;
                    }
                }
                count
            })
        });
    }

    group.finish();
}

// ============================================================================
// Literal formatting
// ============================================================================

fn format_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_query");

    let sql = "UPDATE wallets SET address = $2, linked = $3, streak = $4 WHERE user_id = $1";
    let values = params![123456789, "0xDEADBEEF", true, 17];
    group.bench_function("mixed_params", |b| {
        b.iter(|| format_query(black_box(sql), black_box(&values)).unwrap())
    });

    let nasty = "O'Brien said \\'hi\\' ".repeat(64);
    let values = vec![SqlValue::from(nasty)];
    group.bench_function("escape_heavy_text", |b| {
        b.iter(|| format_query(black_box("SELECT $1"), black_box(&values)).unwrap())
    });

    group.bench_function("no_placeholders", |b| {
        b.iter(|| format_query(black_box("SELECT 1"), black_box(&[])).unwrap())
    });

    group.finish();
}

criterion_group!(benches, framer_benchmarks, format_benchmarks);
criterion_main!(benches);
