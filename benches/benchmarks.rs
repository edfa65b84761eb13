use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use kaldb::chunk::LogMessage;
use kaldb::recovery::validate_offsets;

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("offset_validator");
    for (name, task) in [
        ("inside", (200, 300)),
        ("overlap_begin", (50, 300)),
        ("overlap_end", (800, 1000)),
        ("before", (1, 50)),
    ] {
        group.bench_function(BenchmarkId::new("validate", name), |b| {
            b.iter(|| validate_offsets(100, 900, task.0, task.1));
        });
    }
    group.finish();

    let payload = serde_json::json!({
        "id": "message-1",
        "timestamp_ms": 1_601_546_400_000i64,
        "source": "api_log",
        "message": "GET /api/v1/search 200 43ms",
    })
    .to_string()
    .into_bytes();
    c.bench_function("parse_log_message", |b| {
        b.iter(|| LogMessage::from_json_bytes(&payload).unwrap());
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
