use criterion::{black_box, criterion_group, criterion_main, Criterion};
use request_logger::{
    config::LoggerConfig,
    filter::{default_field_filter, filter_body, filter_object},
};
use serde_json::json;

fn config_loading_benchmark(c: &mut Criterion) {
    c.bench_function("config_loading", |b| {
        b.iter(|| black_box(LoggerConfig::load("config/missing.yaml").unwrap()))
    });
}

fn filter_object_benchmark(c: &mut Criterion) {
    let source = json!({
        "url": "/users?page=2",
        "method": "GET",
        "httpVersion": "1.1",
        "headers": {"host": "localhost", "accept": "*/*"},
        "query": {"page": "2"}
    });
    let allowed: Vec<String> = ["url", "headers", "method", "httpVersion", "originalUrl", "query"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let filter = default_field_filter();

    c.bench_function("filter_object", |b| {
        b.iter(|| black_box(filter_object(&source, &allowed, &*filter)))
    });
}

fn filter_body_benchmark(c: &mut Criterion) {
    let body = json!({"name": "bob", "email": "bob@example.com", "password": "hunter2"});
    let request_whitelist = vec!["url".to_string(), "body".to_string()];
    let whitelist = vec!["name".to_string(), "email".to_string()];
    let blacklist = vec!["password".to_string()];
    let filter = default_field_filter();

    c.bench_function("filter_body_whitelist", |b| {
        b.iter(|| {
            black_box(filter_body(
                Some(&body),
                &request_whitelist,
                &*filter,
                &whitelist,
                &blacklist,
            ))
        })
    });

    c.bench_function("filter_body_whole", |b| {
        b.iter(|| black_box(filter_body(Some(&body), &request_whitelist, &*filter, &[], &[])))
    });
}

criterion_group!(
    benches,
    config_loading_benchmark,
    filter_object_benchmark,
    filter_body_benchmark
);
criterion_main!(benches);
