use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::SocketAddr;
use std::sync::Arc;
use txtcourier::dns::DnsMessage;
use txtcourier::{Catalog, ChunkSize, Chunks, DeliveryServer, Router, StagerContext, Target};

fn context(size: ChunkSize) -> StagerContext {
    StagerContext {
        target: Target::Powershell,
        zone: "files.example.com".to_string(),
        nameserver: "ns1.example.com".to_string(),
        size,
    }
}

/// Benchmark base64 chunking of a file
fn bench_chunk_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_encoding");

    for kib in [1usize, 64, 1024] {
        let payload = vec![0xa5u8; kib * 1024];
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(kib), &payload, |b, payload| {
            b.iter(|| Chunks::encode(black_box(payload), ChunkSize::default()))
        });
    }

    group.finish();
}

/// Benchmark stager generation for a catalog of many files
fn bench_router_build(c: &mut Criterion) {
    let size = ChunkSize::default();
    let files: Vec<(String, Vec<u8>)> = (0..200)
        .map(|i| (format!("file-{}.bin", i), vec![i as u8; 4096]))
        .collect();

    c.bench_function("router_build_200_files", |b| {
        b.iter(|| {
            let catalog = Catalog::from_files(
                files.iter().map(|(name, data)| (name.as_str(), data.as_slice())),
                size,
            );
            Router::new(catalog, &context(size))
        })
    });
}

/// Benchmark the per-query path: parse-free handling of a prepared query
fn bench_query_handling(c: &mut Criterion) {
    let size = ChunkSize::default();
    let payload = vec![0x42u8; 256 * 1024];
    let catalog = Catalog::from_files([("payload.bin", payload.as_slice())], size);
    let server = DeliveryServer::new(
        Arc::new(Router::new(catalog, &context(size))),
        "ns1.example.com",
    );
    let peer: SocketAddr = "192.0.2.1:5353".parse().unwrap();

    let mut group = c.benchmark_group("query_handling");

    for name in [
        "payload-bin.files.example.com",
        "payload-bin.exec.2.files.example.com",
        "payload-bin.1000.files.example.com",
        "unknown.files.example.com",
    ] {
        let query = DnsMessage::new_query(name, 0x1234);
        group.bench_with_input(BenchmarkId::from_parameter(name), &query, |b, query| {
            b.iter(|| server.handle(black_box(query), peer))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chunk_encoding,
    bench_router_build,
    bench_query_handling
);
criterion_main!(benches);
