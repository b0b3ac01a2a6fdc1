use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use nodevault_config::testing::TestEnvironment;
use nodevault_meta::MemoryNodeStore;
use nodevault_node::{checksum_reader, NodeManager, ReaderAt, UploadRequest};

fn bench_checksum(c: &mut Criterion) {
    let data = vec![7u8; 4 * 1024 * 1024];
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("md5_sha1_4mb", |b| {
        b.iter(|| checksum_reader(black_box(&data[..]), 10240).unwrap())
    });
    group.finish();
}

fn bench_composite_read(c: &mut Criterion) {
    let env = TestEnvironment::new().unwrap();
    let mut config = env.config();
    config.storage.chunk_size = 1024 * 1024;
    let mgr = NodeManager::new(&config, Arc::new(MemoryNodeStore::new()));

    let mut ids = Vec::new();
    for i in 0..16 {
        let path = env.upload(&format!("p{}", i), &vec![i as u8; 256 * 1024]).unwrap();
        let req = UploadRequest::new().param("path", path.to_string_lossy());
        ids.push(mgr.create_node(None, &req).unwrap().id);
    }
    let req = UploadRequest::new()
        .param("type", "virtual")
        .param("source", ids.join(","));
    let node = mgr.create_node(None, &req).unwrap();
    let reader = mgr.reader(&node).unwrap();

    c.bench_function("composite_read_64kb_across_boundary", |b| {
        // Window straddling parts 3 and 4
        let offset = 4 * 256 * 1024 - 32 * 1024;
        b.iter(|| reader.read_range(black_box(offset), 64 * 1024).unwrap())
    });
}

criterion_group!(benches, bench_checksum, bench_composite_read);
criterion_main!(benches);
