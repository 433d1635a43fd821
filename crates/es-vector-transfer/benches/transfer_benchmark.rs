//! Benchmarks for es-vector-transfer.
//!
//! Run with: cargo bench -p es-vector-transfer

#![allow(clippy::pedantic)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;

use es_vector_transfer::{
    FieldMapper, HashEmbedder, InMemorySource, InMemoryStore, Record, TransferConfig,
    TransferPipeline,
};

fn article(i: usize) -> Record {
    Record::new(
        format!("doc-{i}"),
        json!({
            "title": format!("Article {i}"),
            "content": "Ownership rules: each value has one owner, and the value is dropped when the owner goes out of scope.",
            "author": "Ferris",
            "tags": ["rust", "memory"],
            "stats": { "views": i, "likes": i / 2 }
        }),
    )
}

/// Benchmark record mapping (field selection, renames, metadata sanitizing)
fn bench_field_mapping(c: &mut Criterion) {
    let record = article(42);
    let mapper = FieldMapper::new(
        vec!["title".to_string(), "content".to_string()],
        vec!["title".to_string(), "author".to_string(), "tags".to_string(), "stats".to_string()],
    )
    .with_field_mapping([("title".to_string(), "document_title".to_string())].into());

    c.bench_function("map_record", |b| b.iter(|| black_box(mapper.map(black_box(&record)))));

    let all_fields = FieldMapper::new(Vec::new(), Vec::new()).with_embed_text(true);
    c.bench_function("map_record_all_fields", |b| {
        b.iter(|| black_box(all_fields.map(black_box(&record))))
    });
}

/// Benchmark the offline hash embedder at common model dimensions
fn bench_hash_embedding(c: &mut Criterion) {
    let text = "Ownership rules: each value has one owner, and the value is dropped when the owner goes out of scope.";

    let mut group = c.benchmark_group("hash_embed_by_dimension");
    for dim in [384, 768, 1536, 3072] {
        let embedder = HashEmbedder::new(dim);
        group.bench_with_input(BenchmarkId::new("dimension", dim), &text, |b, t| {
            b.iter(|| black_box(embedder.embed(t)))
        });
    }
    group.finish();
}

/// Benchmark a full in-memory transfer by worker count
fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let records: Vec<Record> = (0..2_000).map(article).collect();

    let mut group = c.benchmark_group("transfer_2000_docs");
    group.sample_size(20);
    for threads in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::new("max_threads", threads), &threads, |b, &threads| {
            b.to_async(&runtime).iter(|| {
                let records = records.clone();
                async move {
                    let config = TransferConfig {
                        batch_size: 100,
                        max_threads: threads,
                        fields_to_embed: vec!["title".to_string(), "content".to_string()],
                        metadata_fields: vec!["title".to_string(), "author".to_string()],
                        ..Default::default()
                    };
                    let pipeline = TransferPipeline::new(
                        config,
                        Arc::new(InMemorySource::new(records)),
                        Arc::new(HashEmbedder::new(384)),
                        Arc::new(InMemoryStore::new(384)),
                    )
                    .unwrap();
                    black_box(pipeline.run(None, false).await.unwrap())
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_field_mapping, bench_hash_embedding, bench_pipeline);
criterion_main!(benches);
