//! Benchmarks for consensus scoring.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wallbounce_core::consensus::{self, ConsensusOptions};
use wallbounce_core::provider::{
    Capability, InvocationKind, ProviderDescriptor, ProviderOutput, ProviderResponse, TokenUsage,
};

fn response(id: &str, content: String, confidence: f64) -> ProviderResponse {
    let descriptor = ProviderDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        vendor: format!("vendor-{id}"),
        tier: 3,
        capabilities: vec![Capability::Analysis],
        cost_per_token: 0.0,
        kind: InvocationKind::InProcessSdk,
    };
    ProviderResponse::from_output(
        &descriptor,
        ProviderOutput {
            content,
            confidence: Some(confidence),
            reasoning: None,
            usage: TokenUsage::default(),
        },
        50,
    )
}

fn synthetic_content(seed: usize, words: usize) -> String {
    (0..words)
        .map(|i| format!("word{}", (i * 7 + seed * 13) % 500))
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_similarity(c: &mut Criterion) {
    let a = synthetic_content(1, 400);
    let b = synthetic_content(2, 400);
    c.bench_function("similarity_400_tokens", |bencher| {
        bencher.iter(|| consensus::similarity(black_box(&a), black_box(&b)));
    });
}

fn bench_consensus_build(c: &mut Criterion) {
    let opts = ConsensusOptions {
        min_providers: 2,
        consensus_floor: 0.6,
        require_consensus: true,
    };
    let responses: Vec<ProviderResponse> = (0..5)
        .map(|i| {
            response(
                &format!("p{i}"),
                synthetic_content(i, 300),
                0.6 + i as f64 * 0.05,
            )
        })
        .collect();

    c.bench_function("consensus_build_5_providers", |bencher| {
        bencher.iter(|| consensus::build(black_box(responses.clone()), black_box(&opts)));
    });
}

criterion_group!(benches, bench_similarity, bench_consensus_build);
criterion_main!(benches);
