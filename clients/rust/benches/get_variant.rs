use std::hint::black_box;
use std::sync::Arc;

use ab_testing::hashing::variant_bucket;
use ab_testing::{
    Engine, EngineConfig, MemorySink, MemoryStore, Operator, RuleType, TargetingRule, Test,
    UserContext, Variant,
};
use criterion::{Criterion, criterion_group, criterion_main};

fn engine() -> (Engine, Test) {
    let engine = Engine::builder(Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()))
        .config(EngineConfig::default().with_max_queue_size(0))
        .build();
    let test = Test::new(
        "checkout-flow",
        vec![
            Variant::new("A", 20.0).control(),
            Variant::new("B", 30.0),
            Variant::new("C", 50.0),
        ],
    )
    .with_rule(TargetingRule::new(
        RuleType::Url,
        Operator::Regex,
        r"^https://shop\.example\.com/(cart|checkout)",
    ));
    engine.add_test(test.clone()).unwrap();
    (engine, test)
}

fn bench_hash(c: &mut Criterion) {
    c.bench_function("variant_bucket", |b| {
        b.iter(|| variant_bucket(black_box("user-1234567"), black_box("checkout-flow"), "ab-testing"))
    });
}

fn bench_resolve(c: &mut Criterion) {
    let (engine, test) = engine();
    let sticky = UserContext::new("sess_sticky").with_url("https://shop.example.com/cart");
    engine.resolve(&test, &sticky);

    c.bench_function("resolve_sticky", |b| {
        b.iter(|| engine.resolve(black_box(&test), black_box(&sticky)))
    });

    let mut n = 0u64;
    c.bench_function("resolve_new_subject", |b| {
        b.iter(|| {
            n += 1;
            let ctx = UserContext::new(format!("sess_{n}"))
                .with_url("https://shop.example.com/checkout");
            engine.resolve(black_box(&test), &ctx)
        })
    });
}

criterion_group!(benches, bench_hash, bench_resolve);
criterion_main!(benches);
