//! Benchmarks for the settle loop.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weft_engine::{Engine, ListenerSpec};

/// A chain of listeners, each reading the previous subject and writing
/// the next one. One external write propagates through the whole chain.
fn build_chain(en: &mut Engine, len: usize) -> (weft_engine::SubjectId, weft_engine::SubjectId) {
    let mut prev = en.add_subject(0);
    en.seed_value(prev, 0_i64);
    let first = prev;

    for _ in 0..len {
        let next = en.add_subject(0);
        en.seed_value(next, 0_i64);
        let input = prev;
        let listener = en.add_listener(
            ListenerSpec::default(),
            Box::new(move |en| {
                en.used(input)?;
                let v: i64 = en.value(input).unwrap_or(0);
                en.write_value(next, v + 1).map(|_| ())
            }),
        );
        en.atomically(|en| en.schedule(listener, None))
            .expect("chain setup");
        prev = next;
    }
    (first, prev)
}

fn bench_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("settle");

    for &len in &[16_usize, 128] {
        group.bench_function(format!("chain_{}", len), |b| {
            let mut en = Engine::new();
            let (head, tail) = build_chain(&mut en, len);
            let mut tick = 0_i64;
            b.iter(|| {
                tick += 1;
                en.atomically(|en| en.write_value(head, tick).map(|_| ()))
                    .expect("propagate");
                black_box(en.value::<i64>(tail));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_propagation);
criterion_main!(benches);
