//! Collection throughput over chains and cycles.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use ouro_gc::{Context, Handle, Managed};

#[derive(Managed)]
struct Node {
    _value: u64,
    #[gc(slot)]
    next: Handle<Node>,
}

const CHAIN: u64 = 1_000;

/// A context holding one `CHAIN`-long ring with no external handles.
fn garbage_ring() -> Context {
    let ctx = Context::new();
    let head = ctx.make(Node {
        _value: 0,
        next: Handle::null(),
    });
    let mut prev = head.clone();
    for value in 1..CHAIN {
        let node = ctx.make(Node {
            _value: value,
            next: Handle::null(),
        });
        prev.borrow_mut().next = node.clone();
        prev = node;
    }
    prev.borrow_mut().next = head.clone();
    ctx
}

fn bench_collect(c: &mut Criterion) {
    c.bench_function("collect_garbage_ring_1k", |b| {
        b.iter_batched(
            garbage_ring,
            |ctx| {
                ctx.collect();
                assert!(ctx.is_empty());
                ctx
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("collect_live_chain_1k", |b| {
        let ctx = Context::new();
        let mut head = ctx.make(Node {
            _value: 0,
            next: Handle::null(),
        });
        for value in 1..CHAIN {
            let node = ctx.make(Node {
                _value: value,
                next: Handle::null(),
            });
            node.borrow_mut().next = head.clone();
            head = node;
        }
        b.iter(|| {
            ctx.collect();
            assert_eq!(ctx.len(), CHAIN as usize);
        });
        drop(head);
    });

    c.bench_function("alloc_and_drop_1k", |b| {
        b.iter(|| {
            let ctx = Context::new();
            for value in 0..CHAIN {
                let _ = ctx.make(Node {
                    _value: value,
                    next: Handle::null(),
                });
            }
            assert!(ctx.is_empty());
        });
    });
}

criterion_group!(benches, bench_collect);
criterion_main!(benches);
