use criterion::{BatchSize, Criterion};
use std::hint::black_box;

use rgc::scheduler::{GenericTaskQueueSet, OverflowTaskQueue, ParkMiller};

type Queue = OverflowTaskQueue<usize>;

/// Tasks per iteration. Twice the task queue capacity, so half of them spill to the overflow
/// stack.
fn tasks() -> usize {
    2 * Queue::default().max_elems()
}

pub fn bench(c: &mut Criterion) {
    let n = tasks();
    let mut group = c.benchmark_group("queue");

    group.bench_function("push_pop_local", |b| {
        let q = Queue::default();
        b.iter(|| {
            for i in 0..1024 {
                q.push(black_box(i));
            }
            while let Some(t) = q.pop_local() {
                black_box(t);
            }
        })
    });

    group.bench_function("push_pop_overflow", |b| {
        let q = Queue::default();
        b.iter(|| {
            for i in 0..n {
                q.push(black_box(i));
            }
            while let Some(t) = q.pop() {
                black_box(t);
            }
        })
    });

    group.bench_function("steal", |b| {
        b.iter_batched(
            || {
                let set = GenericTaskQueueSet::<Queue>::new(4);
                for i in 0..1024 {
                    set.queue(0).push(i);
                }
                set
            },
            |set| {
                let mut seed = ParkMiller::new(17);
                let mut stolen = 0;
                while let Some(t) = set.steal(1, &mut seed) {
                    black_box(t);
                    stolen += 1;
                }
                assert_eq!(stolen, 1024);
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}
