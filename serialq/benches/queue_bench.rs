//! Benchmarks for queue throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serialq::errors::TaskError;
use serialq::executor::{QueuedExecutor, TaskContext};

fn queue_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");

    c.bench_function("exec_100_sequential_tasks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let queue = QueuedExecutor::new();
                let mut last = None;
                for i in 0..100_u64 {
                    last = Some(queue.exec(
                        move |ctx: TaskContext<u64>| async move {
                            Ok::<u64, TaskError>(black_box(ctx.args))
                        },
                        i,
                    ));
                }
                if let Some(handle) = last {
                    let _ = handle.outcome().await;
                }
            });
        });
    });
}

criterion_group!(benches, queue_benchmark);
criterion_main!(benches);
