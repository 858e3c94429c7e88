//! Micro-benchmark of the queue ranking comparator over a large ready set.

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hive_core::domain::models::{Task, TaskStatus};
use hive_core::services::task_queue::compare_ready;

fn build_backlog(size: usize) -> Vec<Task> {
    let now = Utc::now();
    (0..size)
        .map(|i| {
            let mut task = Task::new(format!("task-{i}"), "bench task", "build")
                .with_priority((i % 17) as i32);
            task.submitted_at = now + Duration::seconds(i as i64);
            if i % 5 == 0 {
                task.deadline = Some(now + Duration::seconds((i % 600) as i64));
            }
            task.transition_to(TaskStatus::Ready).unwrap();
            task
        })
        .collect()
}

fn bench_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_ranking");
    for size in [100usize, 1_000, 10_000] {
        let backlog = build_backlog(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &backlog, |b, backlog| {
            let now = Utc::now();
            let horizon = Duration::seconds(300);
            b.iter(|| {
                let mut tasks = backlog.clone();
                tasks.sort_by(|a, b| compare_ready(a, b, now, horizon));
                tasks.first().map(|t| t.id)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ranking);
criterion_main!(benches);
