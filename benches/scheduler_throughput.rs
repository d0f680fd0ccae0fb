use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use casepipe::datamodel::{
    ContentError, ContentStore, DataSource, FileMeta, ItemId, ItemKind, JobId,
};
use casepipe::job::JobContext;
use casepipe::scheduler::{TaskScheduler, WorkerId};

const FILES: usize = 1_000;

/// Flat in-memory store with a fixed number of files, just enough surface
/// for the scheduler.
struct BenchStore {
    files: Vec<FileMeta>,
}

impl BenchStore {
    fn new(count: usize) -> Self {
        let files = (0..count)
            .map(|i| FileMeta {
                id: ItemId(i as u64 + 1),
                name: format!("file_{i:06}"),
                kind: ItemKind::File,
                size: 0,
                has_children: false,
            })
            .collect();
        Self { files }
    }
}

impl ContentStore for BenchStore {
    fn item(&self, id: ItemId) -> Result<FileMeta, ContentError> {
        self.files
            .get(id.0 as usize - 1)
            .cloned()
            .ok_or(ContentError::UnknownItem(id))
    }

    fn top_level_items(&self, _data_source: ItemId) -> Result<Vec<FileMeta>, ContentError> {
        Ok(self.files.clone())
    }

    fn children(&self, _id: ItemId) -> Result<Vec<FileMeta>, ContentError> {
        Ok(Vec::new())
    }

    fn read_at(&self, _id: ItemId, _offset: u64, _buf: &mut [u8]) -> Result<usize, ContentError> {
        Ok(0)
    }

    fn mark_analyzed(&self, _id: ItemId) -> Result<(), ContentError> {
        Ok(())
    }
}

fn bench_setup() -> (Arc<TaskScheduler>, Arc<JobContext>) {
    let scheduler = Arc::new(TaskScheduler::new(4));
    let store = Arc::new(BenchStore::new(FILES));
    let ctx = JobContext::new(
        JobId(1),
        DataSource {
            id: ItemId(0),
            name: "bench".to_string(),
        },
        store,
        true,
        Arc::clone(&scheduler),
    );
    (scheduler, ctx)
}

fn schedule_and_drain(c: &mut Criterion) {
    c.bench_function("schedule_and_drain_1k_file_tasks", |b| {
        b.iter_batched(
            bench_setup,
            |(scheduler, ctx)| {
                scheduler.schedule_file_tasks(&ctx, Vec::new());
                for _ in 0..FILES {
                    let task = scheduler.next_file_task(WorkerId(0)).expect("task");
                    scheduler.task_completed(task.task_id());
                }
                assert!(scheduler.tasks_completed_for_job(ctx.id()));
            },
            BatchSize::SmallInput,
        )
    });
}

fn fast_track_burst(c: &mut Criterion) {
    c.bench_function("fast_track_256_derived_files", |b| {
        b.iter_batched(
            || {
                let (scheduler, ctx) = bench_setup();
                let derived: Vec<FileMeta> = (0..256)
                    .map(|i| FileMeta {
                        id: ItemId(100_000 + i),
                        name: format!("derived_{i}"),
                        kind: ItemKind::File,
                        size: 0,
                        has_children: false,
                    })
                    .collect();
                (scheduler, ctx, derived)
            },
            |(scheduler, ctx, derived)| {
                scheduler.fast_track_file_tasks(&ctx, derived);
                for _ in 0..256 {
                    let task = scheduler.next_file_task(WorkerId(0)).expect("task");
                    scheduler.task_completed(task.task_id());
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, schedule_and_drain, fast_track_burst);
criterion_main!(benches);
