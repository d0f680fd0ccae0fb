//! # Task Scheduler
//!
//! Queues work items by category and hands them to worker threads through
//! blocking dequeues. File tasks move through three stages: a priority queue
//! of root-level tasks (user content first), a pending queue of directories
//! awaiting expansion, and the feed the worker threads consume. Directories
//! are expanded one at a time to throttle the number of queued tasks, and
//! root-level tasks are preferred over nested ones so shallow content is
//! analyzed first. Streamed tasks are drained opportunistically ahead of
//! batch work without starving it.
//!
//! The scheduler is an explicit instance shared by reference; tests build
//! isolated schedulers.

mod tasks;

pub use tasks::{
    ArtifactTask, DataSourceTask, FileTask, ResultTask, TaskCategory, TaskId, WorkerId,
};

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::datamodel::{ArtifactMeta, FileMeta, ItemId, ItemKind, JobId, ResultMeta};
use crate::job::JobContext;

use tasks::StreamedFileTask;

/// Root tasks are ordered so likely user content is analyzed before general
/// file system content. Ties go to the older task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RootPriority {
    Last,
    Low,
    Medium,
    High,
}

static HIGH_PRIORITY_NAMES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^Users",
        r"(?i)^Documents and Settings",
        r"(?i)^home",
        r"(?i)^ProgramData",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("priority pattern"))
    .collect()
});

static MEDIUM_PRIORITY_NAMES: Lazy<Vec<Regex>> =
    Lazy::new(|| vec![Regex::new(r"(?i)^Program Files").expect("priority pattern")]);

static LOW_PRIORITY_NAMES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)^Windows", r"(?i)^\$OrphanFiles"]
        .iter()
        .map(|p| Regex::new(p).expect("priority pattern"))
        .collect()
});

static LAST_PRIORITY_NAMES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)^pagefile", r"(?i)^hiberfil"]
        .iter()
        .map(|p| Regex::new(p).expect("priority pattern"))
        .collect()
});

fn root_priority(file: &FileMeta) -> RootPriority {
    if !matches!(file.kind, ItemKind::File | ItemKind::Directory) {
        // Unstructured content such as unallocated space goes last.
        return RootPriority::Last;
    }
    let name = file.name.as_str();
    if HIGH_PRIORITY_NAMES.iter().any(|p| p.is_match(name)) {
        RootPriority::High
    } else if MEDIUM_PRIORITY_NAMES.iter().any(|p| p.is_match(name)) {
        RootPriority::Medium
    } else if LOW_PRIORITY_NAMES.iter().any(|p| p.is_match(name)) {
        RootPriority::Low
    } else if LAST_PRIORITY_NAMES.iter().any(|p| p.is_match(name)) {
        RootPriority::Last
    } else {
        RootPriority::Medium
    }
}

struct RootEntry {
    priority: RootPriority,
    task: FileTask,
}

impl PartialEq for RootEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.task.id == other.task.id
    }
}

impl Eq for RootEntry {}

impl PartialOrd for RootEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RootEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then the older (smaller) task id.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.task.id.0.cmp(&self.task.id.0))
    }
}

/// Non-blocking view of queue depths, used for progress reporting only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub data_source_queued: usize,
    pub root_files_queued: usize,
    pub directory_files_queued: usize,
    pub streamed_files_queued: usize,
    pub files_ready: usize,
    pub artifacts_queued: usize,
    pub results_queued: usize,
    pub in_progress: usize,
}

impl QueueSnapshot {
    pub fn total_queued(&self) -> usize {
        self.data_source_queued
            + self.root_files_queued
            + self.directory_files_queued
            + self.streamed_files_queued
            + self.files_ready
            + self.artifacts_queued
            + self.results_queued
    }
}

struct SchedulerState {
    next_task_id: u64,
    root_file_tasks: BinaryHeap<RootEntry>,
    pending_file_tasks: VecDeque<FileTask>,
    streamed_file_tasks: VecDeque<StreamedFileTask>,
    file_feed: VecDeque<FileTask>,
    data_source_tasks: VecDeque<DataSourceTask>,
    artifact_tasks: VecDeque<ArtifactTask>,
    result_tasks: VecDeque<ResultTask>,
    in_progress: HashMap<TaskId, (JobId, TaskCategory)>,
    closed: bool,
}

impl SchedulerState {
    fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        id
    }
}

pub struct TaskScheduler {
    file_worker_count: usize,
    state: Mutex<SchedulerState>,
    file_ready: Condvar,
    data_source_ready: Condvar,
    artifact_ready: Condvar,
    result_ready: Condvar,
}

impl TaskScheduler {
    pub fn new(file_worker_count: usize) -> Self {
        Self {
            file_worker_count: file_worker_count.max(1),
            state: Mutex::new(SchedulerState {
                next_task_id: 0,
                root_file_tasks: BinaryHeap::new(),
                pending_file_tasks: VecDeque::new(),
                streamed_file_tasks: VecDeque::new(),
                file_feed: VecDeque::new(),
                data_source_tasks: VecDeque::new(),
                artifact_tasks: VecDeque::new(),
                result_tasks: VecDeque::new(),
                in_progress: HashMap::new(),
                closed: false,
            }),
            file_ready: Condvar::new(),
            data_source_ready: Condvar::new(),
            artifact_ready: Condvar::new(),
            result_ready: Condvar::new(),
        }
    }

    /// True when the item should be analyzed at all: `.`/`..` pseudo entries
    /// are skipped, and unallocated space only runs when the job asks for it.
    fn should_enqueue(ctx: &JobContext, file: &FileMeta) -> bool {
        if file.name == "." || file.name == ".." {
            return false;
        }
        if file.kind == ItemKind::UnallocatedBlocks && !ctx.process_unallocated() {
            return false;
        }
        true
    }

    /// Schedules the data source task and the initial file tasks for a job
    /// as one atomic operation, so a completion check can never observe a
    /// half-scheduled job.
    pub fn schedule_initial_tasks(
        &self,
        ctx: &Arc<JobContext>,
        with_data_source: bool,
        with_files: bool,
    ) {
        if ctx.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if with_data_source {
            Self::enqueue_data_source(&mut state, ctx);
        }
        if with_files {
            Self::enqueue_top_level_files(&mut state, ctx);
        }
        drop(state);
        if with_data_source {
            self.data_source_ready.notify_one();
        }
        if with_files {
            self.file_ready.notify_all();
        }
    }

    pub fn schedule_data_source_task(&self, ctx: &Arc<JobContext>) {
        if ctx.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        Self::enqueue_data_source(&mut state, ctx);
        drop(state);
        self.data_source_ready.notify_one();
    }

    fn enqueue_data_source(state: &mut SchedulerState, ctx: &Arc<JobContext>) {
        let id = state.next_id();
        state.data_source_tasks.push_back(DataSourceTask {
            id,
            ctx: Arc::clone(ctx),
            worker: None,
        });
    }

    /// Schedules file tasks for the given files, or for the data source's
    /// top-level items when the list is empty.
    pub fn schedule_file_tasks(&self, ctx: &Arc<JobContext>, files: Vec<FileMeta>) {
        if ctx.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if files.is_empty() {
            Self::enqueue_top_level_files(&mut state, ctx);
        } else {
            for file in files {
                Self::enqueue_root_file(&mut state, ctx, file);
            }
        }
        drop(state);
        self.file_ready.notify_all();
    }

    fn enqueue_top_level_files(state: &mut SchedulerState, ctx: &Arc<JobContext>) {
        match ctx.store().top_level_items(ctx.data_source().id) {
            Ok(items) => {
                for file in items {
                    Self::enqueue_root_file(state, ctx, file);
                }
            }
            Err(err) => {
                warn!(job = %ctx.id(), "could not enumerate top level items: {err}");
            }
        }
    }

    fn enqueue_root_file(state: &mut SchedulerState, ctx: &Arc<JobContext>, file: FileMeta) {
        if !Self::should_enqueue(ctx, &file) {
            return;
        }
        let id = state.next_id();
        let priority = root_priority(&file);
        state.root_file_tasks.push(RootEntry {
            priority,
            task: FileTask {
                id,
                ctx: Arc::clone(ctx),
                file,
                worker: None,
            },
        });
    }

    /// Schedules streamed file ids for a job. Record lookup is deferred
    /// until the task is drained toward the worker feed.
    pub fn schedule_streamed_file_tasks(&self, ctx: &Arc<JobContext>, ids: Vec<ItemId>) {
        if ctx.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for item in ids {
            let id = state.next_id();
            state.streamed_file_tasks.push_back(StreamedFileTask {
                id,
                ctx: Arc::clone(ctx),
                item,
            });
        }
        drop(state);
        self.file_ready.notify_all();
    }

    /// Puts file tasks at the front of the worker feed, ahead of all queued
    /// batch work. Used for carved and derived files discovered by a task
    /// that is already in progress, so they inherit its priority.
    pub fn fast_track_file_tasks(&self, ctx: &Arc<JobContext>, files: Vec<FileMeta>) {
        if ctx.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for file in files.into_iter().rev() {
            if !Self::should_enqueue(ctx, &file) {
                continue;
            }
            let id = state.next_id();
            state.file_feed.push_front(FileTask {
                id,
                ctx: Arc::clone(ctx),
                file,
                worker: None,
            });
        }
        drop(state);
        self.file_ready.notify_all();
    }

    pub fn schedule_artifact_tasks(&self, ctx: &Arc<JobContext>, artifacts: Vec<ArtifactMeta>) {
        if ctx.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for artifact in artifacts {
            let id = state.next_id();
            state.artifact_tasks.push_back(ArtifactTask {
                id,
                ctx: Arc::clone(ctx),
                artifact,
                worker: None,
            });
        }
        drop(state);
        self.artifact_ready.notify_one();
    }

    pub fn schedule_result_tasks(&self, ctx: &Arc<JobContext>, results: Vec<ResultMeta>) {
        if ctx.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for result in results {
            let id = state.next_id();
            state.result_tasks.push_back(ResultTask {
                id,
                ctx: Arc::clone(ctx),
                result,
                worker: None,
            });
        }
        drop(state);
        self.result_ready.notify_one();
    }

    /// Blocks until a file task is available. Returns `None` when the
    /// scheduler is closed; the worker loop should exit cleanly, leaving
    /// unprocessed items queued.
    pub fn next_file_task(&self, worker: WorkerId) -> Option<FileTask> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            self.refill_file_feed(&mut state);
            if let Some(mut task) = state.file_feed.pop_front() {
                task.worker = Some(worker);
                // The dequeue and the in-progress registration are one
                // critical section: the task is never in neither place.
                state.in_progress.insert(task.id, (task.ctx.id(), TaskCategory::File));
                return Some(task);
            }
            state = self.file_ready.wait(state).unwrap();
        }
    }

    pub fn next_data_source_task(&self, worker: WorkerId) -> Option<DataSourceTask> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            if let Some(mut task) = state.data_source_tasks.pop_front() {
                task.worker = Some(worker);
                state
                    .in_progress
                    .insert(task.id, (task.ctx.id(), TaskCategory::DataSource));
                return Some(task);
            }
            state = self.data_source_ready.wait(state).unwrap();
        }
    }

    pub fn next_artifact_task(&self, worker: WorkerId) -> Option<ArtifactTask> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            if let Some(mut task) = state.artifact_tasks.pop_front() {
                task.worker = Some(worker);
                state
                    .in_progress
                    .insert(task.id, (task.ctx.id(), TaskCategory::DataArtifact));
                return Some(task);
            }
            state = self.artifact_ready.wait(state).unwrap();
        }
    }

    pub fn next_result_task(&self, worker: WorkerId) -> Option<ResultTask> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            if let Some(mut task) = state.result_tasks.pop_front() {
                task.worker = Some(worker);
                state
                    .in_progress
                    .insert(task.id, (task.ctx.id(), TaskCategory::AnalysisResult));
                return Some(task);
            }
            state = self.result_ready.wait(state).unwrap();
        }
    }

    /// Moves tasks toward the worker feed. Streamed tasks go first, in
    /// batches of the worker count; then batch tasks are shuffled in with
    /// root-level tasks preferred and directories expanded one at a time.
    fn refill_file_feed(&self, state: &mut SchedulerState) {
        while state.file_feed.is_empty() && !state.streamed_file_tasks.is_empty() {
            let mut moved = 0;
            while moved < self.file_worker_count {
                let Some(streamed) = state.streamed_file_tasks.pop_front() else {
                    break;
                };
                if streamed.ctx.is_cancelled() {
                    continue;
                }
                match streamed.ctx.store().item(streamed.item) {
                    Ok(file) => {
                        let task = FileTask {
                            id: streamed.id,
                            ctx: streamed.ctx,
                            file,
                            worker: None,
                        };
                        if Self::should_enqueue(&task.ctx, &task.file) {
                            state.file_feed.push_back(task);
                            moved += 1;
                        }
                    }
                    Err(err) => {
                        warn!(item = %streamed.item, "dropping streamed task: {err}");
                    }
                }
            }
        }

        while state.file_feed.is_empty() {
            let task = if let Some(entry) = state.root_file_tasks.pop() {
                entry.task
            } else if let Some(task) = state.pending_file_tasks.pop_front() {
                task
            } else {
                return;
            };
            if task.ctx.is_cancelled() {
                continue;
            }
            let ctx = Arc::clone(&task.ctx);
            let file = task.file.clone();
            if Self::should_enqueue(&ctx, &file) {
                state.file_feed.push_back(task);
            }
            if file.has_children {
                match ctx.store().children(file.id) {
                    Ok(children) => {
                        for child in children {
                            let id = state.next_id();
                            let child_task = FileTask {
                                id,
                                ctx: Arc::clone(&ctx),
                                file: child,
                                worker: None,
                            };
                            if child_task.file.has_children {
                                state.pending_file_tasks.push_back(child_task);
                            } else if Self::should_enqueue(&ctx, &child_task.file) {
                                state.file_feed.push_back(child_task);
                            }
                        }
                    }
                    Err(err) => {
                        warn!(item = %file.id, "could not expand children: {err}");
                    }
                }
            }
        }
    }

    /// Removes a task from the in-progress registry once its pipeline run
    /// finished or the task was discarded.
    pub fn task_completed(&self, task_id: TaskId) {
        let mut state = self.state.lock().unwrap();
        if state.in_progress.remove(&task_id).is_none() {
            warn!(task = task_id.0, "completion for unknown task");
        }
    }

    /// True when no queue holds a task for the job and none is in progress.
    pub fn tasks_completed_for_job(&self, job: JobId) -> bool {
        let state = self.state.lock().unwrap();
        !(state.data_source_tasks.iter().any(|t| t.ctx.id() == job)
            || state.root_file_tasks.iter().any(|e| e.task.ctx.id() == job)
            || state.pending_file_tasks.iter().any(|t| t.ctx.id() == job)
            || state.streamed_file_tasks.iter().any(|t| t.ctx.id() == job)
            || state.file_feed.iter().any(|t| t.ctx.id() == job)
            || state.artifact_tasks.iter().any(|t| t.ctx.id() == job)
            || state.result_tasks.iter().any(|t| t.ctx.id() == job)
            || state.in_progress.values().any(|(id, _)| *id == job))
    }

    /// Drops a cancelled job's tasks from the upstream file queues. Tasks
    /// already in the worker feed or the other category queues drain through
    /// execution, where the cancelled pipelines short-circuit.
    pub fn cancel_pending_tasks(&self, job: JobId) {
        let mut state = self.state.lock().unwrap();
        let root = std::mem::take(&mut state.root_file_tasks);
        state.root_file_tasks = root
            .into_iter()
            .filter(|e| e.task.ctx.id() != job)
            .collect();
        state.pending_file_tasks.retain(|t| t.ctx.id() != job);
        state.streamed_file_tasks.retain(|t| t.ctx.id() != job);
    }

    pub fn snapshot_for_job(&self, job: JobId) -> QueueSnapshot {
        let state = self.state.lock().unwrap();
        QueueSnapshot {
            data_source_queued: state.data_source_tasks.iter().filter(|t| t.ctx.id() == job).count(),
            root_files_queued: state.root_file_tasks.iter().filter(|e| e.task.ctx.id() == job).count(),
            directory_files_queued: state.pending_file_tasks.iter().filter(|t| t.ctx.id() == job).count(),
            streamed_files_queued: state.streamed_file_tasks.iter().filter(|t| t.ctx.id() == job).count(),
            files_ready: state.file_feed.iter().filter(|t| t.ctx.id() == job).count(),
            artifacts_queued: state.artifact_tasks.iter().filter(|t| t.ctx.id() == job).count(),
            results_queued: state.result_tasks.iter().filter(|t| t.ctx.id() == job).count(),
            in_progress: state.in_progress.values().filter(|(id, _)| *id == job).count(),
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().unwrap();
        QueueSnapshot {
            data_source_queued: state.data_source_tasks.len(),
            root_files_queued: state.root_file_tasks.len(),
            directory_files_queued: state.pending_file_tasks.len(),
            streamed_files_queued: state.streamed_file_tasks.len(),
            files_ready: state.file_feed.len(),
            artifacts_queued: state.artifact_tasks.len(),
            results_queued: state.result_tasks.len(),
            in_progress: state.in_progress.len(),
        }
    }

    /// Wakes every blocked worker so the loops can exit. Queued tasks are
    /// left in place; close is for process shutdown, not job completion.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.file_ready.notify_all();
        self.data_source_ready.notify_all();
        self.artifact_ready.notify_all();
        self.result_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}
