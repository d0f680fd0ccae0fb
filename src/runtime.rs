//! # Analysis Runtime
//!
//! Owns the process-wide worker thread pool: a configurable number of file
//! workers plus one thread each for data source, artifact and result tasks,
//! all shared across concurrently running jobs. Threads block on the
//! scheduler's dequeues and exit cleanly when the scheduler is closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use crate::config::{JobSettings, RuntimeConfig};
use crate::datamodel::{ContentStore, DataSource, JobId};
use crate::events::{EventHub, JobEvent};
use crate::job::{ErrorSummary, JobContext, JobExecutor};
use crate::module::ModuleTemplate;
use crate::scheduler::{TaskScheduler, WorkerId};

pub struct AnalysisRuntime {
    worker_count: usize,
    scheduler: Arc<TaskScheduler>,
    events: Arc<EventHub>,
    jobs: Mutex<HashMap<JobId, Arc<JobExecutor>>>,
    next_job_id: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisRuntime {
    pub fn new(config: &RuntimeConfig) -> Arc<Self> {
        let worker_count = config.effective_worker_threads();
        let runtime = Arc::new(Self {
            worker_count,
            scheduler: Arc::new(TaskScheduler::new(worker_count)),
            events: Arc::new(EventHub::new()),
            jobs: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        });
        runtime.spawn_workers();
        runtime
    }

    fn spawn_workers(self: &Arc<Self>) {
        let mut handles = self.workers.lock().unwrap();
        for index in 0..self.worker_count {
            let runtime = Arc::clone(self);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("file-worker-{index}"))
                    .spawn(move || runtime.file_worker_loop(WorkerId(index)))
                    .expect("spawn file worker"),
            );
        }
        let runtime = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("data-source-worker".to_string())
                .spawn(move || runtime.data_source_worker_loop(WorkerId(runtime.worker_count)))
                .expect("spawn data source worker"),
        );
        let runtime = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("artifact-worker".to_string())
                .spawn(move || runtime.artifact_worker_loop(WorkerId(runtime.worker_count + 1)))
                .expect("spawn artifact worker"),
        );
        let runtime = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("result-worker".to_string())
                .spawn(move || runtime.result_worker_loop(WorkerId(runtime.worker_count + 2)))
                .expect("spawn result worker"),
        );
    }

    fn file_worker_loop(&self, worker: WorkerId) {
        while let Some(task) = self.scheduler.next_file_task(worker) {
            match self.job(task.job_id()) {
                Some(executor) => {
                    executor.execute_file_task(task);
                    self.reap(&executor);
                }
                None => {
                    warn!(job = %task.job_id(), "file task for unknown job");
                    self.scheduler.task_completed(task.task_id());
                }
            }
        }
        debug!(?worker, "file worker exiting");
    }

    fn data_source_worker_loop(&self, worker: WorkerId) {
        while let Some(task) = self.scheduler.next_data_source_task(worker) {
            match self.job(task.job_id()) {
                Some(executor) => {
                    executor.execute_data_source_task(task);
                    self.reap(&executor);
                }
                None => {
                    warn!(job = %task.job_id(), "data source task for unknown job");
                    self.scheduler.task_completed(task.task_id());
                }
            }
        }
        debug!(?worker, "data source worker exiting");
    }

    fn artifact_worker_loop(&self, worker: WorkerId) {
        while let Some(task) = self.scheduler.next_artifact_task(worker) {
            match self.job(task.job_id()) {
                Some(executor) => {
                    executor.execute_artifact_task(task);
                    self.reap(&executor);
                }
                None => {
                    warn!(job = %task.job_id(), "artifact task for unknown job");
                    self.scheduler.task_completed(task.task_id());
                }
            }
        }
        debug!(?worker, "artifact worker exiting");
    }

    fn result_worker_loop(&self, worker: WorkerId) {
        while let Some(task) = self.scheduler.next_result_task(worker) {
            match self.job(task.job_id()) {
                Some(executor) => {
                    executor.execute_result_task(task);
                    self.reap(&executor);
                }
                None => {
                    warn!(job = %task.job_id(), "result task for unknown job");
                    self.scheduler.task_completed(task.task_id());
                }
            }
        }
        debug!(?worker, "result worker exiting");
    }

    fn reap(&self, executor: &Arc<JobExecutor>) {
        if executor.is_complete() {
            self.jobs.lock().unwrap().remove(&executor.job_id());
        }
    }

    /// Submits a data source for analysis through the given module
    /// templates. Returns the executor handle and any module start up
    /// errors; the job runs regardless.
    pub fn start_job(
        &self,
        store: Arc<dyn ContentStore>,
        data_source: DataSource,
        templates: Vec<ModuleTemplate>,
        settings: &JobSettings,
    ) -> (Arc<JobExecutor>, Vec<ErrorSummary>) {
        let id = JobId(self.next_job_id.fetch_add(1, Ordering::AcqRel) + 1);
        let ctx = JobContext::new(
            id,
            data_source,
            store,
            settings.process_unallocated,
            Arc::clone(&self.scheduler),
        );
        let executor = JobExecutor::new(
            ctx,
            templates,
            settings,
            Arc::clone(&self.scheduler),
            self.worker_count,
            Arc::clone(&self.events),
        );
        self.jobs.lock().unwrap().insert(id, Arc::clone(&executor));
        let errors = executor.start_up();
        if executor.is_complete() {
            self.jobs.lock().unwrap().remove(&id);
        }
        (executor, errors)
    }

    pub fn job(&self, id: JobId) -> Option<Arc<JobExecutor>> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn subscribe(&self) -> Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Closes the scheduler and joins every worker thread. Queued tasks of
    /// unfinished jobs are abandoned in place.
    pub fn shutdown(&self) {
        self.scheduler.close();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}
