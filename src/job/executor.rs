//! Orchestrates one job: builds the module tiers, starts the pipelines,
//! feeds the scheduler, runs dequeued tasks through the right pipeline, and
//! walks the tier sequence to completion or cancellation.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::JobSettings;
use crate::datamodel::{FileMeta, ItemId, JobId};
use crate::events::{EventHub, JobEvent};
use crate::job::{CancelReason, JobContext};
use crate::module::{ErrorReport, ModuleTemplate};
use crate::pipeline::tier::{ModuleTier, build_tiers};
use crate::scheduler::{
    ArtifactTask, DataSourceTask, FileTask, QueueSnapshot, ResultTask, TaskScheduler, WorkerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Created,
    Running,
    Completed,
    Cancelled,
    ShutDown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::ShutDown => "shut down",
        }
    }
}

/// One collected module failure, flattened for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub module: String,
    pub message: String,
}

/// Point-in-time view of a job for progress reporting. Pull-based; taking a
/// snapshot never perturbs scheduling state.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub data_source: String,
    pub started_at: DateTime<Utc>,
    pub state: JobState,
    pub current_tier: usize,
    pub processed_files: u64,
    pub estimated_files: u64,
    pub queues: QueueSnapshot,
    pub cancelled: bool,
    pub cancel_reason: CancelReason,
    pub skipped_data_source_modules: Vec<String>,
    pub module_error_count: u64,
    pub degraded: bool,
}

pub struct JobExecutor {
    ctx: Arc<JobContext>,
    scheduler: Arc<TaskScheduler>,
    events: Arc<EventHub>,
    tiers: Vec<ModuleTier>,
    tier_index: AtomicUsize,
    /// Serializes completion checks and tier transitions.
    tier_lock: Mutex<()>,
    state: Mutex<JobState>,
    state_changed: Condvar,
    streaming: bool,
    awaiting_stream: AtomicBool,
    degraded: AtomicBool,
    estimated_files: AtomicU64,
    processed_files: AtomicU64,
    errors: Mutex<Vec<ErrorSummary>>,
}

impl JobExecutor {
    pub fn new(
        ctx: Arc<JobContext>,
        templates: Vec<ModuleTemplate>,
        settings: &JobSettings,
        scheduler: Arc<TaskScheduler>,
        worker_count: usize,
        events: Arc<EventHub>,
    ) -> Arc<Self> {
        let tiers = build_tiers(&templates, settings, worker_count);
        let first = tiers.first();
        ctx.set_module_presence(
            first.map(|t| t.has_file_pipelines()).unwrap_or(false),
            first.map(|t| t.has_artifact_pipeline()).unwrap_or(false),
            first.map(|t| t.has_result_pipeline()).unwrap_or(false),
        );
        Arc::new(Self {
            ctx,
            scheduler,
            events,
            tiers,
            tier_index: AtomicUsize::new(0),
            tier_lock: Mutex::new(()),
            state: Mutex::new(JobState::Created),
            state_changed: Condvar::new(),
            streaming: settings.streaming,
            awaiting_stream: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            estimated_files: AtomicU64::new(0),
            processed_files: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
        })
    }

    pub fn ctx(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    pub fn job_id(&self) -> JobId {
        self.ctx.id()
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap()
    }

    pub fn is_complete(&self) -> bool {
        self.state() == JobState::ShutDown
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// True when any module reported a start up error; the job still runs.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn module_errors(&self) -> Vec<ErrorSummary> {
        self.errors.lock().unwrap().clone()
    }

    pub fn current_tier(&self) -> usize {
        self.tier_index.load(Ordering::Acquire)
    }

    /// Starts every tier's pipelines, schedules the initial tasks for the
    /// first tier, and transitions to Running. Start up errors are returned
    /// and the job is flagged degraded, but the job proceeds; failed modules
    /// simply contribute nothing.
    pub fn start_up(&self) -> Vec<ErrorSummary> {
        let mut startup_errors = Vec::new();
        for tier in &self.tiers {
            startup_errors.extend(summarize(tier.start_up(&self.ctx)));
        }
        if !startup_errors.is_empty() {
            self.degraded.store(true, Ordering::Release);
            for err in &startup_errors {
                warn!(job = %self.ctx.id(), module = %err.module, "start up error: {}", err.message);
            }
            self.errors.lock().unwrap().extend(startup_errors.iter().cloned());
        }

        self.set_state(JobState::Running);
        self.events.publish(JobEvent::Started {
            job_id: self.ctx.id(),
            data_source: self.ctx.data_source().name.clone(),
        });

        if self.streaming {
            // File tasks arrive via add_streamed_files; the data source task
            // is scheduled once the stream is committed.
            self.awaiting_stream.store(true, Ordering::Release);
            info!(job = %self.ctx.id(), "job started in streaming mode");
        } else {
            let first = self.tiers.first();
            let with_data_source =
                first.map(|t| t.has_data_source_pipeline()).unwrap_or(false);
            let with_files = first.map(|t| t.has_file_pipelines()).unwrap_or(false);
            if with_files {
                self.estimate_files();
            }
            self.scheduler
                .schedule_initial_tasks(&self.ctx, with_data_source, with_files);
            info!(job = %self.ctx.id(), "job started in batch mode");
        }

        // Every scheduled task may have been filtered out; without a check
        // here such a job would never be observed as complete.
        self.check_for_completion();
        startup_errors
    }

    fn estimate_files(&self) {
        match self.ctx.store().file_count(self.ctx.data_source().id) {
            Ok(count) => self.estimated_files.store(count, Ordering::Release),
            Err(err) => warn!(job = %self.ctx.id(), "could not estimate file count: {err}"),
        }
    }

    /// Signals in streaming mode that the producer has finished adding
    /// files and the data source itself is ready for analysis.
    pub fn stream_committed(&self) {
        if !self.streaming || !self.awaiting_stream.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(job = %self.ctx.id(), "stream committed");
        let first = self.tiers.first();
        if first.map(|t| t.has_file_pipelines()).unwrap_or(false) {
            self.estimate_files();
        }
        if first.map(|t| t.has_data_source_pipeline()).unwrap_or(false) {
            self.scheduler.schedule_data_source_task(&self.ctx);
        }
        self.check_for_completion();
    }

    pub fn add_streamed_files(&self, ids: Vec<ItemId>) {
        self.ctx.add_streamed_files(ids);
    }

    /// Injects files discovered mid-run, e.g. carved or extracted content.
    pub fn add_derived_files(&self, files: Vec<FileMeta>) {
        self.ctx.add_derived_files(files);
    }

    /// Cancels the whole job. Monotonic: the first reason wins and the flag
    /// never clears. Queued upstream tasks are dropped; in-flight and
    /// already-fed tasks drain through short-circuited pipeline runs.
    pub fn cancel(&self, reason: CancelReason) {
        if !self.ctx.set_cancelled(reason) {
            return;
        }
        info!(job = %self.ctx.id(), reason = reason.as_str(), "job cancelled");
        self.scheduler.cancel_pending_tasks(self.ctx.id());
        self.events.publish(JobEvent::Cancelled {
            job_id: self.ctx.id(),
            reason,
        });
        self.check_for_completion();
    }

    /// Asks the currently running data source module to stop, without
    /// cancelling the job. The module polls the flag via the job context.
    pub fn cancel_current_data_source_module(&self) {
        self.ctx.request_data_source_module_cancel();
    }

    pub fn execute_data_source_task(&self, task: DataSourceTask) {
        let tier_index = self.tier_index.load(Ordering::Acquire);
        if let Some(pipeline) = self.tiers.get(tier_index).and_then(|t| t.data_source_pipeline()) {
            let errors = pipeline
                .lock()
                .unwrap()
                .run(&self.ctx, self.ctx.data_source());
            self.record_errors(errors);
        } else {
            debug!(job = %self.ctx.id(), tier = tier_index, "no data source pipeline; discarding task");
        }
        self.scheduler.task_completed(task.task_id());
        self.check_for_completion();
    }

    pub fn execute_file_task(&self, task: FileTask) {
        let tier_index = self.tier_index.load(Ordering::Acquire);
        if let Some(pool) = self.tiers.get(tier_index).and_then(|t| t.file_pipelines()) {
            let worker = task.worker().unwrap_or(WorkerId(0));
            let errors = {
                let mut lease = pool.checkout(worker);
                lease.run(&self.ctx, task.file())
            };
            self.record_errors(errors);
            if !self.ctx.is_cancelled() {
                if let Err(err) = self.ctx.store().mark_analyzed(task.file().id) {
                    warn!(job = %self.ctx.id(), file = %task.file().id, "could not persist analyzed mark: {err}");
                }
            }
            self.processed_files.fetch_add(1, Ordering::AcqRel);
        } else {
            debug!(job = %self.ctx.id(), tier = tier_index, "no file pipelines; discarding task");
        }
        self.scheduler.task_completed(task.task_id());
        self.check_for_completion();
    }

    pub fn execute_artifact_task(&self, task: ArtifactTask) {
        if let Some(pipeline) = self.tiers.first().and_then(|t| t.artifact_pipeline()) {
            let errors = pipeline.lock().unwrap().run(&self.ctx, task.artifact());
            self.record_errors(errors);
        }
        self.scheduler.task_completed(task.task_id());
        self.check_for_completion();
    }

    pub fn execute_result_task(&self, task: ResultTask) {
        if let Some(pipeline) = self.tiers.first().and_then(|t| t.result_pipeline()) {
            let errors = pipeline.lock().unwrap().run(&self.ctx, task.result());
            self.record_errors(errors);
        }
        self.scheduler.task_completed(task.task_id());
        self.check_for_completion();
    }

    fn record_errors(&self, errors: Vec<ErrorReport>) {
        if errors.is_empty() {
            return;
        }
        let summaries = summarize(errors);
        for err in &summaries {
            warn!(job = %self.ctx.id(), module = %err.module, "module error: {}", err.message);
            self.events.publish(JobEvent::ModuleError {
                job_id: self.ctx.id(),
                module: err.module.clone(),
                message: err.message.clone(),
            });
        }
        self.errors.lock().unwrap().extend(summaries);
    }

    /// Checks whether the current tier has drained and, if so, advances to
    /// the next tier or finishes the job. Serialized by the tier lock so two
    /// workers finishing simultaneously cannot both advance.
    fn check_for_completion(&self) {
        let _guard = self.tier_lock.lock().unwrap();
        if self.state() != JobState::Running {
            return;
        }
        if self.awaiting_stream.load(Ordering::Acquire) {
            return;
        }
        if !self.scheduler.tasks_completed_for_job(self.ctx.id()) {
            return;
        }

        let current = self.tier_index.load(Ordering::Acquire);
        if let Some(tier) = self.tiers.get(current) {
            self.record_errors(tier.shut_down());
        }

        let mut next = current + 1;
        if !self.ctx.is_cancelled() {
            while next < self.tiers.len() {
                let tier = &self.tiers[next];
                self.tier_index.store(next, Ordering::Release);
                if tier.has_data_source_pipeline() {
                    info!(job = %self.ctx.id(), tier = next, "advancing to next module tier");
                    self.scheduler.schedule_data_source_task(&self.ctx);
                    // Completion is re-checked when that task finishes.
                    return;
                }
                // Nothing runnable in this tier; shut it down and move on.
                self.record_errors(tier.shut_down());
                next += 1;
            }
        }

        let cancelled = self.ctx.is_cancelled();
        self.set_state(if cancelled {
            JobState::Cancelled
        } else {
            JobState::Completed
        });
        // A cancelled job may leave later tiers behind; shut them all down.
        for tier in self.tiers.iter().skip(next) {
            self.record_errors(tier.shut_down());
        }
        self.set_state(JobState::ShutDown);
        if cancelled {
            info!(job = %self.ctx.id(), reason = self.ctx.cancel_reason().as_str(), "job drained after cancellation");
        } else {
            info!(
                job = %self.ctx.id(),
                processed_files = self.processed_files.load(Ordering::Acquire),
                "job completed"
            );
            self.events.publish(JobEvent::Completed {
                job_id: self.ctx.id(),
            });
        }
    }

    fn set_state(&self, state: JobState) {
        let mut guard = self.state.lock().unwrap();
        *guard = state;
        self.state_changed.notify_all();
    }

    /// Blocks until the job reaches ShutDown or the timeout elapses.
    /// Returns true when the job is done.
    pub fn wait_until_complete(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        let (guard, result) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |state| *state != JobState::ShutDown)
            .unwrap();
        drop(guard);
        !result.timed_out()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.ctx.id(),
            data_source: self.ctx.data_source().name.clone(),
            started_at: self.ctx.started_at(),
            state: self.state(),
            current_tier: self.tier_index.load(Ordering::Acquire),
            processed_files: self.processed_files.load(Ordering::Acquire),
            estimated_files: self.estimated_files.load(Ordering::Acquire),
            queues: self.scheduler.snapshot_for_job(self.ctx.id()),
            cancelled: self.ctx.is_cancelled(),
            cancel_reason: self.ctx.cancel_reason(),
            skipped_data_source_modules: self.ctx.skipped_data_source_modules(),
            module_error_count: self.errors.lock().unwrap().len() as u64,
            degraded: self.is_degraded(),
        }
    }
}

fn summarize(errors: Vec<ErrorReport>) -> Vec<ErrorSummary> {
    errors
        .into_iter()
        .map(|report| ErrorSummary {
            module: report.module,
            message: report.error.to_string(),
        })
        .collect()
}
