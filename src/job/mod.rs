//! # Job State
//!
//! `JobContext` is the per-job state shared by the scheduler, the pipelines
//! and the modules: identity, cancellation, and the injection points modules
//! use to report derived items mid-run. The orchestration itself lives in
//! [`JobExecutor`].

mod executor;

pub use executor::{ErrorSummary, JobExecutor, JobSnapshot, JobState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::datamodel::{ArtifactMeta, ContentStore, DataSource, FileMeta, ItemId, JobId, ResultMeta};
use crate::module::ProcessTerminator;
use crate::scheduler::TaskScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelReason {
    NotCancelled,
    UserRequested,
    TimeLimitExceeded,
    ResourcesExhausted,
    ShuttingDown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::NotCancelled => "not cancelled",
            CancelReason::UserRequested => "user requested",
            CancelReason::TimeLimitExceeded => "time limit exceeded",
            CancelReason::ResourcesExhausted => "resources exhausted",
            CancelReason::ShuttingDown => "shutting down",
        }
    }
}

/// Shared state of one analysis job. Cancellation is monotonic: the flag is
/// set at most once and never cleared.
pub struct JobContext {
    me: Weak<JobContext>,
    id: JobId,
    data_source: DataSource,
    store: Arc<dyn ContentStore>,
    process_unallocated: bool,
    started_at: DateTime<Utc>,
    scheduler: Arc<TaskScheduler>,
    cancelled: AtomicBool,
    cancel_reason: Mutex<CancelReason>,
    ds_module_cancelled: AtomicBool,
    skipped_ds_modules: Mutex<Vec<String>>,
    has_file_modules: AtomicBool,
    has_artifact_modules: AtomicBool,
    has_result_modules: AtomicBool,
}

impl JobContext {
    pub fn new(
        id: JobId,
        data_source: DataSource,
        store: Arc<dyn ContentStore>,
        process_unallocated: bool,
        scheduler: Arc<TaskScheduler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            data_source,
            store,
            process_unallocated,
            started_at: Utc::now(),
            scheduler,
            cancelled: AtomicBool::new(false),
            cancel_reason: Mutex::new(CancelReason::NotCancelled),
            ds_module_cancelled: AtomicBool::new(false),
            skipped_ds_modules: Mutex::new(Vec::new()),
            has_file_modules: AtomicBool::new(false),
            has_artifact_modules: AtomicBool::new(false),
            has_result_modules: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn process_unallocated(&self) -> bool {
        self.process_unallocated
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel_reason(&self) -> CancelReason {
        *self.cancel_reason.lock().unwrap()
    }

    /// Sets the cancellation flag. Returns false if the job was already
    /// cancelled; the first reason wins.
    pub(crate) fn set_cancelled(&self, reason: CancelReason) -> bool {
        let mut guard = self.cancel_reason.lock().unwrap();
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        *guard = reason;
        self.cancelled.store(true, Ordering::Release);
        true
    }

    /// True while the currently running data source module has been asked to
    /// stop. Data source modules poll this from long loops.
    pub fn current_data_source_module_cancelled(&self) -> bool {
        self.ds_module_cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn request_data_source_module_cancel(&self) {
        self.ds_module_cancelled.store(true, Ordering::Release);
    }

    /// Consumes the per-module cancel flag after an adapter invocation and
    /// records the skipped module's name for the snapshot.
    pub(crate) fn consume_data_source_module_cancel(&self, module: &str) -> bool {
        if self.ds_module_cancelled.swap(false, Ordering::AcqRel) {
            self.skipped_ds_modules.lock().unwrap().push(module.to_string());
            return true;
        }
        false
    }

    pub fn skipped_data_source_modules(&self) -> Vec<String> {
        self.skipped_ds_modules.lock().unwrap().clone()
    }

    pub(crate) fn set_module_presence(&self, file: bool, artifact: bool, result: bool) {
        self.has_file_modules.store(file, Ordering::Release);
        self.has_artifact_modules.store(artifact, Ordering::Release);
        self.has_result_modules.store(result, Ordering::Release);
    }

    /// Injects files discovered mid-run (carved or derived content). They
    /// jump the batch queues so work derived from a prioritized item keeps
    /// its priority.
    pub fn add_derived_files(&self, files: Vec<FileMeta>) {
        if files.is_empty() || !self.has_file_modules.load(Ordering::Acquire) {
            return;
        }
        if let Some(ctx) = self.me.upgrade() {
            self.scheduler.fast_track_file_tasks(&ctx, files);
        }
    }

    /// Streams file ids into a running streaming-mode job.
    pub fn add_streamed_files(&self, ids: Vec<ItemId>) {
        if ids.is_empty() || !self.has_file_modules.load(Ordering::Acquire) {
            return;
        }
        if let Some(ctx) = self.me.upgrade() {
            self.scheduler.schedule_streamed_file_tasks(&ctx, ids);
        }
    }

    /// Queues a data artifact posted by a module for artifact analysis.
    /// Dropped when the job has no artifact modules.
    pub fn post_artifact(&self, artifact: ArtifactMeta) {
        if !self.has_artifact_modules.load(Ordering::Acquire) {
            debug!(job = %self.id, "dropping artifact, no artifact modules configured");
            return;
        }
        if let Some(ctx) = self.me.upgrade() {
            self.scheduler.schedule_artifact_tasks(&ctx, vec![artifact]);
        }
    }

    /// Queues an analysis result posted by a module for result analysis.
    pub fn post_result(&self, result: ResultMeta) {
        if !self.has_result_modules.load(Ordering::Acquire) {
            debug!(job = %self.id, "dropping result, no result modules configured");
            return;
        }
        if let Some(ctx) = self.me.upgrade() {
            self.scheduler.schedule_result_tasks(&ctx, vec![result]);
        }
    }
}

/// A job context doubles as a terminator: external work should stop when
/// the owning job is cancelled.
impl ProcessTerminator for JobContext {
    fn should_terminate(&self) -> bool {
        self.is_cancelled()
    }
}
