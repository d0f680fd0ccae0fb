//! # Pipeline Pool
//!
//! A fixed-size set of structurally identical file pipelines shared by the
//! file worker threads. A checkout grants one thread exclusive use of one
//! pipeline instance; the lease returns it on drop, so every checkout is
//! matched by exactly one check-in even on error paths.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

use crate::job::JobContext;
use crate::module::ErrorReport;
use crate::pipeline::FilePipeline;
use crate::scheduler::WorkerId;

struct PoolInner {
    idle: Vec<FilePipeline>,
    leased: HashSet<WorkerId>,
}

pub struct PipelinePool {
    capacity: usize,
    inner: Mutex<PoolInner>,
    available: Condvar,
}

impl PipelinePool {
    /// The pool size is fixed at construction and never changes.
    pub fn new(pipelines: Vec<FilePipeline>) -> Self {
        Self {
            capacity: pipelines.len(),
            inner: Mutex::new(PoolInner {
                idle: pipelines,
                leased: HashSet::new(),
            }),
            available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().leased.len()
    }

    /// First module names of one pipeline copy; all copies are identical.
    pub fn module_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .idle
            .first()
            .map(|p| p.module_names())
            .unwrap_or_default()
    }

    /// Blocks until a pipeline copy is free and leases it to the worker.
    /// Bounds in-flight file processing to the pool size.
    pub fn checkout(&self, worker: WorkerId) -> PipelineLease<'_> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(pipeline) = inner.idle.pop() {
                if !inner.leased.insert(worker) {
                    panic!("worker {worker:?} checked out a second pipeline");
                }
                return PipelineLease {
                    pool: self,
                    pipeline: Some(pipeline),
                    worker,
                };
            }
            inner = self.available.wait(inner).unwrap();
        }
    }

    fn check_in(&self, worker: WorkerId, pipeline: FilePipeline) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.leased.remove(&worker) {
            panic!("pipeline checked in twice for worker {worker:?}");
        }
        inner.idle.push(pipeline);
        self.available.notify_one();
    }

    /// Starts every pipeline copy. If one copy fails to start, the remaining
    /// copies are not started: they are built from the same template and
    /// would fail the same way. The failed copy is shut down again.
    pub fn start_up_all(&self, ctx: &JobContext) -> Vec<ErrorReport> {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.leased.is_empty(), "start up with leased pipelines");
        let mut errors = Vec::new();
        for pipeline in inner.idle.iter_mut() {
            let copy_errors = pipeline.start_up(ctx);
            if !copy_errors.is_empty() {
                errors.extend(copy_errors);
                errors.extend(pipeline.shut_down());
                break;
            }
        }
        errors
    }

    /// Shuts down every copy that was started. Idle-only by contract: all
    /// leases must have been returned before tier shutdown.
    pub fn shut_down_all(&self) -> Vec<ErrorReport> {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.leased.is_empty(), "shut down with leased pipelines");
        let mut errors = Vec::new();
        for pipeline in inner.idle.iter_mut() {
            errors.extend(pipeline.shut_down());
        }
        errors
    }
}

/// Exclusive use of one pooled pipeline. Checked back in on drop.
pub struct PipelineLease<'a> {
    pool: &'a PipelinePool,
    pipeline: Option<FilePipeline>,
    worker: WorkerId,
}

impl Deref for PipelineLease<'_> {
    type Target = FilePipeline;

    fn deref(&self) -> &FilePipeline {
        self.pipeline.as_ref().expect("lease already returned")
    }
}

impl DerefMut for PipelineLease<'_> {
    fn deref_mut(&mut self) -> &mut FilePipeline {
        self.pipeline.as_mut().expect("lease already returned")
    }
}

impl Drop for PipelineLease<'_> {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            self.pool.check_in(self.worker, pipeline);
        }
    }
}
