//! Work item types handed to the worker threads. A task pairs one unit of
//! work with the context of the job that owns it; the worker id is stamped
//! at dequeue time.

use std::sync::Arc;

use crate::datamodel::{ArtifactMeta, FileMeta, ItemId, JobId, ResultMeta};
use crate::job::JobContext;

/// Identity of one worker thread within the runtime's fixed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

/// Identity of one scheduled task, unique for the scheduler's lifetime and
/// monotonically increasing, which doubles as the enqueue age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCategory {
    DataSource,
    File,
    DataArtifact,
    AnalysisResult,
}

pub struct DataSourceTask {
    pub(crate) id: TaskId,
    pub(crate) ctx: Arc<JobContext>,
    pub(crate) worker: Option<WorkerId>,
}

pub struct FileTask {
    pub(crate) id: TaskId,
    pub(crate) ctx: Arc<JobContext>,
    pub(crate) file: FileMeta,
    pub(crate) worker: Option<WorkerId>,
}

pub struct ArtifactTask {
    pub(crate) id: TaskId,
    pub(crate) ctx: Arc<JobContext>,
    pub(crate) artifact: ArtifactMeta,
    pub(crate) worker: Option<WorkerId>,
}

pub struct ResultTask {
    pub(crate) id: TaskId,
    pub(crate) ctx: Arc<JobContext>,
    pub(crate) result: ResultMeta,
    pub(crate) worker: Option<WorkerId>,
}

/// A streamed file reference. The file record is resolved lazily when the
/// task moves to the worker feed, so streaming producers never block on
/// store lookups.
pub(crate) struct StreamedFileTask {
    pub(crate) id: TaskId,
    pub(crate) ctx: Arc<JobContext>,
    pub(crate) item: ItemId,
}

macro_rules! task_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn task_id(&self) -> TaskId {
                self.id
            }

            pub fn job_id(&self) -> JobId {
                self.ctx.id()
            }

            pub fn ctx(&self) -> &Arc<JobContext> {
                &self.ctx
            }

            /// Worker thread assigned at dequeue time.
            pub fn worker(&self) -> Option<WorkerId> {
                self.worker
            }
        }
    };
}

task_accessors!(DataSourceTask);
task_accessors!(FileTask);
task_accessors!(ArtifactTask);
task_accessors!(ResultTask);

impl FileTask {
    pub fn file(&self) -> &FileMeta {
        &self.file
    }
}

impl ArtifactTask {
    pub fn artifact(&self) -> &ArtifactMeta {
        &self.artifact
    }
}

impl ResultTask {
    pub fn result(&self) -> &ResultMeta {
        &self.result
    }
}
