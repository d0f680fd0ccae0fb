//! # Pipeline Execution Engine
//!
//! An ordered chain of module adapters of one kind, executed over one work
//! item. Failures are firewalled: a failing adapter is recorded and the
//! remaining adapters still run, both at start up and per item. The engine
//! never raises a module-caused failure across its own boundary.

pub mod pool;
pub mod tier;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use tracing::{debug, info};

use crate::datamodel::{ArtifactMeta, DataSource, FileMeta, ResultMeta};
use crate::job::JobContext;
use crate::module::{
    ArtifactModule, DataSourceModule, ErrorReport, FileModule, ModuleError, ProcessOutcome,
    ResultModule,
};

/// Uniform adapter contract the generic pipeline drives. Kind-specific
/// behavior (result-code mapping, per-module cancellation) lives in the
/// adapter implementations.
pub trait PipelineAdapter: Send {
    type Item;

    fn display_name(&self) -> &str;

    fn start_up(&mut self, ctx: &JobContext) -> Result<(), ModuleError>;

    fn process(&mut self, ctx: &JobContext, item: &Self::Item) -> Result<(), ModuleError>;

    fn shut_down(&mut self) -> Result<(), ModuleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    New,
    Started,
    ShutDown,
}

/// An ordered sequence of adapters of one kind. Adapter order is fixed at
/// construction. Two pipelines built from the same template are structurally
/// identical but carry independent module state.
pub struct Pipeline<A: PipelineAdapter> {
    adapters: Vec<A>,
    state: PipelineState,
}

impl<A: PipelineAdapter> Pipeline<A> {
    pub fn new(adapters: Vec<A>) -> Self {
        Self {
            adapters,
            state: PipelineState::New,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.display_name().to_string()).collect()
    }

    /// Starts every adapter in order. A failing adapter does not prevent the
    /// later ones from getting their chance to initialize.
    pub fn start_up(&mut self, ctx: &JobContext) -> Vec<ErrorReport> {
        if self.state != PipelineState::New {
            return Vec::new();
        }
        self.state = PipelineState::Started;
        let mut errors = Vec::new();
        for adapter in &mut self.adapters {
            let name = adapter.display_name().to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| adapter.start_up(ctx)));
            record_failure(&mut errors, &name, outcome);
        }
        errors
    }

    /// Runs every adapter over one item, in order. Cancellation is observed
    /// between adapters; an adapter already running is never interrupted.
    pub fn run(&mut self, ctx: &JobContext, item: &A::Item) -> Vec<ErrorReport> {
        let mut errors = Vec::new();
        if self.state != PipelineState::Started {
            return errors;
        }
        for adapter in &mut self.adapters {
            if ctx.is_cancelled() {
                break;
            }
            let name = adapter.display_name().to_string();
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| adapter.process(ctx, item)));
            debug!(
                module = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "adapter finished"
            );
            record_failure(&mut errors, &name, outcome);
        }
        errors
    }

    /// Shuts every adapter down exactly once. A no-op unless `start_up` was
    /// attempted, so a pipeline that was never started invokes no hooks.
    pub fn shut_down(&mut self) -> Vec<ErrorReport> {
        if self.state != PipelineState::Started {
            return Vec::new();
        }
        self.state = PipelineState::ShutDown;
        let mut errors = Vec::new();
        for adapter in &mut self.adapters {
            let name = adapter.display_name().to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| adapter.shut_down()));
            record_failure(&mut errors, &name, outcome);
        }
        errors
    }
}

fn record_failure(
    errors: &mut Vec<ErrorReport>,
    module: &str,
    outcome: Result<Result<(), ModuleError>, Box<dyn Any + Send>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => errors.push(ErrorReport::new(module, err)),
        Err(payload) => errors.push(ErrorReport::new(
            module,
            ModuleError::Panic(panic_message(payload)),
        )),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

pub struct DataSourceAdapter {
    name: String,
    module: Box<dyn DataSourceModule>,
}

impl DataSourceAdapter {
    pub fn new(name: String, module: Box<dyn DataSourceModule>) -> Self {
        Self { name, module }
    }
}

impl PipelineAdapter for DataSourceAdapter {
    type Item = DataSource;

    fn display_name(&self) -> &str {
        &self.name
    }

    fn start_up(&mut self, ctx: &JobContext) -> Result<(), ModuleError> {
        self.module.start_up(ctx)
    }

    fn process(&mut self, ctx: &JobContext, item: &DataSource) -> Result<(), ModuleError> {
        let result = self.module.process(ctx, item);
        if ctx.consume_data_source_module_cancel(&self.name) {
            // An individually skipped module is recorded state, not a failure.
            info!(module = %self.name, job = %ctx.id(), "data source module skipped");
            return Ok(());
        }
        match result? {
            ProcessOutcome::Ok => Ok(()),
            ProcessOutcome::Error => Err(ModuleError::Process(format!(
                "{} reported an error result",
                self.name
            ))),
        }
    }

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        self.module.shut_down()
    }
}

pub struct FileAdapter {
    name: String,
    module: Box<dyn FileModule>,
}

impl FileAdapter {
    pub fn new(name: String, module: Box<dyn FileModule>) -> Self {
        Self { name, module }
    }
}

impl PipelineAdapter for FileAdapter {
    type Item = FileMeta;

    fn display_name(&self) -> &str {
        &self.name
    }

    fn start_up(&mut self, ctx: &JobContext) -> Result<(), ModuleError> {
        self.module.start_up(ctx)
    }

    fn process(&mut self, ctx: &JobContext, item: &FileMeta) -> Result<(), ModuleError> {
        match self.module.process(ctx, item)? {
            ProcessOutcome::Ok => Ok(()),
            ProcessOutcome::Error => Err(ModuleError::Process(format!(
                "{} reported an error result for {}",
                self.name, item.name
            ))),
        }
    }

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        self.module.shut_down()
    }
}

pub struct ArtifactAdapter {
    name: String,
    module: Box<dyn ArtifactModule>,
}

impl ArtifactAdapter {
    pub fn new(name: String, module: Box<dyn ArtifactModule>) -> Self {
        Self { name, module }
    }
}

impl PipelineAdapter for ArtifactAdapter {
    type Item = ArtifactMeta;

    fn display_name(&self) -> &str {
        &self.name
    }

    fn start_up(&mut self, ctx: &JobContext) -> Result<(), ModuleError> {
        self.module.start_up(ctx)
    }

    fn process(&mut self, ctx: &JobContext, item: &ArtifactMeta) -> Result<(), ModuleError> {
        self.module.process(ctx, item)
    }

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        self.module.shut_down()
    }
}

pub struct ResultAdapter {
    name: String,
    module: Box<dyn ResultModule>,
}

impl ResultAdapter {
    pub fn new(name: String, module: Box<dyn ResultModule>) -> Self {
        Self { name, module }
    }
}

impl PipelineAdapter for ResultAdapter {
    type Item = ResultMeta;

    fn display_name(&self) -> &str {
        &self.name
    }

    fn start_up(&mut self, ctx: &JobContext) -> Result<(), ModuleError> {
        self.module.start_up(ctx)
    }

    fn process(&mut self, ctx: &JobContext, item: &ResultMeta) -> Result<(), ModuleError> {
        self.module.process(ctx, item)
    }

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        self.module.shut_down()
    }
}

pub type DataSourcePipeline = Pipeline<DataSourceAdapter>;
pub type FilePipeline = Pipeline<FileAdapter>;
pub type ArtifactPipeline = Pipeline<ArtifactAdapter>;
pub type ResultPipeline = Pipeline<ResultAdapter>;
