//! # Module Contract
//!
//! The uniform interface analysis modules implement, one trait per item
//! kind, plus the factory/template/registry surface the plugin loader hands
//! to the tier builder. The runtime never inspects module internals; it only
//! drives `start_up` / `process` / `shut_down` and records failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::datamodel::{ArtifactMeta, ContentError, DataSource, FileMeta, ResultMeta};
use crate::job::JobContext;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("start up failed: {0}")]
    StartUp(String),
    #[error("processing failed: {0}")]
    Process(String),
    #[error("shut down failed: {0}")]
    ShutDown(String),
    #[error("module panicked: {0}")]
    Panic(String),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One collected failure, tagged with the failing module's display name.
#[derive(Debug)]
pub struct ErrorReport {
    pub module: String,
    pub error: ModuleError,
}

impl ErrorReport {
    pub fn new(module: impl Into<String>, error: ModuleError) -> Self {
        Self {
            module: module.into(),
            error,
        }
    }
}

/// Explicit result code returned by file and data source modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    DataSource,
    File,
    DataArtifact,
    AnalysisResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    FirstParty,
    ThirdParty,
}

/// Opaque per-job settings value handed to a factory when it constructs a
/// module instance.
pub type ModuleSettings = serde_json::Value;

pub trait DataSourceModule: Send {
    fn start_up(&mut self, _ctx: &JobContext) -> Result<(), ModuleError> {
        Ok(())
    }

    fn process(
        &mut self,
        ctx: &JobContext,
        data_source: &DataSource,
    ) -> Result<ProcessOutcome, ModuleError>;

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

pub trait FileModule: Send {
    fn start_up(&mut self, _ctx: &JobContext) -> Result<(), ModuleError> {
        Ok(())
    }

    fn process(&mut self, ctx: &JobContext, file: &FileMeta) -> Result<ProcessOutcome, ModuleError>;

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

pub trait ArtifactModule: Send {
    fn start_up(&mut self, _ctx: &JobContext) -> Result<(), ModuleError> {
        Ok(())
    }

    fn process(&mut self, ctx: &JobContext, artifact: &ArtifactMeta) -> Result<(), ModuleError>;

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

pub trait ResultModule: Send {
    fn start_up(&mut self, _ctx: &JobContext) -> Result<(), ModuleError> {
        Ok(())
    }

    fn process(&mut self, ctx: &JobContext, result: &ResultMeta) -> Result<(), ModuleError>;

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Constructs module instances. One factory may serve several kinds; the
/// tier builder partitions templates by `supports`.
pub trait ModuleFactory: Send + Sync {
    fn display_name(&self) -> String;

    fn origin(&self) -> ModuleOrigin {
        ModuleOrigin::ThirdParty
    }

    fn supports(&self, kind: ModuleKind) -> bool;

    fn create_data_source_module(
        &self,
        _settings: &ModuleSettings,
    ) -> Option<Box<dyn DataSourceModule>> {
        None
    }

    fn create_file_module(&self, _settings: &ModuleSettings) -> Option<Box<dyn FileModule>> {
        None
    }

    fn create_artifact_module(
        &self,
        _settings: &ModuleSettings,
    ) -> Option<Box<dyn ArtifactModule>> {
        None
    }

    fn create_result_module(&self, _settings: &ModuleSettings) -> Option<Box<dyn ResultModule>> {
        None
    }
}

/// A factory plus the per-job settings and enabled flag supplied by the
/// plugin registry. The runtime treats the template list as opaque input.
#[derive(Clone)]
pub struct ModuleTemplate {
    pub factory: Arc<dyn ModuleFactory>,
    pub settings: ModuleSettings,
    pub enabled: bool,
}

impl ModuleTemplate {
    pub fn new(factory: Arc<dyn ModuleFactory>) -> Self {
        Self {
            factory,
            settings: ModuleSettings::Null,
            enabled: true,
        }
    }

    pub fn with_settings(mut self, settings: ModuleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn display_name(&self) -> String {
        self.factory.display_name()
    }

    pub fn supports(&self, kind: ModuleKind) -> bool {
        self.factory.supports(kind)
    }
}

/// Ordered module templates as supplied by the plugin loader.
#[derive(Default)]
pub struct ModuleRegistry {
    templates: Vec<ModuleTemplate>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: ModuleTemplate) {
        self.templates.push(template);
    }

    /// Enabled templates in registration order.
    pub fn ordered_templates(&self) -> Vec<ModuleTemplate> {
        self.templates.iter().filter(|t| t.enabled).cloned().collect()
    }
}

/// Optional collaborator a module may consult to bound the run time of
/// external work it spawns. The runtime never interrupts a module; modules
/// poll a terminator (or the job context) at their own cadence.
pub trait ProcessTerminator: Send + Sync {
    fn should_terminate(&self) -> bool;
}

pub struct TimedTerminator {
    deadline: Instant,
}

impl TimedTerminator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }
}

impl ProcessTerminator for TimedTerminator {
    fn should_terminate(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
