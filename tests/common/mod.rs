//! Shared fixtures: an in-memory content store and a handful of
//! instrumented test modules.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use casepipe::datamodel::{
    ArtifactMeta, ContentError, ContentStore, DataSource, FileMeta, ItemId, ItemKind,
};
use casepipe::job::JobContext;
use casepipe::module::{
    ArtifactModule, DataSourceModule, FileModule, ModuleError, ModuleFactory, ModuleKind,
    ModuleOrigin, ModuleSettings, ProcessOutcome,
};

struct StubNode {
    meta: FileMeta,
    children: Vec<ItemId>,
    data: Vec<u8>,
}

struct StubInner {
    next_id: u64,
    nodes: HashMap<ItemId, StubNode>,
    roots: Vec<ItemId>,
    analyzed: HashSet<ItemId>,
}

/// In-memory tree store. Items added as roots show up in the top-level
/// enumeration; detached items exist only by id, like carved or derived
/// content.
pub struct StubStore {
    data_source: DataSource,
    inner: Mutex<StubInner>,
}

impl StubStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data_source: DataSource {
                id: ItemId(0),
                name: "stub-source".to_string(),
            },
            inner: Mutex::new(StubInner {
                next_id: 1,
                nodes: HashMap::new(),
                roots: Vec::new(),
                analyzed: HashSet::new(),
            }),
        })
    }

    pub fn data_source(&self) -> DataSource {
        self.data_source.clone()
    }

    fn add_node(&self, name: &str, kind: ItemKind, data: Vec<u8>, root: bool) -> FileMeta {
        let mut inner = self.inner.lock().unwrap();
        let id = ItemId(inner.next_id);
        inner.next_id += 1;
        let meta = FileMeta {
            id,
            name: name.to_string(),
            kind,
            size: data.len() as u64,
            has_children: kind == ItemKind::Directory,
        };
        inner.nodes.insert(id, StubNode {
            meta: meta.clone(),
            children: Vec::new(),
            data,
        });
        if root {
            inner.roots.push(id);
        }
        meta
    }

    pub fn add_root_file(&self, name: &str) -> FileMeta {
        self.add_node(name, ItemKind::File, b"data".to_vec(), true)
    }

    pub fn add_root_item(&self, name: &str, kind: ItemKind) -> FileMeta {
        self.add_node(name, kind, Vec::new(), true)
    }

    pub fn add_root_dir(&self, name: &str) -> FileMeta {
        self.add_node(name, ItemKind::Directory, Vec::new(), true)
    }

    pub fn add_child_file(&self, parent: ItemId, name: &str) -> FileMeta {
        let meta = self.add_node(name, ItemKind::File, b"data".to_vec(), false);
        self.inner
            .lock()
            .unwrap()
            .nodes
            .get_mut(&parent)
            .expect("parent")
            .children
            .push(meta.id);
        meta
    }

    pub fn add_child_dir(&self, parent: ItemId, name: &str) -> FileMeta {
        let meta = self.add_node(name, ItemKind::Directory, Vec::new(), false);
        self.inner
            .lock()
            .unwrap()
            .nodes
            .get_mut(&parent)
            .expect("parent")
            .children
            .push(meta.id);
        meta
    }

    /// An item reachable by id only, the way derived and streamed content
    /// exists before it is scheduled.
    pub fn add_detached_file(&self, name: &str) -> FileMeta {
        self.add_node(name, ItemKind::File, b"data".to_vec(), false)
    }

    pub fn analyzed_count(&self) -> usize {
        self.inner.lock().unwrap().analyzed.len()
    }
}

impl ContentStore for StubStore {
    fn item(&self, id: ItemId) -> Result<FileMeta, ContentError> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&id)
            .map(|n| n.meta.clone())
            .ok_or(ContentError::UnknownItem(id))
    }

    fn top_level_items(&self, data_source: ItemId) -> Result<Vec<FileMeta>, ContentError> {
        if data_source != self.data_source.id {
            return Err(ContentError::UnknownItem(data_source));
        }
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .roots
            .iter()
            .map(|id| inner.nodes[id].meta.clone())
            .collect())
    }

    fn children(&self, id: ItemId) -> Result<Vec<FileMeta>, ContentError> {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(&id).ok_or(ContentError::UnknownItem(id))?;
        Ok(node
            .children
            .iter()
            .map(|child| inner.nodes[child].meta.clone())
            .collect())
    }

    fn read_at(&self, id: ItemId, offset: u64, buf: &mut [u8]) -> Result<usize, ContentError> {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(&id).ok_or(ContentError::UnknownItem(id))?;
        let offset = offset as usize;
        if offset >= node.data.len() {
            return Ok(0);
        }
        let n = (node.data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&node.data[offset..offset + n]);
        Ok(n)
    }

    fn mark_analyzed(&self, id: ItemId) -> Result<(), ContentError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(&id) {
            return Err(ContentError::UnknownItem(id));
        }
        inner.analyzed.insert(id);
        Ok(())
    }
}

/// Shared sink for names observed by instrumented modules.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    pub fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// File module that records every processed file name, with an optional
/// artificial delay and an optional posted artifact per file.
pub struct RecordingFileFactory {
    pub name: String,
    pub origin: ModuleOrigin,
    pub recorder: Recorder,
    pub delay: Duration,
    pub post_artifact: bool,
}

impl RecordingFileFactory {
    pub fn new(name: &str, recorder: Recorder) -> Self {
        Self {
            name: name.to_string(),
            origin: ModuleOrigin::FirstParty,
            recorder,
            delay: Duration::ZERO,
            post_artifact: false,
        }
    }
}

impl ModuleFactory for RecordingFileFactory {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::File
    }

    fn create_file_module(&self, _settings: &ModuleSettings) -> Option<Box<dyn FileModule>> {
        Some(Box::new(RecordingFileModule {
            recorder: self.recorder.clone(),
            delay: self.delay,
            post_artifact: self.post_artifact,
        }))
    }
}

pub struct RecordingFileModule {
    pub recorder: Recorder,
    pub delay: Duration,
    pub post_artifact: bool,
}

impl FileModule for RecordingFileModule {
    fn process(&mut self, ctx: &JobContext, file: &FileMeta) -> Result<ProcessOutcome, ModuleError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.recorder.push(&file.name);
        if self.post_artifact {
            ctx.post_artifact(ArtifactMeta {
                id: file.id,
                type_name: "test-artifact".to_string(),
                source_item: file.id,
            });
        }
        Ok(ProcessOutcome::Ok)
    }
}

/// File module that always fails.
pub struct FailingFileFactory {
    pub name: String,
}

impl ModuleFactory for FailingFileFactory {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::File
    }

    fn create_file_module(&self, _settings: &ModuleSettings) -> Option<Box<dyn FileModule>> {
        Some(Box::new(FailingFileModule))
    }
}

pub struct FailingFileModule;

impl FileModule for FailingFileModule {
    fn process(&mut self, _ctx: &JobContext, _file: &FileMeta) -> Result<ProcessOutcome, ModuleError> {
        Err(ModuleError::Process("intentional failure".to_string()))
    }
}

/// File module that counts lifecycle hook invocations and can be told to
/// fail start up.
pub struct LifecycleFileFactory {
    pub name: String,
    pub startups: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub fail_start: bool,
}

impl LifecycleFileFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            startups: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            fail_start: false,
        }
    }
}

impl ModuleFactory for LifecycleFileFactory {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::File
    }

    fn create_file_module(&self, _settings: &ModuleSettings) -> Option<Box<dyn FileModule>> {
        Some(Box::new(LifecycleFileModule {
            startups: self.startups.clone(),
            shutdowns: self.shutdowns.clone(),
            fail_start: self.fail_start,
        }))
    }
}

pub struct LifecycleFileModule {
    pub startups: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub fail_start: bool,
}

impl FileModule for LifecycleFileModule {
    fn start_up(&mut self, _ctx: &JobContext) -> Result<(), ModuleError> {
        self.startups.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ModuleError::StartUp("intentional startup failure".to_string()));
        }
        Ok(())
    }

    fn process(&mut self, _ctx: &JobContext, _file: &FileMeta) -> Result<ProcessOutcome, ModuleError> {
        Ok(ProcessOutcome::Ok)
    }

    fn shut_down(&mut self) -> Result<(), ModuleError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Data source module that records its name when it runs and injects the
/// given derived files mid-process.
pub struct DerivingDataSourceFactory {
    pub name: String,
    pub recorder: Recorder,
    pub derived: Vec<FileMeta>,
}

impl ModuleFactory for DerivingDataSourceFactory {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn origin(&self) -> ModuleOrigin {
        ModuleOrigin::FirstParty
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::DataSource
    }

    fn create_data_source_module(
        &self,
        _settings: &ModuleSettings,
    ) -> Option<Box<dyn DataSourceModule>> {
        Some(Box::new(DerivingDataSourceModule {
            name: self.name.clone(),
            recorder: self.recorder.clone(),
            derived: self.derived.clone(),
        }))
    }
}

pub struct DerivingDataSourceModule {
    pub name: String,
    pub recorder: Recorder,
    pub derived: Vec<FileMeta>,
}

impl DataSourceModule for DerivingDataSourceModule {
    fn process(
        &mut self,
        ctx: &JobContext,
        _data_source: &DataSource,
    ) -> Result<ProcessOutcome, ModuleError> {
        self.recorder.push(&self.name);
        ctx.add_derived_files(self.derived.clone());
        Ok(ProcessOutcome::Ok)
    }
}

/// Artifact module recording artifact type names.
pub struct RecordingArtifactFactory {
    pub name: String,
    pub recorder: Recorder,
}

impl ModuleFactory for RecordingArtifactFactory {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::DataArtifact
    }

    fn create_artifact_module(
        &self,
        _settings: &ModuleSettings,
    ) -> Option<Box<dyn ArtifactModule>> {
        Some(Box::new(RecordingArtifactModule {
            recorder: self.recorder.clone(),
        }))
    }
}

pub struct RecordingArtifactModule {
    pub recorder: Recorder,
}

impl ArtifactModule for RecordingArtifactModule {
    fn process(&mut self, _ctx: &JobContext, artifact: &ArtifactMeta) -> Result<(), ModuleError> {
        self.recorder.push(&artifact.type_name);
        Ok(())
    }
}

/// No-op file module factory with a configurable origin, for ordering tests.
pub struct NoopFileFactory {
    pub name: String,
    pub origin: ModuleOrigin,
}

impl ModuleFactory for NoopFileFactory {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::File
    }

    fn create_file_module(&self, _settings: &ModuleSettings) -> Option<Box<dyn FileModule>> {
        Some(Box::new(NoopFileModule))
    }
}

pub struct NoopFileModule;

impl FileModule for NoopFileModule {
    fn process(&mut self, _ctx: &JobContext, _file: &FileMeta) -> Result<ProcessOutcome, ModuleError> {
        Ok(ProcessOutcome::Ok)
    }
}

/// No-op data source module factory, for tier tests.
pub struct NoopDataSourceFactory {
    pub name: String,
    pub origin: ModuleOrigin,
}

impl ModuleFactory for NoopDataSourceFactory {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::DataSource
    }

    fn create_data_source_module(
        &self,
        _settings: &ModuleSettings,
    ) -> Option<Box<dyn DataSourceModule>> {
        Some(Box::new(NoopDataSourceModule))
    }
}

pub struct NoopDataSourceModule;

impl DataSourceModule for NoopDataSourceModule {
    fn process(
        &mut self,
        _ctx: &JobContext,
        _data_source: &DataSource,
    ) -> Result<ProcessOutcome, ModuleError> {
        Ok(ProcessOutcome::Ok)
    }
}
