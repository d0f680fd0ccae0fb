mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use casepipe::datamodel::{FileMeta, JobId};
use casepipe::job::JobContext;
use casepipe::module::{FileModule, ModuleError, ModuleFactory, ModuleSettings, ProcessOutcome};
use casepipe::pipeline::{FileAdapter, Pipeline};
use casepipe::scheduler::TaskScheduler;

use common::{FailingFileFactory, LifecycleFileFactory, Recorder, RecordingFileFactory, StubStore};

fn job_ctx(store: Arc<StubStore>) -> Arc<JobContext> {
    let data_source = store.data_source();
    let scheduler = Arc::new(TaskScheduler::new(1));
    JobContext::new(JobId(1), data_source, store, true, scheduler)
}

fn adapter_for(factory: &dyn ModuleFactory) -> FileAdapter {
    FileAdapter::new(
        factory.display_name(),
        factory
            .create_file_module(&ModuleSettings::Null)
            .expect("module"),
    )
}

#[test]
fn failing_adapter_does_not_stop_later_adapters() {
    let store = StubStore::new();
    let file = store.add_root_file("report.doc");
    let ctx = job_ctx(store);

    let recorder = Recorder::new();
    let failing = FailingFileFactory {
        name: "Broken".to_string(),
    };
    let recording = RecordingFileFactory::new("Witness", recorder.clone());

    let mut pipeline = Pipeline::new(vec![adapter_for(&failing), adapter_for(&recording)]);
    assert!(pipeline.start_up(&ctx).is_empty());

    let errors = pipeline.run(&ctx, &file);
    assert_eq!(errors.len(), 1, "exactly one error entry for the failing adapter");
    assert_eq!(errors[0].module, "Broken");
    assert_eq!(recorder.names(), vec!["report.doc"], "later adapter still ran");

    assert!(pipeline.shut_down().is_empty());
}

#[test]
fn panicking_adapter_is_firewalled() {
    struct PanickingModule;
    impl FileModule for PanickingModule {
        fn process(
            &mut self,
            _ctx: &JobContext,
            _file: &FileMeta,
        ) -> Result<ProcessOutcome, ModuleError> {
            panic!("module blew up");
        }
    }

    let store = StubStore::new();
    let file = store.add_root_file("image.jpg");
    let ctx = job_ctx(store);

    let recorder = Recorder::new();
    let recording = RecordingFileFactory::new("Witness", recorder.clone());
    let mut pipeline = Pipeline::new(vec![
        FileAdapter::new("Panicker".to_string(), Box::new(PanickingModule)),
        adapter_for(&recording),
    ]);
    pipeline.start_up(&ctx);

    let errors = pipeline.run(&ctx, &file);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].module, "Panicker");
    assert_eq!(recorder.len(), 1, "panic did not block the sibling module");
}

#[test]
fn startup_failure_does_not_stop_sibling_startup() {
    let store = StubStore::new();
    let ctx = job_ctx(store);

    let mut failing = LifecycleFileFactory::new("FailsToStart");
    failing.fail_start = true;
    let healthy = LifecycleFileFactory::new("Healthy");

    let mut pipeline = Pipeline::new(vec![adapter_for(&failing), adapter_for(&healthy)]);
    let errors = pipeline.start_up(&ctx);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].module, "FailsToStart");
    assert_eq!(healthy.startups.load(Ordering::SeqCst), 1);

    // Shutdown hooks run for every adapter because start up was attempted.
    pipeline.shut_down();
    assert_eq!(failing.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn shut_down_without_start_up_invokes_no_hooks() {
    let factory = LifecycleFileFactory::new("Idle");
    let mut pipeline = Pipeline::new(vec![adapter_for(&factory)]);

    let errors = pipeline.shut_down();
    assert!(errors.is_empty());
    assert_eq!(factory.startups.load(Ordering::SeqCst), 0);
    assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 0);
}

#[test]
fn shut_down_runs_hooks_exactly_once() {
    let store = StubStore::new();
    let ctx = job_ctx(store);
    let factory = LifecycleFileFactory::new("Once");
    let mut pipeline = Pipeline::new(vec![adapter_for(&factory)]);

    pipeline.start_up(&ctx);
    pipeline.shut_down();
    pipeline.shut_down();
    assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 1);
}
