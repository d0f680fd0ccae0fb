use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use casepipe::{
    cli,
    config,
    datamodel::DirStore,
    events::JobEvent,
    job::CancelReason,
    logging,
    module::ModuleRegistry,
    modules,
    report::{ReportBackendKind, ReportWriter},
    runtime::AnalysisRuntime,
    util,
};

fn main() -> Result<()> {
    logging::init_logging();

    let opts = cli::parse();
    let loaded = config::load_config(opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(workers) = opts.workers {
        cfg.runtime.worker_threads = workers;
    }
    if let Some(interval) = opts.progress_interval_secs {
        cfg.runtime.progress_interval_secs = interval;
    }
    if let Some(disabled) = &opts.disable {
        cfg.job.disabled_modules.extend(disabled.iter().cloned());
    }
    if opts.skip_unallocated {
        cfg.job.process_unallocated = false;
    }

    util::apply_resource_limits(cfg.runtime.max_memory_mib, cfg.runtime.max_open_files)?;
    util::ensure_output_dir(&opts.output)?;

    let store = Arc::new(DirStore::open(&opts.input)?);
    let data_source = store.data_source();

    info!(
        "starting analysis of {} workers={} config_hash={}",
        opts.input.display(),
        cfg.runtime.effective_worker_threads(),
        &loaded.config_hash[..12]
    );

    let mut registry = ModuleRegistry::new();
    for template in modules::builtin_templates(&cfg.job.module_settings) {
        registry.register(template);
    }

    let runtime = AnalysisRuntime::new(&cfg.runtime);

    let events = runtime.subscribe();
    std::thread::spawn(move || {
        for event in events {
            match event {
                JobEvent::Started { job_id, data_source } => {
                    info!(job = %job_id, data_source = %data_source, "job started");
                }
                JobEvent::Completed { job_id } => info!(job = %job_id, "job completed"),
                JobEvent::Cancelled { job_id, reason } => {
                    warn!(job = %job_id, reason = reason.as_str(), "job cancelled");
                }
                JobEvent::ModuleError { job_id, module, message } => {
                    warn!(job = %job_id, module = %module, "module error: {message}");
                }
            }
        }
    });

    let (executor, startup_errors) = runtime.start_job(
        store.clone(),
        data_source,
        registry.ordered_templates(),
        &cfg.job,
    );
    if !startup_errors.is_empty() {
        warn!(
            "{} modules failed to start; analysis continues degraded",
            startup_errors.len()
        );
    }

    {
        let executor = Arc::clone(&executor);
        ctrlc::set_handler(move || {
            executor.cancel(CancelReason::UserRequested);
        })?;
    }

    let interval = Duration::from_secs(cfg.runtime.progress_interval_secs.max(1));
    while !executor.wait_until_complete(interval) {
        let snapshot = executor.snapshot();
        info!(
            processed = snapshot.processed_files,
            estimated = snapshot.estimated_files,
            queued = snapshot.queues.total_queued(),
            in_progress = snapshot.queues.in_progress,
            tier = snapshot.current_tier,
            "progress"
        );
    }

    let snapshot = executor.snapshot();
    let kind = match opts.report_format {
        cli::ReportFormat::Jsonl => ReportBackendKind::Jsonl,
        cli::ReportFormat::Csv => ReportBackendKind::Csv,
    };
    let report_path = opts.output.join(kind.file_name());
    let mut writer = ReportWriter::create(kind, &report_path)?;
    writer.record_snapshot(&snapshot)?;
    for error in executor.module_errors() {
        writer.record_module_error(snapshot.job_id, &error)?;
    }
    writer.finish()?;
    info!("run report written to {}", report_path.display());

    runtime.shutdown();

    info!(
        "analysis finished: {} files processed, {} module errors{}",
        snapshot.processed_files,
        snapshot.module_error_count,
        if snapshot.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}
