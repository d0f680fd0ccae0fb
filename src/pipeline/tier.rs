//! # Module Tiers
//!
//! A tier bundles the pipelines for one sequential stage of analysis. Tiers
//! run in order for the data source kind; file, artifact and result
//! pipelines are attached to the first tier only. Building is deterministic:
//! the same templates and settings always produce structurally identical
//! tiers.

use std::sync::Mutex;

use tracing::warn;

use crate::config::JobSettings;
use crate::job::JobContext;
use crate::module::{ErrorReport, ModuleKind, ModuleOrigin, ModuleTemplate};
use crate::pipeline::pool::PipelinePool;
use crate::pipeline::{
    ArtifactAdapter, ArtifactPipeline, DataSourceAdapter, DataSourcePipeline, FileAdapter,
    FilePipeline, Pipeline, PipelineAdapter, ResultAdapter, ResultPipeline,
};

pub struct ModuleTier {
    data_source_pipeline: Option<Mutex<DataSourcePipeline>>,
    file_pipelines: Option<PipelinePool>,
    artifact_pipeline: Option<Mutex<ArtifactPipeline>>,
    result_pipeline: Option<Mutex<ResultPipeline>>,
}

impl ModuleTier {
    pub fn has_data_source_pipeline(&self) -> bool {
        self.data_source_pipeline.is_some()
    }

    pub fn has_file_pipelines(&self) -> bool {
        self.file_pipelines.is_some()
    }

    pub fn has_artifact_pipeline(&self) -> bool {
        self.artifact_pipeline.is_some()
    }

    pub fn has_result_pipeline(&self) -> bool {
        self.result_pipeline.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !(self.has_data_source_pipeline()
            || self.has_file_pipelines()
            || self.has_artifact_pipeline()
            || self.has_result_pipeline())
    }

    pub fn data_source_pipeline(&self) -> Option<&Mutex<DataSourcePipeline>> {
        self.data_source_pipeline.as_ref()
    }

    pub fn file_pipelines(&self) -> Option<&PipelinePool> {
        self.file_pipelines.as_ref()
    }

    pub fn artifact_pipeline(&self) -> Option<&Mutex<ArtifactPipeline>> {
        self.artifact_pipeline.as_ref()
    }

    pub fn result_pipeline(&self) -> Option<&Mutex<ResultPipeline>> {
        self.result_pipeline.as_ref()
    }

    /// Starts every pipeline in the tier. Start up errors are collected, and
    /// a pipeline that failed to start is shut down again right away.
    pub fn start_up(&self, ctx: &JobContext) -> Vec<ErrorReport> {
        let mut errors = Vec::new();
        if let Some(pipeline) = &self.data_source_pipeline {
            errors.extend(start_up_pipeline(pipeline, ctx));
        }
        if let Some(pool) = &self.file_pipelines {
            errors.extend(pool.start_up_all(ctx));
        }
        if let Some(pipeline) = &self.artifact_pipeline {
            errors.extend(start_up_pipeline(pipeline, ctx));
        }
        if let Some(pipeline) = &self.result_pipeline {
            errors.extend(start_up_pipeline(pipeline, ctx));
        }
        errors
    }

    /// Shuts down every started pipeline in the tier. Safe to call more
    /// than once; shutdown hooks run exactly once.
    pub fn shut_down(&self) -> Vec<ErrorReport> {
        let mut errors = Vec::new();
        if let Some(pipeline) = &self.data_source_pipeline {
            errors.extend(pipeline.lock().unwrap().shut_down());
        }
        if let Some(pool) = &self.file_pipelines {
            errors.extend(pool.shut_down_all());
        }
        if let Some(pipeline) = &self.artifact_pipeline {
            errors.extend(pipeline.lock().unwrap().shut_down());
        }
        if let Some(pipeline) = &self.result_pipeline {
            errors.extend(pipeline.lock().unwrap().shut_down());
        }
        errors
    }
}

fn start_up_pipeline<A: PipelineAdapter>(
    pipeline: &Mutex<Pipeline<A>>,
    ctx: &JobContext,
) -> Vec<ErrorReport> {
    let mut guard = pipeline.lock().unwrap();
    let mut errors = guard.start_up(ctx);
    if !errors.is_empty() {
        errors.extend(guard.shut_down());
    }
    errors
}

/// Builds the ordered tier list from the plugin registry's templates.
///
/// Within each capability partition, templates named in the pipeline order
/// configuration come first, in that order; the rest follow with first-party
/// templates before third-party ones, preserving registration order within
/// each group. Data source modules named in the second pass list form a
/// second tier that runs after the first completes.
pub fn build_tiers(
    templates: &[ModuleTemplate],
    settings: &JobSettings,
    worker_count: usize,
) -> Vec<ModuleTier> {
    let enabled: Vec<&ModuleTemplate> = templates
        .iter()
        .filter(|t| t.enabled && !settings.disabled_modules.contains(&t.display_name()))
        .collect();

    let ds_templates = order_partition(
        partition(&enabled, ModuleKind::DataSource),
        &settings.pipeline_order,
    );
    let file_templates = order_partition(
        partition(&enabled, ModuleKind::File),
        &settings.pipeline_order,
    );
    let artifact_templates = order_partition(
        partition(&enabled, ModuleKind::DataArtifact),
        &settings.pipeline_order,
    );
    let result_templates = order_partition(
        partition(&enabled, ModuleKind::AnalysisResult),
        &settings.pipeline_order,
    );

    let (second_ds, first_ds): (Vec<_>, Vec<_>) = ds_templates.into_iter().partition(|t| {
        settings
            .second_pass_data_source_modules
            .contains(&t.display_name())
    });

    let mut tiers = Vec::new();
    let first = ModuleTier {
        data_source_pipeline: build_data_source_pipeline(&first_ds).map(Mutex::new),
        file_pipelines: build_file_pool(&file_templates, worker_count),
        artifact_pipeline: build_artifact_pipeline(&artifact_templates).map(Mutex::new),
        result_pipeline: build_result_pipeline(&result_templates).map(Mutex::new),
    };
    if !first.is_empty() {
        tiers.push(first);
    }
    if !second_ds.is_empty() {
        let second = ModuleTier {
            data_source_pipeline: build_data_source_pipeline(&second_ds).map(Mutex::new),
            file_pipelines: None,
            artifact_pipeline: None,
            result_pipeline: None,
        };
        if !second.is_empty() {
            tiers.push(second);
        }
    }
    tiers
}

fn partition<'a>(templates: &[&'a ModuleTemplate], kind: ModuleKind) -> Vec<&'a ModuleTemplate> {
    templates.iter().filter(|t| t.supports(kind)).copied().collect()
}

fn order_partition<'a>(
    templates: Vec<&'a ModuleTemplate>,
    pipeline_order: &[String],
) -> Vec<&'a ModuleTemplate> {
    let mut ordered = Vec::with_capacity(templates.len());
    for name in pipeline_order {
        for template in &templates {
            if template.display_name() == *name
                && !ordered
                    .iter()
                    .any(|t: &&ModuleTemplate| t.display_name() == *name)
            {
                ordered.push(*template);
            }
        }
    }
    let remaining: Vec<&ModuleTemplate> = templates
        .into_iter()
        .filter(|t| !pipeline_order.contains(&t.display_name()))
        .collect();
    ordered.extend(
        remaining
            .iter()
            .filter(|t| t.factory.origin() == ModuleOrigin::FirstParty)
            .copied(),
    );
    ordered.extend(
        remaining
            .iter()
            .filter(|t| t.factory.origin() == ModuleOrigin::ThirdParty)
            .copied(),
    );
    ordered
}

fn build_data_source_pipeline(templates: &[&ModuleTemplate]) -> Option<DataSourcePipeline> {
    let mut adapters = Vec::new();
    for template in templates {
        match template.factory.create_data_source_module(&template.settings) {
            Some(module) => adapters.push(DataSourceAdapter::new(template.display_name(), module)),
            None => warn!(
                module = %template.display_name(),
                "factory declined to create a data source module"
            ),
        }
    }
    (!adapters.is_empty()).then(|| Pipeline::new(adapters))
}

fn build_file_pipeline(templates: &[&ModuleTemplate]) -> Option<FilePipeline> {
    let mut adapters = Vec::new();
    for template in templates {
        match template.factory.create_file_module(&template.settings) {
            Some(module) => adapters.push(FileAdapter::new(template.display_name(), module)),
            None => warn!(
                module = %template.display_name(),
                "factory declined to create a file module"
            ),
        }
    }
    (!adapters.is_empty()).then(|| Pipeline::new(adapters))
}

/// One structurally identical pipeline copy per worker thread, each with
/// independent module instances.
fn build_file_pool(templates: &[&ModuleTemplate], worker_count: usize) -> Option<PipelinePool> {
    if templates.is_empty() {
        return None;
    }
    let copies: Vec<FilePipeline> = (0..worker_count.max(1))
        .filter_map(|_| build_file_pipeline(templates))
        .collect();
    (!copies.is_empty()).then(|| PipelinePool::new(copies))
}

fn build_artifact_pipeline(templates: &[&ModuleTemplate]) -> Option<ArtifactPipeline> {
    let mut adapters = Vec::new();
    for template in templates {
        match template.factory.create_artifact_module(&template.settings) {
            Some(module) => adapters.push(ArtifactAdapter::new(template.display_name(), module)),
            None => warn!(
                module = %template.display_name(),
                "factory declined to create an artifact module"
            ),
        }
    }
    (!adapters.is_empty()).then(|| Pipeline::new(adapters))
}

fn build_result_pipeline(templates: &[&ModuleTemplate]) -> Option<ResultPipeline> {
    let mut adapters = Vec::new();
    for template in templates {
        match template.factory.create_result_module(&template.settings) {
            Some(module) => adapters.push(ResultAdapter::new(template.display_name(), module)),
            None => warn!(
                module = %template.display_name(),
                "factory declined to create a result module"
            ),
        }
    }
    (!adapters.is_empty()).then(|| Pipeline::new(adapters))
}
