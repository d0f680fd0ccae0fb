//! Walks the data source tree and logs item and byte totals. Polls both the
//! job cancellation flag and the per-module cancel request, as any long
//! running data source module should.

use tracing::info;

use crate::datamodel::DataSource;
use crate::job::JobContext;
use crate::module::{
    DataSourceModule, ModuleError, ModuleFactory, ModuleKind, ModuleOrigin, ModuleSettings,
    ProcessOutcome,
};

pub struct SourceSummarizerFactory;

impl ModuleFactory for SourceSummarizerFactory {
    fn display_name(&self) -> String {
        "Source Summarizer".to_string()
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
        Some(Box::new(SourceSummarizer))
    }
}

struct SourceSummarizer;

impl DataSourceModule for SourceSummarizer {
    fn process(
        &mut self,
        ctx: &JobContext,
        data_source: &DataSource,
    ) -> Result<ProcessOutcome, ModuleError> {
        let store = ctx.store();
        let mut files = 0u64;
        let mut directories = 0u64;
        let mut bytes = 0u64;
        let mut stack = store.top_level_items(data_source.id)?;
        while let Some(item) = stack.pop() {
            if ctx.is_cancelled() || ctx.current_data_source_module_cancelled() {
                return Ok(ProcessOutcome::Ok);
            }
            if item.is_dir() {
                directories += 1;
                stack.extend(store.children(item.id)?);
            } else {
                files += 1;
                bytes += item.size;
            }
        }
        info!(
            data_source = %data_source.name,
            files,
            directories,
            bytes,
            "data source summary"
        );
        Ok(ProcessOutcome::Ok)
    }
}
