//! # Bundled Modules
//!
//! Two first-party reference modules so a default build analyzes something
//! end to end. Real deployments register third-party factories through the
//! [`crate::module::ModuleRegistry`].

pub mod hash;
pub mod summary;

use std::collections::HashMap;
use std::sync::Arc;

use crate::module::{ModuleSettings, ModuleTemplate};

pub use hash::FileHasherFactory;
pub use summary::SourceSummarizerFactory;

/// Templates for the bundled modules, with per-module settings looked up by
/// display name.
pub fn builtin_templates(
    module_settings: &HashMap<String, serde_json::Value>,
) -> Vec<ModuleTemplate> {
    let factories: Vec<Arc<dyn crate::module::ModuleFactory>> = vec![
        Arc::new(SourceSummarizerFactory),
        Arc::new(FileHasherFactory),
    ];
    factories
        .into_iter()
        .map(|factory| {
            let settings = module_settings
                .get(&factory.display_name())
                .cloned()
                .unwrap_or(ModuleSettings::Null);
            ModuleTemplate::new(factory).with_settings(settings)
        })
        .collect()
}
