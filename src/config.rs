use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Process-wide runtime settings, fixed at start.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of file worker threads; 0 selects one per logical CPU.
    pub worker_threads: usize,
    pub progress_interval_secs: u64,
    pub max_memory_mib: Option<u64>,
    pub max_open_files: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            progress_interval_secs: 5,
            max_memory_mib: None,
            max_open_files: None,
        }
    }
}

impl RuntimeConfig {
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }
}

/// Per-job settings applied when a data source is submitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub process_unallocated: bool,
    /// Streaming mode: file ids arrive while the data source is still being
    /// committed by its producer.
    pub streaming: bool,
    /// Module display names, highest priority first. Partitions are ordered
    /// with these modules before any others.
    pub pipeline_order: Vec<String>,
    /// Data source modules deferred to a second sequential pass.
    pub second_pass_data_source_modules: Vec<String>,
    pub disabled_modules: Vec<String>,
    /// Opaque per-module settings, keyed by display name.
    pub module_settings: HashMap<String, serde_json::Value>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            process_unallocated: true,
            streaming: false,
            pipeline_order: Vec::new(),
            second_pass_data_source_modules: Vec::new(),
            disabled_modules: Vec::new(),
            module_settings: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub job: JobSettings,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let config: Config = serde_yaml::from_slice(&bytes)?;
    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
