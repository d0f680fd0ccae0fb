//! # Run Report
//!
//! Writes the final job snapshot and every collected module error to a
//! JSONL or CSV file at the end of a CLI run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::datamodel::JobId;
use crate::job::{ErrorSummary, JobSnapshot};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportBackendKind {
    Jsonl,
    Csv,
}

impl ReportBackendKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReportBackendKind::Jsonl => "run_report.jsonl",
            ReportBackendKind::Csv => "run_report.csv",
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReportRow<'a> {
    Snapshot { data: &'a JobSnapshot },
    ModuleError { job_id: JobId, data: &'a ErrorSummary },
}

enum Backend {
    Jsonl(BufWriter<File>),
    Csv(Box<csv::Writer<File>>),
}

pub struct ReportWriter {
    backend: Backend,
}

impl ReportWriter {
    pub fn create(kind: ReportBackendKind, path: &Path) -> Result<Self, ReportError> {
        let file = File::create(path)?;
        let backend = match kind {
            ReportBackendKind::Jsonl => Backend::Jsonl(BufWriter::new(file)),
            ReportBackendKind::Csv => {
                let mut writer = csv::Writer::from_writer(file);
                writer.write_record([
                    "kind",
                    "job_id",
                    "data_source",
                    "state",
                    "processed_files",
                    "estimated_files",
                    "cancelled",
                    "cancel_reason",
                    "module",
                    "message",
                ])?;
                Backend::Csv(Box::new(writer))
            }
        };
        Ok(Self { backend })
    }

    pub fn record_snapshot(&mut self, snapshot: &JobSnapshot) -> Result<(), ReportError> {
        match &mut self.backend {
            Backend::Jsonl(writer) => {
                let row = ReportRow::Snapshot { data: snapshot };
                serde_json::to_writer(&mut *writer, &row)?;
                writer.write_all(b"\n")?;
            }
            Backend::Csv(writer) => {
                writer.write_record(&[
                    "snapshot".to_string(),
                    snapshot.job_id.to_string(),
                    snapshot.data_source.clone(),
                    snapshot.state.as_str().to_string(),
                    snapshot.processed_files.to_string(),
                    snapshot.estimated_files.to_string(),
                    snapshot.cancelled.to_string(),
                    snapshot.cancel_reason.as_str().to_string(),
                    String::new(),
                    String::new(),
                ])?;
            }
        }
        Ok(())
    }

    pub fn record_module_error(
        &mut self,
        job_id: JobId,
        error: &ErrorSummary,
    ) -> Result<(), ReportError> {
        match &mut self.backend {
            Backend::Jsonl(writer) => {
                let row = ReportRow::ModuleError {
                    job_id,
                    data: error,
                };
                serde_json::to_writer(&mut *writer, &row)?;
                writer.write_all(b"\n")?;
            }
            Backend::Csv(writer) => {
                writer.write_record(&[
                    "module_error".to_string(),
                    job_id.to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    error.module.clone(),
                    error.message.clone(),
                ])?;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<(), ReportError> {
        match self.backend {
            Backend::Jsonl(mut writer) => writer.flush()?,
            Backend::Csv(mut writer) => writer.flush()?,
        }
        Ok(())
    }
}
