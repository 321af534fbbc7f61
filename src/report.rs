use crate::job::DeclaredFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failure taxonomy for a job. Attempt-local failures (timeout,
/// crash, no output) only appear here once every fallback path is exhausted.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum FailureKind {
    #[error("download failed: {0}")]
    Download(String),
    #[error("conversion timed out")]
    ConversionTimeout,
    #[error("conversion backend crashed: {0}")]
    ConversionCrashed(String),
    #[error("backend produced no output")]
    NoOutputProduced,
    #[error("source could not be repaired")]
    RepairUnavailable,
    #[error("rasterization failed: {0}")]
    Raster(String),
    #[error("upload failed: {0}")]
    Upload(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    Done,
    /// Declared type we do not handle; trivial success, no images expected.
    Skipped,
    Failed(FailureKind),
}

impl JobStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    pub backend: String,
    /// "reduced", "original" or "repaired".
    pub artifact: String,
    pub outcome: String,
    pub timeout_seconds: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub doc_id: u64,
    pub format: DeclaredFormat,
    pub source_bytes: u64,
    pub source_sha256: String,
    pub attempts: Vec<AttemptReport>,
    pub dropped_members: Vec<String>,
    pub images: usize,
    pub page_count: u32,
    pub status: JobStatus,
    pub started: String,
    pub finished: String,
}
