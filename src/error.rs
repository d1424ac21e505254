use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// How far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the whole run.
    Fatal,
    /// Aborts the owning sample; the project loop continues.
    SampleFailure,
    /// Logged and ignored by the caller.
    PartialFailure,
}

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("invalid remote file location: {0}")]
    InvalidLocation(String),

    #[error("ENA metadata request failed: {0}")]
    MetadataHttp(String),

    #[error("ENA returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("file report has no data rows: {0}")]
    IndexParse(String),

    #[error("download of {location} failed: {message}")]
    Download { location: String, message: String },

    #[error("{stage} failed for {sample} (exit status {status}): {stderr}")]
    StageInvocation {
        sample: String,
        stage: String,
        status: String,
        stderr: String,
    },

    #[error("{stage} analysis failed for {sample}: {message}")]
    AnalysisStage {
        sample: String,
        stage: String,
        message: String,
    },

    #[error("no files could be fetched for sample {0}")]
    Unfetchable(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("cannot prepare data root {path}: {message}")]
    DataRoot { path: String, message: String },

    #[error("all {0} samples were skipped")]
    AllSamplesSkipped(usize),
}

impl KiraError {
    pub fn severity(&self) -> Severity {
        match self {
            KiraError::Download { .. } | KiraError::AnalysisStage { .. } => {
                Severity::PartialFailure
            }
            KiraError::StageInvocation { .. } | KiraError::Unfetchable(_) => {
                Severity::SampleFailure
            }
            // per-sample directories failing to materialize only cost that sample
            KiraError::Filesystem(_) => Severity::SampleFailure,
            KiraError::InvalidAccession(_)
            | KiraError::InvalidLocation(_)
            | KiraError::MetadataHttp(_)
            | KiraError::MetadataStatus { .. }
            | KiraError::IndexParse(_)
            | KiraError::MissingTool(_)
            | KiraError::ConfigRead(_)
            | KiraError::ConfigParse(_)
            | KiraError::DataRoot { .. }
            | KiraError::AllSamplesSkipped(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
