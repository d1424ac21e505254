use serde::Serialize;
use tracing::{error, info};

use crate::domain::{FileIndex, ProjectAccession};
use crate::ena::MetadataClient;
use crate::error::KiraError;
use crate::index::parse_file_report;
use crate::sample::{SampleOrchestrator, SampleReport, SampleState};
use crate::tool::ToolRunner;
use crate::transport::Transport;

/// What a run with every sample skipped amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipPolicy {
    /// Skips never fail the run.
    #[default]
    Tolerate,
    /// A run that attempted samples and finished none is an error.
    FailWhenAllSkipped,
}

impl SkipPolicy {
    pub fn from_flag(fail_when_all_skipped: bool) -> Self {
        if fail_when_all_skipped {
            SkipPolicy::FailWhenAllSkipped
        } else {
            SkipPolicy::Tolerate
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub project: ProjectAccession,
    pub started_at: String,
    pub finished_at: String,
    pub done: usize,
    pub skipped: usize,
    pub samples: Vec<SampleReport>,
}

impl RunSummary {
    pub fn verdict(&self, policy: SkipPolicy) -> Result<(), KiraError> {
        let attempted = self.done + self.skipped;
        if policy == SkipPolicy::FailWhenAllSkipped && attempted > 0 && self.done == 0 {
            return Err(KiraError::AllSamplesSkipped(attempted));
        }
        Ok(())
    }
}

/// Walks a project's samples one at a time. Only the metadata lookup and
/// the report parse can fail the run.
pub struct ProjectOrchestrator<M: MetadataClient, T: Transport, R: ToolRunner> {
    project: ProjectAccession,
    metadata: M,
    samples: SampleOrchestrator<T, R>,
}

impl<M: MetadataClient, T: Transport, R: ToolRunner> ProjectOrchestrator<M, T, R> {
    pub fn new(project: ProjectAccession, metadata: M, samples: SampleOrchestrator<T, R>) -> Self {
        Self {
            project,
            metadata,
            samples,
        }
    }

    pub fn fetch_index(&self) -> Result<FileIndex, KiraError> {
        let text = self.metadata.fetch(&self.project).inspect_err(|err| {
            error!(project = %self.project, "metadata lookup failed: {err}");
        })?;
        let index = parse_file_report(&text)?;
        info!(
            project = %self.project,
            samples = index.len(),
            locations = index.location_count(),
            "file index built"
        );
        Ok(index)
    }

    pub fn run(&self) -> Result<RunSummary, KiraError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let index = self.fetch_index()?;
        self.samples.layout().ensure_roots()?;

        let mut reports = Vec::with_capacity(index.len());
        for (position, (sample, locations)) in index.iter().enumerate() {
            info!(
                sample = %sample,
                position = position + 1,
                total = index.len(),
                "processing sample"
            );
            reports.push(self.samples.run(sample, locations)?);
        }

        let done = reports
            .iter()
            .filter(|report| report.state == SampleState::Done)
            .count();
        let skipped = reports.iter().filter(|report| report.is_skipped()).count();
        info!(project = %self.project, done, skipped, "run finished");

        Ok(RunSummary {
            project: self.project.clone(),
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            done,
            skipped,
            samples: reports,
        })
    }
}
