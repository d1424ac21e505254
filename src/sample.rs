use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::align::{self, AlignStage};
use crate::analysis::{AnalysisDirs, AnalysisKind, AnalysisStages};
use crate::bam::{BamPaths, BamPipeline};
use crate::config::PipelineConfig;
use crate::domain::{RemoteFileLocation, SampleAccession};
use crate::error::{KiraError, Severity};
use crate::fetcher::ParallelFetcher;
use crate::layout::{Layout, ensure_dir, reset_dir};
use crate::merge::{self, MergeStage};
use crate::tool::ToolRunner;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleState {
    Fetching,
    Merging,
    Processing,
    Analyzing,
    Done,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Succeeded,
    Failed,
}

impl SampleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SampleState::Done | SampleState::Skipped)
    }

    /// Transition table. `None` marks a move the machine does not allow:
    /// leaving a terminal state, or an analysis failure (those never skip).
    pub fn next(self, event: StageEvent) -> Option<SampleState> {
        use SampleState::*;
        match (self, event) {
            (Fetching, StageEvent::Succeeded) => Some(Merging),
            (Merging, StageEvent::Succeeded) => Some(Processing),
            (Processing, StageEvent::Succeeded) => Some(Analyzing),
            (Analyzing, StageEvent::Succeeded) => Some(Done),
            (Fetching | Merging | Processing, StageEvent::Failed) => Some(Skipped),
            (Analyzing, StageEvent::Failed) | (Done | Skipped, _) => None,
        }
    }
}

/// Transient bookkeeping for one sample, turned into a [`SampleReport`]
/// once the sample reaches a terminal state.
#[derive(Debug)]
pub struct SampleRunState {
    sample: SampleAccession,
    state: SampleState,
    last_success: Option<&'static str>,
    artifacts: Vec<PathBuf>,
}

impl SampleRunState {
    pub fn new(sample: SampleAccession) -> Self {
        Self {
            sample,
            state: SampleState::Fetching,
            last_success: None,
            artifacts: Vec::new(),
        }
    }

    pub fn state(&self) -> SampleState {
        self.state
    }

    pub fn last_success(&self) -> Option<&'static str> {
        self.last_success
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn record(&mut self, stage: &'static str, artifacts: &[PathBuf]) {
        self.last_success = Some(stage);
        self.artifacts.extend_from_slice(artifacts);
    }

    fn transition(&mut self, event: StageEvent) {
        match self.state.next(event) {
            Some(next) => self.state = next,
            None => warn!(
                sample = %self.sample,
                state = ?self.state,
                event = ?event,
                "ignoring transition"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub analysis: AnalysisKind,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub sample: SampleAccession,
    pub state: SampleState,
    pub last_stage: Option<String>,
    pub failure: Option<String>,
    pub downloads: Option<DownloadSummary>,
    pub artifacts: Vec<PathBuf>,
    pub analyses: Vec<AnalysisSummary>,
}

impl SampleReport {
    pub fn is_skipped(&self) -> bool {
        self.state == SampleState::Skipped
    }
}

/// Drives one sample through fetch → merge → align + BAM chain → analyses.
pub struct SampleOrchestrator<T: Transport, R: ToolRunner> {
    layout: Layout,
    fetcher: ParallelFetcher<T>,
    runner: R,
    merge: MergeStage,
    align: AlignStage,
    bam: BamPipeline,
    analysis: AnalysisStages,
}

impl<T: Transport, R: ToolRunner> SampleOrchestrator<T, R> {
    pub fn new(config: &PipelineConfig, layout: Layout, transport: T, runner: R) -> Self {
        Self {
            layout,
            fetcher: ParallelFetcher::new(transport, config.workers),
            runner,
            merge: MergeStage::new(&config.tools),
            align: AlignStage::from_config(config),
            bam: BamPipeline::from_config(config),
            analysis: AnalysisStages::from_config(config),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Runs one sample to a terminal state. Sample-level failures end in
    /// `SKIPPED`; only a fatal error is returned.
    pub fn run(
        &self,
        sample: &SampleAccession,
        locations: &[RemoteFileLocation],
    ) -> Result<SampleReport, KiraError> {
        let mut run = SampleRunState::new(sample.clone());
        let mut report = SampleReport {
            sample: sample.clone(),
            state: SampleState::Fetching,
            last_stage: None,
            failure: None,
            downloads: None,
            artifacts: Vec::new(),
            analyses: Vec::new(),
        };

        if let Err(err) = self.drive(&mut run, &mut report, locations) {
            if err.severity() == Severity::Fatal {
                return Err(err);
            }
            warn!(
                sample = %sample,
                state = ?run.state(),
                last_success = run.last_success().unwrap_or("none"),
                "skipping sample: {err}"
            );
            run.transition(StageEvent::Failed);
            report.failure = Some(err.to_string());
        }

        report.state = run.state();
        report.last_stage = run.last_success().map(str::to_string);
        report.artifacts = run.artifacts().to_vec();
        Ok(report)
    }

    fn drive(
        &self,
        run: &mut SampleRunState,
        report: &mut SampleReport,
        locations: &[RemoteFileLocation],
    ) -> Result<(), KiraError> {
        let sample = run.sample.clone();

        // FETCHING
        let sample_dir = self.layout.sample_raw_dir(&sample);
        reset_dir(&sample_dir)?;
        let fetched = self.fetcher.fetch_all(sample_dir.as_std_path(), locations);
        let downloads = fetched.artifacts();
        report.downloads = Some(DownloadSummary {
            succeeded: downloads.len(),
            failed: fetched.failures().count(),
            excluded: fetched.excluded.len(),
        });
        if downloads.is_empty() {
            return Err(KiraError::Unfetchable(sample.to_string()));
        }
        run.record("fetch", &downloads);
        run.transition(StageEvent::Succeeded);

        // MERGING
        let merged_path = self.layout.merged_reads_path(&sample);
        let merged = self.merge.merge(
            &self.runner,
            &sample,
            sample_dir.as_std_path(),
            merged_path.as_std_path(),
            &downloads,
        )?;
        run.record(merge::STAGE, std::slice::from_ref(&merged));
        run.transition(StageEvent::Succeeded);

        // PROCESSING
        let bam_dir = self.layout.bam_dir(&sample);
        let dedup_dir = self.layout.dedup_dir(&sample);
        ensure_dir(&bam_dir)?;
        ensure_dir(&dedup_dir)?;
        let raw_bam = self
            .align
            .align(&self.runner, &sample, &merged, bam_dir.as_std_path())?;
        run.record(align::STAGE, std::slice::from_ref(&raw_bam));
        let paths = BamPaths::new(
            &sample,
            &raw_bam,
            bam_dir.as_std_path(),
            dedup_dir.as_std_path(),
        );
        let processed = self
            .bam
            .run(&self.runner, &sample, &paths, &mut |step, outputs| {
                run.record(step.name(), outputs)
            })?;
        run.transition(StageEvent::Succeeded);

        // ANALYZING
        let dirs = self.analysis_dirs(&sample);
        for outcome in self
            .analysis
            .run_all(&self.runner, &sample, &processed.bam, &dirs)
        {
            let summary = match outcome.result {
                Ok(output) => {
                    run.record(outcome.kind.name(), std::slice::from_ref(&output));
                    AnalysisSummary {
                        analysis: outcome.kind,
                        output: Some(output),
                        error: None,
                    }
                }
                Err(err) => AnalysisSummary {
                    analysis: outcome.kind,
                    output: None,
                    error: Some(err.to_string()),
                },
            };
            report.analyses.push(summary);
        }
        run.transition(StageEvent::Succeeded);
        info!(sample = %sample, "sample done");
        Ok(())
    }

    fn analysis_dirs(&self, sample: &SampleAccession) -> AnalysisDirs {
        AnalysisDirs {
            mapdamage: self.layout.mapdamage_dir(sample).into_std_path_buf(),
            qualimap: self.layout.qualimap_dir(sample).into_std_path_buf(),
            vcf: self.layout.vcf_dir(sample).into_std_path_buf(),
            temp: self.layout.temp_dir(sample).into_std_path_buf(),
        }
    }
}
