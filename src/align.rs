use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{PipelineConfig, ToolPaths};
use crate::domain::SampleAccession;
use crate::error::KiraError;
use crate::tool::{Invocation, ToolRunner, run_stage};

pub const STAGE: &str = "align";

/// Maps merged reads to the reference through the alignment workflow,
/// producing the raw alignment the BAM chain starts from.
#[derive(Debug, Clone)]
pub struct AlignStage {
    nextflow: PathBuf,
    script: PathBuf,
    reference: PathBuf,
    threads: usize,
}

impl AlignStage {
    pub fn new(tools: &ToolPaths, reference: &Path, threads: usize) -> Self {
        Self {
            nextflow: tools.nextflow.clone(),
            script: tools.align_script.clone(),
            reference: reference.to_path_buf(),
            threads,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.tools, &config.reference, config.threads)
    }

    pub fn invocation(&self, merged: &Path, output: &Path) -> Invocation {
        Invocation::new(&self.nextflow)
            .arg("run")
            .path_arg(&self.script)
            .arg("--input")
            .path_arg(merged)
            .arg("--reference")
            .path_arg(&self.reference)
            .arg("--output_file")
            .path_arg(output)
            .arg("--threads")
            .arg(self.threads.to_string())
    }

    pub fn align(
        &self,
        runner: &dyn ToolRunner,
        sample: &SampleAccession,
        merged: &Path,
        bam_dir: &Path,
    ) -> Result<PathBuf, KiraError> {
        let output = bam_dir.join(format!("{}.bam", sample.as_str()));
        info!(sample = %sample, input = %merged.display(), "aligning merged reads");
        run_stage(runner, sample, STAGE, &self.invocation(merged, &output))?;
        Ok(output)
    }
}
