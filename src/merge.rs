use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::ToolPaths;
use crate::domain::SampleAccession;
use crate::error::KiraError;
use crate::tool::{Invocation, ToolRunner, run_stage};

pub const STAGE: &str = "merge";

/// Concatenates a sample's downloaded reads through the merge workflow.
#[derive(Debug, Clone)]
pub struct MergeStage {
    nextflow: PathBuf,
    script: PathBuf,
}

impl MergeStage {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            nextflow: tools.nextflow.clone(),
            script: tools.merge_script.clone(),
        }
    }

    pub fn invocation(&self, sample_dir: &Path, merged: &Path) -> Invocation {
        Invocation::new(&self.nextflow)
            .arg("run")
            .path_arg(&self.script)
            .arg("--input_dir")
            .path_arg(sample_dir)
            .arg("--output_file")
            .path_arg(merged)
    }

    pub fn merge(
        &self,
        runner: &dyn ToolRunner,
        sample: &SampleAccession,
        sample_dir: &Path,
        merged: &Path,
        inputs: &[PathBuf],
    ) -> Result<PathBuf, KiraError> {
        // a merged file left by an earlier run would be picked up as input
        if merged.exists() {
            fs::remove_file(merged)
                .map_err(|err| KiraError::Filesystem(format!("remove {}: {err}", merged.display())))?;
        }

        info!(sample = %sample, inputs = inputs.len(), merged = %merged.display(), "merging reads");
        let output = run_stage(runner, sample, STAGE, &self.invocation(sample_dir, merged))?;
        if !output.stdout.is_empty() {
            debug!(sample = %sample, stdout = %output.stdout, "merge output");
        }
        Ok(merged.to_path_buf())
    }
}
