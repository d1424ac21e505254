use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::domain::SampleAccession;
use crate::error::KiraError;
use crate::tool::{Invocation, ToolRunner, run_stage};

pub const DAMAGE_MIN_MAPQ: u8 = 30;
pub const DAMAGE_MIN_POS: u32 = 300;
pub const CALL_CONFIDENCE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    Damage,
    Quality,
    Variants,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 3] = [
        AnalysisKind::Damage,
        AnalysisKind::Quality,
        AnalysisKind::Variants,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalysisKind::Damage => "mapdamage",
            AnalysisKind::Quality => "qualimap",
            AnalysisKind::Variants => "haplotype-caller",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where each analysis writes for one sample.
#[derive(Debug, Clone)]
pub struct AnalysisDirs {
    pub mapdamage: PathBuf,
    pub qualimap: PathBuf,
    pub vcf: PathBuf,
    pub temp: PathBuf,
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub kind: AnalysisKind,
    pub result: Result<PathBuf, KiraError>,
}

#[derive(Debug, Clone)]
pub struct AnalysisStages {
    samtools: PathBuf,
    mapdamage: PathBuf,
    qualimap: PathBuf,
    gatk: PathBuf,
    reference: PathBuf,
    qc_mem: String,
    threads: usize,
}

impl AnalysisStages {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            samtools: config.tools.samtools.clone(),
            mapdamage: config.tools.mapdamage.clone(),
            qualimap: config.tools.qualimap.clone(),
            gatk: config.tools.gatk.clone(),
            reference: config.reference.clone(),
            qc_mem: config.qc_mem.clone(),
            threads: config.threads,
        }
    }

    /// Filter (MAPQ and position), sort, then estimate damage patterns.
    pub fn damage_invocations(&self, sample: &SampleAccession, bam: &Path, dirs: &AnalysisDirs) -> Vec<Invocation> {
        let filtered = dirs.temp.join(format!("{}_filtered.bam", sample.as_str()));
        let sorted = dirs.temp.join(format!("{}_filtered.sorted.bam", sample.as_str()));
        vec![
            Invocation::new(&self.samtools)
                .arg("view")
                .arg("-b")
                .arg("-h")
                .arg("-q")
                .arg(DAMAGE_MIN_MAPQ.to_string())
                .arg("-e")
                .arg(format!("pos>={DAMAGE_MIN_POS}"))
                .arg("-o")
                .path_arg(&filtered)
                .path_arg(bam),
            Invocation::new(&self.samtools)
                .arg("sort")
                .arg("-o")
                .path_arg(&sorted)
                .path_arg(&filtered),
            Invocation::new(&self.mapdamage)
                .arg("-i")
                .path_arg(&sorted)
                .arg("-r")
                .path_arg(&self.reference)
                .arg("-d")
                .path_arg(&dirs.mapdamage)
                .arg("--merge-libraries"),
        ]
    }

    pub fn quality_invocation(&self, bam: &Path, dirs: &AnalysisDirs) -> Invocation {
        Invocation::new(&self.qualimap)
            .arg("bamqc")
            .arg("-bam")
            .path_arg(bam)
            .arg("-outdir")
            .path_arg(&dirs.qualimap)
            .arg("-outformat")
            .arg("HTML")
            .arg(format!("--java-mem-size={}", self.qc_mem))
    }

    pub fn vcf_path(sample: &SampleAccession, dirs: &AnalysisDirs) -> PathBuf {
        dirs.vcf.join(format!("{}.vcf", sample.as_str()))
    }

    pub fn variants_invocation(&self, sample: &SampleAccession, bam: &Path, dirs: &AnalysisDirs) -> Invocation {
        Invocation::new(&self.gatk)
            .arg("HaplotypeCaller")
            .arg("-R")
            .path_arg(&self.reference)
            .arg("-I")
            .path_arg(bam)
            .arg("-O")
            .path_arg(Self::vcf_path(sample, dirs))
            .arg("--output-mode")
            .arg("EMIT_VARIANTS_ONLY")
            .arg("-stand-call-conf")
            .arg(CALL_CONFIDENCE.to_string())
            .arg("--native-pair-hmm-threads")
            .arg(self.threads.to_string())
    }

    pub fn run(
        &self,
        kind: AnalysisKind,
        runner: &dyn ToolRunner,
        sample: &SampleAccession,
        bam: &Path,
        dirs: &AnalysisDirs,
    ) -> Result<PathBuf, KiraError> {
        info!(sample = %sample, analysis = kind.name(), "running analysis");
        let (invocations, output, dirs_to_create) = match kind {
            AnalysisKind::Damage => (
                self.damage_invocations(sample, bam, dirs),
                dirs.mapdamage.clone(),
                vec![&dirs.mapdamage, &dirs.temp],
            ),
            AnalysisKind::Quality => (
                vec![self.quality_invocation(bam, dirs)],
                dirs.qualimap.clone(),
                vec![&dirs.qualimap],
            ),
            AnalysisKind::Variants => (
                vec![self.variants_invocation(sample, bam, dirs)],
                Self::vcf_path(sample, dirs),
                vec![&dirs.vcf],
            ),
        };

        for dir in dirs_to_create {
            std::fs::create_dir_all(dir).map_err(|err| KiraError::AnalysisStage {
                sample: sample.to_string(),
                stage: kind.name().to_string(),
                message: format!("create {}: {err}", dir.display()),
            })?;
        }
        for invocation in &invocations {
            run_stage(runner, sample, kind.name(), invocation).map_err(|err| {
                KiraError::AnalysisStage {
                    sample: sample.to_string(),
                    stage: kind.name().to_string(),
                    message: err.to_string(),
                }
            })?;
        }
        info!(sample = %sample, analysis = kind.name(), output = %output.display(), "analysis completed");
        Ok(output)
    }

    /// Runs every analysis; one failing never stops the others.
    pub fn run_all(
        &self,
        runner: &dyn ToolRunner,
        sample: &SampleAccession,
        bam: &Path,
        dirs: &AnalysisDirs,
    ) -> Vec<AnalysisOutcome> {
        AnalysisKind::ALL
            .into_iter()
            .map(|kind| {
                let result = self.run(kind, runner, sample, bam, dirs);
                if let Err(err) = &result {
                    error!(sample = %sample, analysis = kind.name(), "{err}");
                }
                AnalysisOutcome { kind, result }
            })
            .collect()
    }
}
