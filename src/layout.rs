use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{ProjectAccession, SampleAccession};
use crate::error::KiraError;

pub const MERGED_READS_FILE: &str = "merged.fastq.gz";

/// `<raw>/<project>/<sample>/` holds downloads and merged reads,
/// `<output>/<project>/<sample>/` holds alignments and analysis results.
#[derive(Debug, Clone)]
pub struct Layout {
    raw_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

impl Layout {
    pub fn new(
        raw_root: &std::path::Path,
        output_root: &std::path::Path,
        project: &ProjectAccession,
    ) -> Result<Self, KiraError> {
        let raw_root = Utf8PathBuf::from_path_buf(raw_root.join(project.as_str()))
            .map_err(|_| KiraError::Filesystem("invalid raw data path".to_string()))?;
        let output_root = Utf8PathBuf::from_path_buf(output_root.join(project.as_str()))
            .map_err(|_| KiraError::Filesystem("invalid output path".to_string()))?;
        Ok(Self {
            raw_root,
            output_root,
        })
    }

    pub fn raw_root(&self) -> &Utf8Path {
        &self.raw_root
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn sample_raw_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.raw_root.join(sample.as_str())
    }

    pub fn merged_reads_path(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.sample_raw_dir(sample).join(MERGED_READS_FILE)
    }

    pub fn sample_output_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.output_root.join(sample.as_str())
    }

    pub fn bam_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.sample_output_dir(sample).join("bam")
    }

    pub fn dedup_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.sample_output_dir(sample).join("dedup")
    }

    pub fn mapdamage_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.sample_output_dir(sample).join("mapdamage")
    }

    pub fn qualimap_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.sample_output_dir(sample).join("qualimap")
    }

    pub fn vcf_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.sample_output_dir(sample).join("vcf")
    }

    pub fn temp_dir(&self, sample: &SampleAccession) -> Utf8PathBuf {
        self.sample_output_dir(sample).join("tmp")
    }

    /// Project roots are shared by every sample, so failing here is fatal.
    pub fn ensure_roots(&self) -> Result<(), KiraError> {
        for root in [&self.raw_root, &self.output_root] {
            fs::create_dir_all(root.as_std_path()).map_err(|err| KiraError::DataRoot {
                path: root.to_string(),
                message: err.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Idempotent `mkdir -p`.
pub fn ensure_dir(path: &Utf8Path) -> Result<(), KiraError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("create {path}: {err}")))
}

/// Empties `path` (creating it if needed). Files left by an earlier run
/// must never reach a stage of this one.
pub fn reset_dir(path: &Utf8Path) -> Result<(), KiraError> {
    if path.exists() {
        fs::remove_dir_all(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("clear {path}: {err}")))?;
    }
    ensure_dir(path)
}
