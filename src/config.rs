use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ProjectAccession;
use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ep.json";
pub const ENA_FILEREPORT_URL: &str = "https://www.ebi.ac.uk/ena/portal/api/filereport";

/// On-disk `kira-ep.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub raw_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub java_mem: Option<String>,
    #[serde(default)]
    pub qc_mem: Option<String>,
    #[serde(default)]
    pub reference: Option<PathBuf>,
    #[serde(default)]
    pub metadata_timeout_secs: Option<u64>,
    #[serde(default)]
    pub metadata_base_url: Option<String>,
    #[serde(default)]
    pub fail_when_all_skipped: Option<bool>,
    #[serde(default)]
    pub verify_downloads: Option<bool>,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub read_group: ReadGroup,
}

/// Executables and workflow scripts the pipeline shells out to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolPaths {
    pub nextflow: PathBuf,
    pub merge_script: PathBuf,
    pub align_script: PathBuf,
    pub samtools: PathBuf,
    pub java: PathBuf,
    pub picard_jar: PathBuf,
    pub gatk: PathBuf,
    pub qualimap: PathBuf,
    pub mapdamage: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            nextflow: PathBuf::from("nextflow"),
            merge_script: PathBuf::from("nextflow_conf/nextflow_merge_script.nf"),
            align_script: PathBuf::from("nextflow_conf/nextflow_align_script.nf"),
            samtools: PathBuf::from("samtools"),
            java: PathBuf::from("java"),
            picard_jar: PathBuf::from("/usr/local/bin/picard.jar"),
            gatk: PathBuf::from("gatk"),
            qualimap: PathBuf::from("qualimap"),
            mapdamage: PathBuf::from("mapDamage"),
        }
    }
}

impl ToolPaths {
    /// Executables looked up on `PATH` (scripts and jars are plain files).
    pub fn executables(&self) -> Vec<(&'static str, &Path)> {
        vec![
            ("nextflow", self.nextflow.as_path()),
            ("samtools", self.samtools.as_path()),
            ("java", self.java.as_path()),
            ("gatk", self.gatk.as_path()),
            ("qualimap", self.qualimap.as_path()),
            ("mapDamage", self.mapdamage.as_path()),
        ]
    }

    pub fn files(&self) -> Vec<(&'static str, &Path)> {
        vec![
            ("merge_script", self.merge_script.as_path()),
            ("align_script", self.align_script.as_path()),
            ("picard_jar", self.picard_jar.as_path()),
        ]
    }
}

/// Constant read-group fields; ID, SM and DS come from the sample accession.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadGroup {
    pub library: String,
    pub platform: String,
    pub platform_unit: String,
    pub center: String,
}

impl Default for ReadGroup {
    fn default() -> Self {
        Self {
            library: "Bayanbulag".to_string(),
            platform: "ILLUMINA".to_string(),
            platform_unit: "tile".to_string(),
            center: "KNZWUNIV".to_string(),
        }
    }
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub project: Option<String>,
    pub raw_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub threads: Option<usize>,
    pub java_mem: Option<String>,
    pub reference: Option<PathBuf>,
    pub fail_when_all_skipped: bool,
    pub verify_downloads: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project: Option<ProjectAccession>,
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub threads: usize,
    pub java_mem: String,
    pub qc_mem: String,
    pub reference: PathBuf,
    pub metadata_timeout: Duration,
    pub metadata_base_url: String,
    pub fail_when_all_skipped: bool,
    pub verify_downloads: bool,
    pub tools: ToolPaths,
    pub read_group: ReadGroup,
}

impl PipelineConfig {
    pub fn require_project(&self) -> Result<&ProjectAccession, KiraError> {
        self.project
            .as_ref()
            .ok_or_else(|| KiraError::InvalidAccession("no project accession given".to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `kira-ep.json` when present. A missing default file
    /// means "all defaults"; a missing explicit file is an error.
    pub fn resolve(
        path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<PipelineConfig, KiraError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<PipelineConfig, KiraError> {
        let project = overrides
            .project
            .or(config.project)
            .map(|value| value.parse::<ProjectAccession>())
            .transpose()?;

        Ok(PipelineConfig {
            project,
            raw_dir: overrides
                .raw_dir
                .or(config.raw_dir)
                .unwrap_or_else(|| PathBuf::from("data/raw_data")),
            output_dir: overrides
                .output_dir
                .or(config.output_dir)
                .unwrap_or_else(|| PathBuf::from("data/output_data")),
            workers: overrides.workers.or(config.workers).unwrap_or(4).max(1),
            threads: overrides.threads.or(config.threads).unwrap_or(4).max(1),
            java_mem: overrides
                .java_mem
                .or(config.java_mem)
                .unwrap_or_else(|| "8G".to_string()),
            qc_mem: config.qc_mem.unwrap_or_else(|| "8G".to_string()),
            reference: overrides
                .reference
                .or(config.reference)
                .unwrap_or_else(|| PathBuf::from("data/reference/reference.fa")),
            metadata_timeout: Duration::from_secs(config.metadata_timeout_secs.unwrap_or(10)),
            metadata_base_url: config
                .metadata_base_url
                .unwrap_or_else(|| ENA_FILEREPORT_URL.to_string()),
            fail_when_all_skipped: overrides.fail_when_all_skipped
                || config.fail_when_all_skipped.unwrap_or(false),
            verify_downloads: overrides.verify_downloads
                || config.verify_downloads.unwrap_or(false),
            tools: config.tools,
            read_group: config.read_group,
        })
    }
}
