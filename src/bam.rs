use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::config::{PipelineConfig, ReadGroup};
use crate::domain::SampleAccession;
use crate::error::KiraError;
use crate::tool::{Invocation, ToolRunner, run_stage};

/// The clean-up chain, in execution order. Each step reads the artifact of
/// the step before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BamStep {
    Sort,
    Clean,
    AddReadGroups,
    MarkDuplicates,
    RemoveDuplicates,
    SortDedup,
    Index,
}

impl BamStep {
    pub const ALL: [BamStep; 7] = [
        BamStep::Sort,
        BamStep::Clean,
        BamStep::AddReadGroups,
        BamStep::MarkDuplicates,
        BamStep::RemoveDuplicates,
        BamStep::SortDedup,
        BamStep::Index,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BamStep::Sort => "sort",
            BamStep::Clean => "clean",
            BamStep::AddReadGroups => "add-read-groups",
            BamStep::MarkDuplicates => "mark-duplicates",
            BamStep::RemoveDuplicates => "remove-duplicates",
            BamStep::SortDedup => "sort-dedup",
            BamStep::Index => "index",
        }
    }
}

impl fmt::Display for BamStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Artifact names for one sample. Intermediates live in `bam_dir`, the
/// deduplicated alignments in `dedup_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BamPaths {
    pub raw: PathBuf,
    pub sorted: PathBuf,
    pub clean: PathBuf,
    pub grouped: PathBuf,
    pub marked: PathBuf,
    pub marked_metrics: PathBuf,
    pub dedup: PathBuf,
    pub dedup_metrics: PathBuf,
    pub dedup_sorted: PathBuf,
    pub index: PathBuf,
}

impl BamPaths {
    pub fn new(sample: &SampleAccession, raw: &Path, bam_dir: &Path, dedup_dir: &Path) -> Self {
        let base = sample.as_str();
        let dedup_sorted = dedup_dir.join(format!("{base}.marked.dedup.sorted.bam"));
        let mut index = dedup_sorted.clone().into_os_string();
        index.push(".bai");
        Self {
            raw: raw.to_path_buf(),
            sorted: bam_dir.join(format!("{base}.sorted.bam")),
            clean: bam_dir.join(format!("{base}.clean.bam")),
            grouped: bam_dir.join(format!("{base}.grouped.bam")),
            marked: bam_dir.join(format!("{base}.marked.bam")),
            marked_metrics: bam_dir.join(format!("{base}.marked_dup_metrics.txt")),
            dedup: dedup_dir.join(format!("{base}.marked.dedup.bam")),
            dedup_metrics: bam_dir.join(format!("{base}.dedup_metrics.txt")),
            index: PathBuf::from(index),
            dedup_sorted,
        }
    }

    /// What `step` reads.
    pub fn input(&self, step: BamStep) -> &Path {
        match step {
            BamStep::Sort => &self.raw,
            BamStep::Clean => &self.sorted,
            BamStep::AddReadGroups => &self.clean,
            BamStep::MarkDuplicates => &self.grouped,
            BamStep::RemoveDuplicates => &self.marked,
            BamStep::SortDedup => &self.dedup,
            BamStep::Index => &self.dedup_sorted,
        }
    }

    /// The step's named artifact.
    pub fn artifact(&self, step: BamStep) -> &Path {
        match step {
            BamStep::Sort => &self.sorted,
            BamStep::Clean => &self.clean,
            BamStep::AddReadGroups => &self.grouped,
            BamStep::MarkDuplicates => &self.marked,
            BamStep::RemoveDuplicates => &self.dedup,
            BamStep::SortDedup => &self.dedup_sorted,
            BamStep::Index => &self.index,
        }
    }

    /// Every file the step writes, side outputs included.
    pub fn outputs(&self, step: BamStep) -> Vec<PathBuf> {
        match step {
            BamStep::MarkDuplicates => vec![self.marked.clone(), self.marked_metrics.clone()],
            BamStep::RemoveDuplicates => vec![self.dedup.clone(), self.dedup_metrics.clone()],
            other => vec![self.artifact(other).to_path_buf()],
        }
    }
}

/// Sorted, deduplicated and indexed alignment ready for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedBam {
    pub bam: PathBuf,
    pub index: PathBuf,
    pub duplicate_metrics: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BamPipeline {
    samtools: PathBuf,
    java: PathBuf,
    picard_jar: PathBuf,
    java_mem: String,
    threads: usize,
    read_group: ReadGroup,
}

impl BamPipeline {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            samtools: config.tools.samtools.clone(),
            java: config.tools.java.clone(),
            picard_jar: config.tools.picard_jar.clone(),
            java_mem: config.java_mem.clone(),
            threads: config.threads,
            read_group: config.read_group.clone(),
        }
    }

    fn picard(&self, tool: &str) -> Invocation {
        Invocation::new(&self.java)
            .arg(format!("-Xmx{}", self.java_mem))
            .arg("-jar")
            .path_arg(&self.picard_jar)
            .arg(tool)
    }

    fn samtools_sort(&self, input: &Path, output: &Path) -> Invocation {
        Invocation::new(&self.samtools)
            .arg("sort")
            .arg("-@")
            .arg(self.threads.to_string())
            .arg("-o")
            .path_arg(output)
            .path_arg(input)
    }

    pub fn invocation(&self, step: BamStep, sample: &SampleAccession, paths: &BamPaths) -> Invocation {
        let input = paths.input(step).display().to_string();
        match step {
            BamStep::Sort => self.samtools_sort(&paths.raw, &paths.sorted),
            BamStep::Clean => self
                .picard("CleanSam")
                .arg(format!("I={input}"))
                .arg(format!("O={}", paths.clean.display()))
                .arg("VALIDATION_STRINGENCY=LENIENT"),
            BamStep::AddReadGroups => {
                let rg = &self.read_group;
                let id = sample.as_str();
                self.picard("AddOrReplaceReadGroups")
                    .arg(format!("I={input}"))
                    .arg(format!("O={}", paths.grouped.display()))
                    .arg(format!("RGLB={}", rg.library))
                    .arg(format!("RGSM={id}"))
                    .arg(format!("RGPU={}", rg.platform_unit))
                    .arg(format!("RGPL={}", rg.platform))
                    .arg(format!("RGID={id}"))
                    .arg(format!("RGDS={id}"))
                    .arg(format!("RGCN={}", rg.center))
                    .arg("VALIDATION_STRINGENCY=LENIENT")
            }
            BamStep::MarkDuplicates => self
                .picard("MarkDuplicates")
                .arg(format!("I={input}"))
                .arg(format!("O={}", paths.marked.display()))
                .arg(format!("M={}", paths.marked_metrics.display()))
                .arg("VALIDATION_STRINGENCY=LENIENT"),
            BamStep::RemoveDuplicates => self
                .picard("MarkDuplicates")
                .arg(format!("I={input}"))
                .arg(format!("O={}", paths.dedup.display()))
                .arg(format!("M={}", paths.dedup_metrics.display()))
                .arg("REMOVE_DUPLICATES=true")
                .arg("VALIDATION_STRINGENCY=LENIENT"),
            BamStep::SortDedup => self.samtools_sort(&paths.dedup, &paths.dedup_sorted),
            BamStep::Index => Invocation::new(&self.samtools)
                .arg("index")
                .path_arg(&paths.dedup_sorted),
        }
    }

    /// Runs the seven steps in order and stops at the first non-zero exit.
    /// `on_step` sees each step's outputs right after it succeeds.
    pub fn run(
        &self,
        runner: &dyn ToolRunner,
        sample: &SampleAccession,
        paths: &BamPaths,
        on_step: &mut dyn FnMut(BamStep, &[PathBuf]),
    ) -> Result<ProcessedBam, KiraError> {
        info!(sample = %sample, input = %paths.raw.display(), "running BAM processing");
        for dir in [paths.sorted.parent(), paths.dedup.parent()].into_iter().flatten() {
            std::fs::create_dir_all(dir)
                .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", dir.display())))?;
        }

        for step in BamStep::ALL {
            let invocation = self.invocation(step, sample, paths);
            run_stage(runner, sample, step.name(), &invocation)?;
            info!(sample = %sample, step = step.name(), artifact = %paths.artifact(step).display(), "step done");
            on_step(step, &paths.outputs(step));
        }

        info!(sample = %sample, "BAM processing completed");
        Ok(ProcessedBam {
            bam: paths.dedup_sorted.clone(),
            index: paths.index.clone(),
            duplicate_metrics: paths.marked_metrics.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::config::{ConfigLoader, ConfigOverrides};
    use crate::tool::ToolOutput;

    /// Fails the n-th call (0-based) and records everything it is asked to run.
    struct FailAt {
        fail_at: Option<usize>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl ToolRunner for FailAt {
        fn run(&self, invocation: &Invocation) -> Result<ToolOutput, KiraError> {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.len();
            calls.push(invocation.clone());
            if Some(n) == self.fail_at {
                return Ok(ToolOutput::failed(1, "boom"));
            }
            Ok(ToolOutput::ok())
        }
    }

    fn pipeline() -> BamPipeline {
        let config =
            ConfigLoader::resolve_config(Default::default(), ConfigOverrides::default()).unwrap();
        BamPipeline::from_config(&config)
    }

    fn paths(root: &Path) -> (SampleAccession, BamPaths) {
        let sample: SampleAccession = "SAMEA1".parse().unwrap();
        let paths = BamPaths::new(
            &sample,
            &root.join("bam/SAMEA1.bam"),
            &root.join("bam"),
            &root.join("dedup"),
        );
        (sample, paths)
    }

    #[test]
    fn seven_distinct_artifacts_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let (sample, paths) = paths(temp.path());
        let runner = FailAt {
            fail_at: None,
            calls: Mutex::new(Vec::new()),
        };
        let mut produced = Vec::new();
        let result = pipeline()
            .run(&runner, &sample, &paths, &mut |step, _| {
                produced.push(step)
            })
            .unwrap();

        assert_eq!(produced, BamStep::ALL.to_vec());
        assert_eq!(runner.calls.lock().unwrap().len(), 7);
        assert!(result.bam.ends_with("dedup/SAMEA1.marked.dedup.sorted.bam"));
        assert!(result.index.ends_with("dedup/SAMEA1.marked.dedup.sorted.bam.bai"));

        let artifacts: std::collections::HashSet<_> =
            BamStep::ALL.iter().map(|step| paths.artifact(*step)).collect();
        assert_eq!(artifacts.len(), 7);
    }

    #[test]
    fn each_step_reads_previous_artifact() {
        let temp = tempfile::tempdir().unwrap();
        let (_, paths) = paths(temp.path());
        for pair in BamStep::ALL.windows(2) {
            assert_eq!(paths.input(pair[1]), paths.artifact(pair[0]));
        }
    }

    #[test]
    fn failure_stops_the_chain() {
        let temp = tempfile::tempdir().unwrap();
        let (sample, paths) = paths(temp.path());
        let runner = FailAt {
            fail_at: Some(3),
            calls: Mutex::new(Vec::new()),
        };
        let mut produced = Vec::new();
        let err = pipeline()
            .run(&runner, &sample, &paths, &mut |step, _| produced.push(step))
            .unwrap_err();

        assert_matches!(err, KiraError::StageInvocation { ref stage, .. } if stage == "mark-duplicates");
        assert_eq!(runner.calls.lock().unwrap().len(), 4);
        assert_eq!(
            produced,
            vec![BamStep::Sort, BamStep::Clean, BamStep::AddReadGroups]
        );
    }

    #[test]
    fn read_groups_come_from_sample_and_constants() {
        let temp = tempfile::tempdir().unwrap();
        let (sample, paths) = paths(temp.path());
        let invocation = pipeline().invocation(BamStep::AddReadGroups, &sample, &paths);
        for expected in [
            "AddOrReplaceReadGroups",
            "RGSM=SAMEA1",
            "RGID=SAMEA1",
            "RGLB=Bayanbulag",
            "RGPL=ILLUMINA",
            "RGCN=KNZWUNIV",
        ] {
            assert!(invocation.args.iter().any(|arg| arg == expected), "{expected}");
        }
        assert_eq!(invocation.args[0], "-Xmx8G");
    }

    #[test]
    fn dedup_is_a_separate_removing_run() {
        let temp = tempfile::tempdir().unwrap();
        let (sample, paths) = paths(temp.path());
        let pipeline = pipeline();
        let mark = pipeline.invocation(BamStep::MarkDuplicates, &sample, &paths);
        let remove = pipeline.invocation(BamStep::RemoveDuplicates, &sample, &paths);
        assert!(!mark.args.iter().any(|arg| arg == "REMOVE_DUPLICATES=true"));
        assert!(remove.args.iter().any(|arg| arg == "REMOVE_DUPLICATES=true"));
        assert_ne!(paths.marked_metrics, paths.dedup_metrics);
    }
}
