use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;

use kira_ena_pipeline::config::{ConfigLoader, ConfigOverrides, PipelineConfig};
use kira_ena_pipeline::domain::{ProjectAccession, RemoteFileLocation};
use kira_ena_pipeline::ena::MetadataClient;
use kira_ena_pipeline::error::KiraError;
use kira_ena_pipeline::layout::Layout;
use kira_ena_pipeline::project::{ProjectOrchestrator, SkipPolicy};
use kira_ena_pipeline::sample::{SampleOrchestrator, SampleState};
use kira_ena_pipeline::tool::{Invocation, ToolOutput, ToolRunner};
use kira_ena_pipeline::transport::Transport;

const REPORT: &str = "sample_accession\tsubmitted_ftp\nSAMPLEA\tftp.example.org/x/a_1.fastq.gz;ftp.example.org/x/a_2.fastq.gz\n";

struct FixedReport(Result<String, String>);

impl MetadataClient for FixedReport {
    fn fetch(&self, _project: &ProjectAccession) -> Result<String, KiraError> {
        self.0.clone().map_err(KiraError::MetadataHttp)
    }
}

/// Writes the location's file name into the destination; fails for
/// locations containing `fail_on`.
struct FakeTransport {
    fail_on: Option<&'static str>,
    fetched: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn new(fail_on: Option<&'static str>) -> Self {
        Self {
            fail_on,
            fetched: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for FakeTransport {
    fn fetch(&self, location: &RemoteFileLocation, destination: &Path) -> Result<u64, KiraError> {
        if self.fail_on.is_some_and(|marker| location.as_str().contains(marker)) {
            return Err(KiraError::Download {
                location: location.to_string(),
                message: "connection reset".to_string(),
            });
        }
        fs::write(destination, location.file_name()).unwrap();
        self.fetched.lock().unwrap().push(location.to_string());
        Ok(location.file_name().len() as u64)
    }
}

/// Records every invocation; fails the ones whose command line contains
/// `fail_on`.
struct Recorder {
    fail_on: Option<&'static str>,
    calls: Mutex<Vec<Invocation>>,
}

impl Recorder {
    fn new(fail_on: Option<&'static str>) -> Self {
        Self {
            fail_on,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ToolRunner for Recorder {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, KiraError> {
        self.calls.lock().unwrap().push(invocation.clone());
        if self
            .fail_on
            .is_some_and(|marker| invocation.to_string().contains(marker))
        {
            return Ok(ToolOutput::failed(2, "tool exploded"));
        }
        Ok(ToolOutput::ok())
    }
}

fn stage_label(invocation: &Invocation) -> String {
    let program = invocation
        .program
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    match program.as_str() {
        "nextflow" if invocation.args.iter().any(|arg| arg == "--input_dir") => "merge".to_string(),
        "nextflow" => "align".to_string(),
        "samtools" => format!("samtools {}", invocation.args[0]),
        "java" => invocation.args[3].clone(),
        other => other.to_string(),
    }
}

fn config(root: &Path) -> PipelineConfig {
    ConfigLoader::resolve_config(
        Default::default(),
        ConfigOverrides {
            project: Some("PRJEB19970".to_string()),
            raw_dir: Some(root.join("raw")),
            output_dir: Some(root.join("out")),
            workers: Some(2),
            ..ConfigOverrides::default()
        },
    )
    .unwrap()
}

fn orchestrator<'a>(
    config: &PipelineConfig,
    report: Result<String, String>,
    transport: &'a FakeTransport,
    runner: &'a Recorder,
) -> ProjectOrchestrator<FixedReport, &'a FakeTransport, &'a Recorder> {
    let project = config.require_project().unwrap().clone();
    let layout = Layout::new(&config.raw_dir, &config.output_dir, &project).unwrap();
    let samples = SampleOrchestrator::new(config, layout, transport, runner);
    ProjectOrchestrator::new(project, FixedReport(report), samples)
}

#[test]
fn single_sample_runs_every_stage_in_order() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(None);
    let runner = Recorder::new(None);

    let summary = orchestrator(&config, Ok(REPORT.to_string()), &transport, &runner)
        .run()
        .unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(summary.skipped, 0);
    let sample = &summary.samples[0];
    assert_eq!(sample.state, SampleState::Done);
    assert_eq!(sample.downloads.as_ref().unwrap().succeeded, 2);
    assert!(sample.analyses.iter().all(|analysis| analysis.error.is_none()));

    let raw_dir = temp.path().join("raw/PRJEB19970/SAMPLEA");
    assert!(raw_dir.join("a_1.fastq.gz").exists());
    assert!(raw_dir.join("a_2.fastq.gz").exists());

    let calls = runner.calls.lock().unwrap();
    let labels = calls.iter().map(stage_label).collect::<Vec<_>>();
    assert_eq!(
        labels[..9],
        [
            "merge",
            "align",
            "samtools sort",
            "CleanSam",
            "AddOrReplaceReadGroups",
            "MarkDuplicates",
            "MarkDuplicates",
            "samtools sort",
            "samtools index",
        ]
    );
    assert_eq!(calls.len(), 14);

    let merge = &calls[0];
    assert!(merge.args.contains(&raw_dir.display().to_string()));
    assert!(
        merge
            .args
            .contains(&raw_dir.join("merged.fastq.gz").display().to_string())
    );
    assert!(calls[6].args.iter().any(|arg| arg == "REMOVE_DUPLICATES=true"));
}

#[test]
fn failed_bam_step_skips_sample_without_analyses() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(None);
    let runner = Recorder::new(Some("CleanSam"));

    let summary = orchestrator(&config, Ok(REPORT.to_string()), &transport, &runner)
        .run()
        .unwrap();

    let sample = &summary.samples[0];
    assert_eq!(sample.state, SampleState::Skipped);
    assert_eq!(sample.last_stage.as_deref(), Some("sort"));
    assert!(sample.analyses.is_empty());
    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|call| !call.to_string().contains("HaplotypeCaller")));
}

#[test]
fn merge_failure_does_not_stop_next_sample() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(None);
    let runner = Recorder::new(Some("raw/PRJEB19970/SAMPLEA "));
    let report = "sample_accession\tsubmitted_ftp\n\
                  SAMPLEA\tftp.example.org/a/a_1.fastq.gz\n\
                  SAMPLEB\tftp.example.org/b/b_1.fastq.gz\n";

    let summary = orchestrator(&config, Ok(report.to_string()), &transport, &runner)
        .run()
        .unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.samples[0].state, SampleState::Skipped);
    assert_eq!(summary.samples[0].last_stage.as_deref(), Some("fetch"));
    assert_matches!(summary.samples[1].state, SampleState::Done);

    let calls = runner.calls.lock().unwrap();
    // one failed merge for SAMPLEA, then the full chain for SAMPLEB
    assert_eq!(calls.len(), 15);
    assert_eq!(stage_label(&calls[0]), "merge");
    assert_eq!(stage_label(&calls[1]), "merge");
}

#[test]
fn partial_download_still_merges() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(Some("a_2"));
    let runner = Recorder::new(None);

    let summary = orchestrator(&config, Ok(REPORT.to_string()), &transport, &runner)
        .run()
        .unwrap();

    let sample = &summary.samples[0];
    assert_eq!(sample.state, SampleState::Done);
    let downloads = sample.downloads.as_ref().unwrap();
    assert_eq!(downloads.succeeded, 1);
    assert_eq!(downloads.failed, 1);
}

#[test]
fn files_from_an_earlier_run_never_reach_merge() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let raw_dir = temp.path().join("raw/PRJEB19970/SAMPLEA");
    fs::create_dir_all(&raw_dir).unwrap();
    fs::write(raw_dir.join("a_2.fastq.gz"), b"previous run").unwrap();
    fs::write(raw_dir.join("leftover.fastq.gz"), b"previous run").unwrap();
    let transport = FakeTransport::new(Some("a_2"));
    let runner = Recorder::new(None);

    let summary = orchestrator(&config, Ok(REPORT.to_string()), &transport, &runner)
        .run()
        .unwrap();

    let downloads = summary.samples[0].downloads.as_ref().unwrap();
    assert_eq!(downloads.succeeded, 1);
    assert_eq!(downloads.failed, 1);
    let mut merge_inputs = fs::read_dir(&raw_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    merge_inputs.sort();
    assert_eq!(merge_inputs, vec!["a_1.fastq.gz"]);
}

/// Every tool call fails to start because the program is not installed.
struct NothingInstalled {
    calls: Mutex<usize>,
}

impl ToolRunner for NothingInstalled {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, KiraError> {
        *self.calls.lock().unwrap() += 1;
        Err(KiraError::MissingTool(invocation.program.display().to_string()))
    }
}

#[test]
fn fatal_error_inside_a_sample_aborts_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let project = config.require_project().unwrap().clone();
    let layout = Layout::new(&config.raw_dir, &config.output_dir, &project).unwrap();
    let runner = NothingInstalled {
        calls: Mutex::new(0),
    };
    let report = "sample_accession\tsubmitted_ftp\n\
                  SAMPLEA\tftp.example.org/a/a_1.fastq.gz\n\
                  SAMPLEB\tftp.example.org/b/b_1.fastq.gz\n";
    let samples = SampleOrchestrator::new(&config, layout, FakeTransport::new(None), &runner);
    let orchestrator =
        ProjectOrchestrator::new(project, FixedReport(Ok(report.to_string())), samples);

    let result = orchestrator.run();

    assert_matches!(result, Err(KiraError::MissingTool(_)));
    // SAMPLEB is never attempted
    assert_eq!(*runner.calls.lock().unwrap(), 1);
    assert!(!temp.path().join("raw/PRJEB19970/SAMPLEB").exists());
}

#[test]
fn nothing_downloaded_skips_before_merge() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(Some("example.org"));
    let runner = Recorder::new(None);

    let summary = orchestrator(&config, Ok(REPORT.to_string()), &transport, &runner)
        .run()
        .unwrap();

    assert_eq!(summary.samples[0].state, SampleState::Skipped);
    assert_eq!(summary.samples[0].last_stage, None);
    assert!(runner.calls.lock().unwrap().is_empty());
    assert_matches!(
        summary.verdict(SkipPolicy::FailWhenAllSkipped),
        Err(KiraError::AllSamplesSkipped(1))
    );
    assert!(summary.verdict(SkipPolicy::Tolerate).is_ok());
}

#[test]
fn failed_analysis_keeps_sample_done() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(None);
    let runner = Recorder::new(Some("bamqc"));

    let summary = orchestrator(&config, Ok(REPORT.to_string()), &transport, &runner)
        .run()
        .unwrap();

    let sample = &summary.samples[0];
    assert_eq!(sample.state, SampleState::Done);
    let failed = sample
        .analyses
        .iter()
        .filter(|analysis| analysis.error.is_some())
        .count();
    assert_eq!(failed, 1);
    assert_eq!(sample.analyses.len(), 3);
}

#[test]
fn metadata_failure_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(None);
    let runner = Recorder::new(None);

    let result = orchestrator(
        &config,
        Err("timed out".to_string()),
        &transport,
        &runner,
    )
    .run();

    assert_matches!(result, Err(KiraError::MetadataHttp(_)));
    assert!(transport.fetched.lock().unwrap().is_empty());
    assert!(!temp.path().join("raw").exists());
}

#[test]
fn header_only_report_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let transport = FakeTransport::new(None);
    let runner = Recorder::new(None);

    let result = orchestrator(
        &config,
        Ok("sample_accession\tsubmitted_ftp\n".to_string()),
        &transport,
        &runner,
    )
    .run();

    assert_matches!(result, Err(KiraError::IndexParse(_)));
}
