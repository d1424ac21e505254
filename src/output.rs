use std::io::{self, Write};

use serde::Serialize;

use crate::domain::FileIndex;
use crate::project::RunSummary;
use crate::sample::SampleState;
use crate::tool::ToolReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_index(index: &FileIndex) -> io::Result<()> {
        Self::print_json(index)
    }

    pub fn print_tools(report: &ToolReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub fn render_run_summary(summary: &RunSummary) -> String {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    let mut out = String::new();
    out.push_str(&format!("{cyan}KIRA-EP {} summary{reset}\n", summary.project));
    out.push_str(&format!("{green}done: {}{reset}\n", summary.done));
    out.push_str(&format!("{yellow}skipped: {}{reset}\n", summary.skipped));
    for report in &summary.samples {
        match report.state {
            SampleState::Done => {
                let failed = report
                    .analyses
                    .iter()
                    .filter(|analysis| analysis.error.is_some())
                    .map(|analysis| analysis.analysis.name())
                    .collect::<Vec<_>>();
                if failed.is_empty() {
                    out.push_str(&format!("{green}  {} done{reset}\n", report.sample));
                } else {
                    out.push_str(&format!(
                        "{green}  {} done{reset} {yellow}(failed analyses: {}){reset}\n",
                        report.sample,
                        failed.join(", ")
                    ));
                }
            }
            _ => {
                out.push_str(&format!(
                    "{yellow}  {} skipped after {}: {}{reset}\n",
                    report.sample,
                    report.last_stage.as_deref().unwrap_or("nothing"),
                    report.failure.as_deref().unwrap_or("unknown failure")
                ));
            }
        }
    }
    out
}

pub fn print_run_summary(summary: &RunSummary) {
    print!("{}", render_run_summary(summary));
}
