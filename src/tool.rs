use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tracing::{debug, error};

use crate::config::ToolPaths;
use crate::domain::SampleAccession;
use crate::error::KiraError;

/// One external command: program plus argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn path_arg(self, value: impl AsRef<Path>) -> Self {
        let value = value.as_ref().to_string_lossy().to_string();
        self.arg(value)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn status_label(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

/// Process boundary. Returns the captured output whatever the exit status;
/// `Err` only when the process could not be started at all.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, KiraError>;
}

impl<R: ToolRunner + ?Sized> ToolRunner for &R {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, KiraError> {
        (**self).run(invocation)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, KiraError> {
        debug!(command = %invocation, "spawning");
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .output()
            .map_err(|err| {
                KiraError::MissingTool(format!("{}: {err}", invocation.program.display()))
            })?;
        Ok(ToolOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Runs a sample stage; a non-zero exit becomes a `StageInvocation` error
/// carrying the captured stderr. Fatal runner errors (a tool that is not
/// installed) pass through untouched, since every sample would hit them.
pub fn run_stage<R: ToolRunner + ?Sized>(
    runner: &R,
    sample: &SampleAccession,
    stage: &str,
    invocation: &Invocation,
) -> Result<ToolOutput, KiraError> {
    let output = match runner.run(invocation) {
        Ok(output) => output,
        Err(err) => {
            error!(sample = %sample, stage, "could not start {}: {err}", invocation.program.display());
            if err.is_fatal() {
                return Err(err);
            }
            return Err(KiraError::StageInvocation {
                sample: sample.to_string(),
                stage: stage.to_string(),
                status: "not started".to_string(),
                stderr: err.to_string(),
            });
        }
    };
    if output.success {
        return Ok(output);
    }

    let stderr = if output.stderr.is_empty() {
        format!("command failed: {}", invocation.program.display())
    } else {
        output.stderr.clone()
    };
    error!(
        sample = %sample,
        stage,
        status = %output.status_label(),
        stdout = %output.stdout,
        "command failed: {invocation}"
    );
    Err(KiraError::StageInvocation {
        sample: sample.to_string(),
        stage: stage.to_string(),
        status: output.status_label(),
        stderr,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub configured: String,
    pub resolved: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolReport {
    pub tools: Vec<ToolInfo>,
    pub missing: Vec<String>,
}

/// Resolves every configured executable and file. Versions are probed
/// with `--version`; tools that do not support it simply report none.
pub fn inspect_tools(tools: &ToolPaths) -> ToolReport {
    let mut report = ToolReport {
        tools: Vec::new(),
        missing: Vec::new(),
    };
    for (name, path) in tools.executables() {
        let resolved = find_executable(path);
        let version = resolved
            .as_ref()
            .and_then(|path| tool_version(path, &["--version"]));
        if resolved.is_none() {
            report.missing.push(name.to_string());
        }
        report.tools.push(ToolInfo {
            name: name.to_string(),
            configured: path.display().to_string(),
            resolved: resolved.map(|path| path.display().to_string()),
            version,
        });
    }
    for (name, path) in tools.files() {
        let resolved = path.is_file().then(|| path.display().to_string());
        if resolved.is_none() {
            report.missing.push(name.to_string());
        }
        report.tools.push(ToolInfo {
            name: name.to_string(),
            configured: path.display().to_string(),
            resolved,
            version: None,
        });
    }
    report
}

/// A bare name is searched on `PATH`; anything with a separator is taken
/// as a path.
pub fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let exe = dir.join(program).with_extension("exe");
        if exe.is_file() {
            return Some(exe);
        }
        let plain = dir.join(program);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim().to_string();
    if first.is_empty() { None } else { Some(first) }
}
