use crate::{
    errors::{GraderError, Result},
    model::{TestCase, CORRECT_ANSWER},
    registry::Language,
    timeout::ExecutionOutcome,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// An external interpreter run, fully described and ready to spawn.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Interpreter executable
    pub program: PathBuf,
    /// Arguments passed to the interpreter
    pub args: Vec<String>,
    /// Directory the interpreter runs in (the sandbox)
    pub working_dir: PathBuf,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Text piped to the interpreter's stdin; stdin is closed when absent
    pub stdin: Option<String>,
    /// Note prepended to any failing diagnostic from this run
    pub notice: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
            stdin: None,
            notice: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Build the process command. Stdio wiring is left to the caller.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env);
        cmd
    }
}

/// Why a test case did not pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The interpreter rejected the submission outright
    CompileOrSyntaxError,
    /// The reference script's checks did not hold
    AssertionFailure,
    /// Generic mismatch
    IncorrectOutput,
    /// The interpreter could not be started
    ProcessLaunchError,
    /// The run exceeded its wall-clock budget
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::CompileOrSyntaxError => "compile/syntax error",
            FailureKind::AssertionFailure => "assertion failure",
            FailureKind::IncorrectOutput => "incorrect output",
            FailureKind::ProcessLaunchError => "process launch error",
            FailureKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { kind: FailureKind, message: String },
}

impl Verdict {
    pub fn fail(kind: FailureKind, message: impl Into<String>) -> Self {
        Verdict::Fail {
            kind,
            message: message.into(),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn message(&self) -> &str {
        match self {
            Verdict::Pass => CORRECT_ANSWER,
            Verdict::Fail { message, .. } => message,
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail { kind, .. } => Some(*kind),
        }
    }

    /// Prefix a failing message with `notice`; passing verdicts are unchanged.
    pub fn with_notice(self, notice: Option<&str>) -> Self {
        match (self, notice) {
            (Verdict::Fail { kind, message }, Some(notice)) => Verdict::Fail {
                kind,
                message: format!("{}{}", notice, message),
            },
            (verdict, _) => verdict,
        }
    }
}

/// Per-language strategy: materialise the run, then classify what it printed.
#[async_trait]
pub trait LanguageEvaluator: Send + Sync {
    /// Language handled by this evaluator
    fn language(&self) -> Language;

    /// Write the submission (and any generated driver) into `sandbox` and
    /// describe the interpreter run for `test_case`.
    async fn prepare(
        &self,
        source_code: &str,
        test_case: &TestCase,
        sandbox: &Path,
    ) -> Result<Invocation>;

    /// Turn raw process output into a verdict.
    fn interpret(&self, test_case: &TestCase, outcome: &ExecutionOutcome) -> Verdict;
}

/// Load a test case reference. A single line naming an existing file (inside
/// the sandbox, or relative to the working directory) is read from disk;
/// anything else is inline script text.
pub async fn load_reference(reference: &str, sandbox: &Path) -> Result<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || trimmed.contains('\n') {
        return Ok(reference.to_string());
    }

    let candidate = Path::new(trimmed);
    for path in [sandbox.join(candidate), candidate.to_path_buf()] {
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_file {
            return tokio::fs::read_to_string(&path).await.map_err(|e| {
                GraderError::InvalidRequest(format!(
                    "unreadable reference {}: {}",
                    path.display(),
                    e
                ))
            });
        }
    }

    Ok(reference.to_string())
}
