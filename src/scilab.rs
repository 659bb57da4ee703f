//! Scilab evaluator.
//!
//! Each run writes three files into the sandbox: the learner's submission,
//! the test case's reference script, and a generated driver that loads both
//! under `errcatch`. The interpreter is `scilab-cli` in non-interactive mode.
//!
//! # Output classification
//!
//! Rules are checked in order; the first match wins.
//!
//! | # | Condition                                              | Verdict                    |
//! |---|--------------------------------------------------------|----------------------------|
//! | 1 | any line contains `!--error`                           | `CompileOrSyntaxError`, raw text |
//! | 2 | exit status 5, or no output and exit status 0          | pass                       |
//! | 3 | exit status 3 (or `Message` present) and the cleaned diagnostic spans several lines | `AssertionFailure`, `Message` + non-blank lines |
//! | 4 | anything else                                          | `IncorrectOutput`, raw text |
//!
//! Reference scripts follow the convention of calling `exit(5)` when every
//! check holds and `exit(3)` after `disp`-ing what went wrong. An error raised
//! inside the reference script is caught by the driver and reported the same
//! way as a failed check.

use crate::{
    config::{EngineConfig, ResourceLimits},
    engine::{load_reference, FailureKind, Invocation, LanguageEvaluator, Verdict},
    errors::{GraderError, Result},
    model::{TestCase, TestCaseKind},
    registry::Language,
    timeout::ExecutionOutcome,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SCILAB_BINARY: &str = "scilab-cli";

pub const SUBMISSION_FILE: &str = "submission.sci";
pub const REFERENCE_FILE: &str = "reference.sce";
pub const DRIVER_FILE: &str = "driver.sce";
const SCIHOME_DIR: &str = ".scihome";

/// Exit status of a reference script whose checks all held.
pub const PASS_EXIT_CODE: i32 = 5;
/// Exit status of a reference script that reported a failed check.
pub const FAIL_EXIT_CODE: i32 = 3;
/// Exit status the driver uses when the submission does not load.
pub const LOAD_ERROR_EXIT_CODE: i32 = 2;

/// Interpreter error idiom, also printed by the driver on load failures.
pub const ERROR_MARKER: &str = "!--error";
/// Header line of an assertion diagnostic.
pub const ASSERTION_MARKER: &str = "Message";

const EXIT_REMOVED_NOTICE: &str =
    "NOTE: exit/quit commands are not allowed and were removed from your code.\n";

/// Scilab evaluator driving an external `scilab-cli`.
pub struct ScilabEvaluator {
    interpreter: Option<PathBuf>,
    limits: ResourceLimits,
}

impl ScilabEvaluator {
    /// Create with an explicit interpreter path
    pub fn with_interpreter_path(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(GraderError::InterpreterNotFound(path.display().to_string()));
        }

        Ok(Self {
            interpreter: Some(path),
            limits: ResourceLimits::default(),
        })
    }

    /// Build from engine configuration. A missing interpreter is not an error
    /// here; it surfaces as a launch failure when a test case runs.
    pub fn from_config(config: &EngineConfig) -> Self {
        let interpreter = config
            .scilab_path
            .clone()
            .or_else(|| which::which(SCILAB_BINARY).ok());

        Self {
            interpreter,
            limits: config.limits.clone(),
        }
    }

    pub fn interpreter_path(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    fn generate_driver(&self, kind: TestCaseKind, source_code: &str) -> String {
        let mut driver = String::from("lines(0);\nmode(-1);\nfuncprot(0);\n");

        match kind {
            TestCaseKind::Standalone => {
                driver.push_str(&load_submission_block());
                driver.push_str(&run_reference_block());
            }
            TestCaseKind::Hook => {
                driver.push_str(&format!(
                    "user_answer = {};\nuser_answer = strcat(user_answer, ascii(10));\n",
                    scilab_string_column(source_code)
                ));
                driver.push_str(&run_reference_block());
            }
            TestCaseKind::StdinDriven => {
                driver.push_str(&load_submission_block());
            }
        }

        driver.push_str("exit(0);\n");
        driver
    }
}

fn load_submission_block() -> String {
    format!(
        r#"ierr = exec("{file}", "errcatch", -1);
if ierr <> 0 then
  mprintf("{marker} %d\n", ierr);
  mprintf("%s\n", lasterror());
  exit({code});
end
"#,
        file = SUBMISSION_FILE,
        marker = ERROR_MARKER,
        code = LOAD_ERROR_EXIT_CODE
    )
}

fn run_reference_block() -> String {
    format!(
        r#"ierr = exec("{file}", "errcatch", -1);
if ierr <> 0 then
  mprintf("%s\n", lasterror());
  exit({code});
end
"#,
        file = REFERENCE_FILE,
        code = FAIL_EXIT_CODE
    )
}

/// Quote `text` as a Scilab column vector of strings, one row per line.
fn scilab_string_column(text: &str) -> String {
    let rows: Vec<String> = text
        .lines()
        .map(|line| format!("\"{}\"", line.replace('"', "\"\"").replace('\'', "''")))
        .collect();
    if rows.is_empty() {
        "[\"\"]".to_string()
    } else {
        format!("[{}]", rows.join("; "))
    }
}

/// Remove `exit`/`quit` calls (and the rest of their line) from a submission.
/// Returns the cleaned code and the number of lines changed.
pub fn strip_exit_calls(code: &str) -> (String, usize) {
    let mut removed = 0;
    let cleaned: Vec<&str> = code
        .lines()
        .map(|line| {
            let cut = [find_word(line, "exit"), find_word(line, "quit")]
                .into_iter()
                .flatten()
                .min();
            match cut {
                Some(at) => {
                    removed += 1;
                    &line[..at]
                }
                None => line,
            }
        })
        .collect();
    (cleaned.join("\n"), removed)
}

fn find_word(line: &str, word: &str) -> Option<usize> {
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let bytes = line.as_bytes();
    let mut start = 0;
    while let Some(pos) = line[start..].find(word) {
        let at = start + pos;
        let end = at + word.len();
        let before_ok = at == 0 || !is_ident(bytes[at - 1]);
        let after_ok = end >= bytes.len() || !is_ident(bytes[end]);
        if before_ok && after_ok {
            return Some(at);
        }
        start = end;
    }
    None
}

/// Reduce a failing run's output to a `Message` header followed by its
/// non-blank lines, each trimmed.
pub fn clean_diagnostic(raw: &str) -> String {
    let mut lines = raw.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    let mut diagnostic = String::from(ASSERTION_MARKER);
    if lines.peek() == Some(&ASSERTION_MARKER) {
        lines.next();
    }
    for line in lines {
        diagnostic.push('\n');
        diagnostic.push_str(line);
    }
    diagnostic
}

/// Apply the classification table to a reference-script run.
pub fn classify_output(raw: &str, exit_status: Option<i32>) -> Verdict {
    if raw.lines().any(|line| line.contains(ERROR_MARKER)) {
        return Verdict::fail(FailureKind::CompileOrSyntaxError, raw);
    }

    if exit_status == Some(PASS_EXIT_CODE) || (exit_status == Some(0) && raw.trim().is_empty()) {
        return Verdict::Pass;
    }

    if exit_status == Some(FAIL_EXIT_CODE) || raw.contains(ASSERTION_MARKER) {
        let diagnostic = clean_diagnostic(raw);
        if diagnostic.lines().count() > 1 {
            return Verdict::fail(FailureKind::AssertionFailure, diagnostic);
        }
    }

    if raw.trim().is_empty() {
        let status = exit_status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Verdict::fail(
            FailureKind::IncorrectOutput,
            format!("Incorrect answer (check exited with status {})\n", status),
        );
    }
    Verdict::fail(FailureKind::IncorrectOutput, raw)
}

/// Compare a stdin-driven run's stdout against the expected text, ignoring
/// trailing whitespace and surrounding blank lines.
fn compare_stdout(outcome: &ExecutionOutcome, expected: &str) -> Verdict {
    let raw = outcome.raw_output();
    if raw.lines().any(|line| line.contains(ERROR_MARKER)) {
        return Verdict::fail(FailureKind::CompileOrSyntaxError, raw);
    }

    let got = normalize_lines(&outcome.stdout);
    let want = normalize_lines(expected);
    if got == want {
        return Verdict::Pass;
    }

    Verdict::fail(
        FailureKind::IncorrectOutput,
        format!(
            "Incorrect answer\nExpected output:\n{}\nGot:\n{}\n",
            want.join("\n"),
            got.join("\n")
        ),
    )
}

fn normalize_lines(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].to_vec(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl LanguageEvaluator for ScilabEvaluator {
    fn language(&self) -> Language {
        Language::Scilab
    }

    async fn prepare(
        &self,
        source_code: &str,
        test_case: &TestCase,
        sandbox: &Path,
    ) -> Result<Invocation> {
        let program = self
            .interpreter
            .clone()
            .ok_or_else(|| GraderError::InterpreterNotFound(SCILAB_BINARY.to_string()))?;

        let (cleaned, removed) = strip_exit_calls(source_code);
        tokio::fs::write(sandbox.join(SUBMISSION_FILE), &cleaned).await?;

        if test_case.kind != TestCaseKind::StdinDriven {
            let reference = load_reference(&test_case.reference, sandbox).await?;
            tokio::fs::write(sandbox.join(REFERENCE_FILE), reference).await?;
        }

        let driver = self.generate_driver(test_case.kind, source_code);
        tokio::fs::write(sandbox.join(DRIVER_FILE), &driver).await?;
        debug!("[SCILAB] Driver for {:?} test case:\n{}", test_case.kind, driver);

        let scihome = sandbox.join(SCIHOME_DIR);
        tokio::fs::create_dir_all(&scihome).await?;

        let threads = self.limits.max_threads.to_string();
        let mut invocation = Invocation::new(program, sandbox)
            .arg("-nwni")
            .arg("-nb")
            .arg("-f")
            .arg(DRIVER_FILE)
            .env("SCIHOME", scihome.to_string_lossy())
            .env("OMP_NUM_THREADS", threads.as_str())
            .env("OPENBLAS_NUM_THREADS", threads.as_str())
            .env("MKL_NUM_THREADS", threads);

        if test_case.kind == TestCaseKind::StdinDriven {
            invocation.stdin = Some(test_case.expected_input.clone().unwrap_or_default());
        }
        if removed > 0 {
            info!("[SCILAB] Removed exit/quit from {} line(s) of submission", removed);
            invocation.notice = Some(EXIT_REMOVED_NOTICE.to_string());
        }

        Ok(invocation)
    }

    fn interpret(&self, test_case: &TestCase, outcome: &ExecutionOutcome) -> Verdict {
        match (test_case.kind, test_case.expected_output.as_deref()) {
            (TestCaseKind::StdinDriven, Some(expected)) => compare_stdout(outcome, expected),
            _ => classify_output(&outcome.raw_output(), outcome.exit_status),
        }
    }
}
