//! Request and result shapes exchanged with the caller.
//!
//! Field names follow the camelCase wire format; the snake_case names used by
//! older queue producers are accepted as aliases.

use crate::errors::{GraderError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Message returned for a fully passing submission.
pub const CORRECT_ANSWER: &str = "Correct answer\n";

/// One evaluation job: a submission plus the checks to run against it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub metadata: Metadata,
    #[serde(alias = "test_case_data", alias = "test_cases")]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(alias = "user_answer", alias = "source_code")]
    pub source_code: String,
    #[serde(default, alias = "file_paths", alias = "auxiliary_files")]
    pub auxiliary_files: Option<Vec<PathBuf>>,
    #[serde(default, alias = "partial_grading")]
    pub partial_grading: bool,
    pub language: String,
}

impl EvaluationRequest {
    pub fn new(language: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            metadata: Metadata {
                source_code: source_code.into(),
                auxiliary_files: None,
                partial_grading: false,
                language: language.into(),
            },
            test_cases: Vec::new(),
        }
    }

    pub fn with_test_case(mut self, test_case: TestCase) -> Self {
        self.test_cases.push(test_case);
        self
    }

    pub fn with_partial_grading(mut self, enabled: bool) -> Self {
        self.metadata.partial_grading = enabled;
        self
    }

    pub fn with_auxiliary_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata
            .auxiliary_files
            .get_or_insert_with(Vec::new)
            .push(path.into());
        self
    }

    pub fn auxiliary_files(&self) -> &[PathBuf] {
        self.metadata.auxiliary_files.as_deref().unwrap_or(&[])
    }

    /// Sum of every test case weight.
    pub fn total_weight(&self) -> f64 {
        self.test_cases.iter().map(|t| t.weight).sum()
    }

    /// Reject requests the engine cannot grade meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.test_cases.is_empty() {
            return Err(GraderError::InvalidRequest(
                "at least one test case is required".to_string(),
            ));
        }
        for (index, test_case) in self.test_cases.iter().enumerate() {
            if !test_case.weight.is_finite() || test_case.weight < 0.0 {
                return Err(GraderError::InvalidRequest(format!(
                    "test case {} has invalid weight {}",
                    index, test_case.weight
                )));
            }
            if test_case.kind == TestCaseKind::StdinDriven && test_case.expected_output.is_none()
            {
                return Err(GraderError::InvalidRequest(format!(
                    "stdin test case {} has no expected output",
                    index
                )));
            }
        }
        Ok(())
    }
}

/// How a test case's reference is combined with the submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseKind {
    /// Reference script loads the submission and asserts on its behaviour
    #[default]
    #[serde(alias = "standardtestcase")]
    Standalone,
    /// Submission runs as a script fed `expected_input` on stdin
    #[serde(alias = "stdin", alias = "stdiobasedtestcase")]
    StdinDriven,
    /// Reference script inspects the submission source directly
    #[serde(alias = "hooktestcase")]
    Hook,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Inline reference script, or a path to one
    #[serde(alias = "test_case")]
    pub reference: String,
    #[serde(default, alias = "test_case_type")]
    pub kind: TestCaseKind,
    #[serde(default)]
    pub weight: f64,
    #[serde(default, alias = "expected_input", skip_serializing_if = "Option::is_none")]
    pub expected_input: Option<String>,
    #[serde(default, alias = "expected_output", skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

impl TestCase {
    pub fn standalone(reference: impl Into<String>, weight: f64) -> Self {
        Self {
            reference: reference.into(),
            kind: TestCaseKind::Standalone,
            weight,
            expected_input: None,
            expected_output: None,
        }
    }

    pub fn hook(reference: impl Into<String>, weight: f64) -> Self {
        Self {
            kind: TestCaseKind::Hook,
            ..Self::standalone(reference, weight)
        }
    }

    pub fn stdin(
        input: impl Into<String>,
        expected_output: impl Into<String>,
        weight: f64,
    ) -> Self {
        Self {
            reference: String::new(),
            kind: TestCaseKind::StdinDriven,
            weight,
            expected_input: Some(input.into()),
            expected_output: Some(expected_output.into()),
        }
    }
}

/// Final verdict handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_earned: Option<f64>,
}

impl EvaluationResult {
    pub fn correct() -> Self {
        Self {
            success: true,
            error: CORRECT_ANSWER.to_string(),
            weight_earned: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            weight_earned: None,
        }
    }
}
