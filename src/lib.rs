//! Grading engine for learner-submitted code.
//!
//! A [`Dispatcher`] takes an [`EvaluationRequest`], picks the evaluator for
//! its language, runs every test case inside a throwaway sandbox directory
//! under a wall-clock deadline, and folds the per-test verdicts into one
//! [`EvaluationResult`].
//!
//! # Example
//! ```rust,no_run
//! use grader::{Dispatcher, EngineConfig, EvaluationRequest, TestCase};
//!
//! # async fn run() -> grader::Result<()> {
//! let dispatcher = Dispatcher::new(EngineConfig::from_env());
//! let request = EvaluationRequest::new(
//!     "scilab",
//!     "funcprot(0)\nfunction[c]=add(a,b)\n\tc=a+b;\nendfunction",
//! )
//! .with_test_case(TestCase::standalone("scilab_files/test_add.sce", 0.0));
//!
//! let result = dispatcher.evaluate(&request).await?;
//! println!("{}: {}", result.success, result.error);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
mod errors;
pub mod model;
pub mod registry;
pub mod sandbox;
pub mod scilab;
pub mod timeout;

pub use config::{EngineConfig, ResourceLimits};
pub use dispatcher::{Dispatcher, EvaluationOptions};
pub use engine::{FailureKind, Invocation, LanguageEvaluator, Verdict};
pub use errors::{GraderError, Result};
pub use model::{
    EvaluationRequest, EvaluationResult, Metadata, TestCase, TestCaseKind, CORRECT_ANSWER,
};
pub use registry::Language;
pub use sandbox::{Sandbox, SandboxManager};
pub use scilab::ScilabEvaluator;
pub use timeout::{timeout_message, ExecutionOutcome, TimeoutGuard};
