use crate::{
    config::EngineConfig,
    engine::{FailureKind, LanguageEvaluator, Verdict},
    errors::{GraderError, Result},
    model::{EvaluationRequest, EvaluationResult, TestCase, CORRECT_ANSWER},
    registry::{evaluator_for, Language},
    sandbox::{Sandbox, SandboxManager},
    timeout::{timeout_message, TimeoutGuard},
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WEIGHT_EPSILON: f64 = 1e-9;

/// Per-call overrides of the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EvaluationOptions {
    /// Replaces the configured timeout for this evaluation only
    pub timeout: Option<Duration>,
}

impl EvaluationOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Runs evaluation requests: picks the evaluator, owns the sandbox, guards
/// each run with the deadline and aggregates the verdicts.
pub struct Dispatcher {
    config: EngineConfig,
    sandboxes: SandboxManager,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Self {
        let sandboxes = SandboxManager::new(config.workspace_base.clone());
        Self { config, sandboxes }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate with the configured defaults.
    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult> {
        self.evaluate_with(request, &EvaluationOptions::default())
            .await
    }

    /// Evaluate a request. Grading failures come back as an
    /// `EvaluationResult`; only an unsupported language, a malformed request,
    /// or a sandbox that cannot be set up produce `Err`.
    pub async fn evaluate_with(
        &self,
        request: &EvaluationRequest,
        options: &EvaluationOptions,
    ) -> Result<EvaluationResult> {
        let language: Language = request.metadata.language.parse()?;
        request.validate()?;

        let evaluator = evaluator_for(language, &self.config);
        let guard = TimeoutGuard::new(
            options.timeout.unwrap_or(self.config.timeout),
            self.config.limits.clone(),
        );

        let sandbox = self.sandboxes.acquire()?;
        let result = self
            .run_in_sandbox(evaluator.as_ref(), request, &sandbox, &guard)
            .await;
        sandbox.release();

        match &result {
            Ok(result) => info!(
                "[DISPATCH] {} evaluation finished: success={} weight={:?}",
                language, result.success, result.weight_earned
            ),
            Err(e) => error!("[DISPATCH] {} evaluation aborted: {}", language, e),
        }
        result
    }

    async fn run_in_sandbox(
        &self,
        evaluator: &dyn LanguageEvaluator,
        request: &EvaluationRequest,
        sandbox: &Sandbox,
        guard: &TimeoutGuard,
    ) -> Result<EvaluationResult> {
        sandbox.materialize(request.auxiliary_files())?;

        let partial = request.metadata.partial_grading;
        let mut weight_earned = 0.0;
        let mut failures = String::new();

        for (index, test_case) in request.test_cases.iter().enumerate() {
            let verdict = self
                .run_test_case(evaluator, &request.metadata.source_code, test_case, sandbox, guard)
                .await?;
            debug!(
                "[DISPATCH] test case {} ({:?}): {:?}",
                index,
                test_case.kind,
                verdict.kind()
            );

            match verdict {
                Verdict::Pass => weight_earned += test_case.weight,
                Verdict::Fail { kind, message } => {
                    // A broken interpreter fails every remaining case the same way
                    if !partial || kind == FailureKind::ProcessLaunchError {
                        failures.push_str(&message);
                        return Ok(EvaluationResult {
                            success: false,
                            error: failures,
                            weight_earned: partial.then_some(weight_earned),
                        });
                    }
                    failures.push_str(&message);
                    if !failures.ends_with('\n') {
                        failures.push('\n');
                    }
                }
            }
        }

        if !partial {
            return Ok(EvaluationResult::correct());
        }

        let full_credit = (request.total_weight() - weight_earned).abs() < WEIGHT_EPSILON;
        let success = failures.is_empty() && full_credit;
        Ok(EvaluationResult {
            success,
            error: if failures.is_empty() {
                CORRECT_ANSWER.to_string()
            } else {
                failures
            },
            weight_earned: Some(weight_earned),
        })
    }

    async fn run_test_case(
        &self,
        evaluator: &dyn LanguageEvaluator,
        source_code: &str,
        test_case: &TestCase,
        sandbox: &Sandbox,
        guard: &TimeoutGuard,
    ) -> Result<Verdict> {
        let invocation = match evaluator
            .prepare(source_code, test_case, sandbox.path())
            .await
        {
            Ok(invocation) => invocation,
            Err(GraderError::Io(e)) => {
                return Err(GraderError::SandboxAllocation(format!(
                    "{}: {}",
                    sandbox.path().display(),
                    e
                )))
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("[DISPATCH] {} evaluator unusable: {}", evaluator.language(), e);
                return Ok(Verdict::fail(
                    FailureKind::ProcessLaunchError,
                    format!("Unable to run the {} interpreter: {}\n", evaluator.language(), e),
                ));
            }
        };

        let outcome = guard.with_timeout(&invocation).await;

        if outcome.timed_out {
            return Ok(Verdict::fail(
                FailureKind::Timeout,
                timeout_message(guard.duration()),
            ));
        }
        if let Some(e) = &outcome.process_error {
            warn!("[DISPATCH] {} interpreter failed to run: {}", evaluator.language(), e);
            return Ok(Verdict::fail(
                FailureKind::ProcessLaunchError,
                format!("Unable to run the {} interpreter: {}\n", evaluator.language(), e),
            ));
        }

        Ok(evaluator
            .interpret(test_case, &outcome)
            .with_notice(invocation.notice.as_deref()))
    }
}
