#![cfg(unix)]

use grader::{
    Dispatcher, EngineConfig, EvaluationOptions, EvaluationRequest, ResourceLimits, TestCase,
    CORRECT_ANSWER,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const CORRECT: &str = "funcprot(0)\nfunction[c]=add(a,b)\n\tc=a+b;\nendfunction";
const WRONG: &str = "funcprot(0)\nfunction[c]=add(a,b)\n\tc=a-b;\nendfunction";
const SYNTAX_ERROR: &str = "funcprot(0)\nfunction[c]=add(a,b)\n\tc=a+b;\ndis(\tendfunction";
const INFINITE_LOOP: &str = "funcprot(0)\nfunction[c]=add(a,b)\n\tc=a;\nwhile(1==1)\nend\nendfunction";
const BUSY_LOOP: &str = "funcprot(0)\nfunction[c]=add(a,b)\n\tc=a;\nwhile(%t)\nend\nendfunction";

fn test_add_reference() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/scilab_files/test_add.sce").to_string()
}

/// Executable copy of the fake interpreter, written once per test binary.
fn fake_scilab() -> &'static Path {
    static FAKE: OnceLock<PathBuf> = OnceLock::new();
    FAKE.get_or_init(|| {
        let source = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake-scilab-cli.sh");
        let dest = Path::new(env!("CARGO_TARGET_TMPDIR")).join("fake-scilab-cli");
        std::fs::copy(source, &dest).unwrap();
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755)).unwrap();
        dest
    })
}

fn dispatcher_with(interpreter: &Path, base: &Path, timeout: Duration) -> Dispatcher {
    Dispatcher::new(
        EngineConfig::default()
            .with_scilab_path(interpreter.to_path_buf())
            .with_workspace_base(base.to_path_buf())
            .with_timeout(timeout),
    )
}

fn fake_dispatcher(base: &Path) -> Dispatcher {
    dispatcher_with(fake_scilab(), base, Duration::from_secs(9))
}

fn request(source: &str) -> EvaluationRequest {
    EvaluationRequest::new("scilab", source).with_test_case(TestCase::standalone(test_add_reference(), 0.0))
}

fn assert_no_sandboxes(base: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(base)
        .map(|d| d.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "sandboxes left behind: {:?}", leftovers);
}

#[tokio::test]
async fn test_correct_answer() {
    let base = tempfile::tempdir().unwrap();
    let result = fake_dispatcher(base.path()).evaluate(&request(CORRECT)).await.unwrap();

    assert!(result.success);
    assert_eq!(result.error, CORRECT_ANSWER);
    assert_eq!(result.weight_earned, None);
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_error() {
    let base = tempfile::tempdir().unwrap();
    let result = fake_dispatcher(base.path())
        .evaluate(&request(SYNTAX_ERROR))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.contains("error"));
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_incorrect_answer() {
    let base = tempfile::tempdir().unwrap();
    let result = fake_dispatcher(base.path()).evaluate(&request(WRONG)).await.unwrap();

    assert!(!result.success);
    assert!(result.error.contains("Message"));
    assert!(result.error.lines().count() > 1);
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_infinite_loop() {
    let base = tempfile::tempdir().unwrap();
    let dispatcher = fake_dispatcher(base.path());

    let start = Instant::now();
    let result = dispatcher
        .evaluate_with(
            &request(INFINITE_LOOP),
            &EvaluationOptions::with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.error,
        "Code took more than 1 seconds to run. You probably have an infinite loop in your code."
    );
    assert!(start.elapsed() < Duration::from_secs(9));
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_busy_loop_times_out_when_cpu_limit_is_below_deadline() {
    let base = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default()
        .with_scilab_path(fake_scilab().to_path_buf())
        .with_workspace_base(base.path().to_path_buf());
    config.limits = ResourceLimits {
        cpu_seconds: 1,
        ..ResourceLimits::default()
    };
    let dispatcher = Dispatcher::new(config);

    let result = dispatcher
        .evaluate_with(
            &request(BUSY_LOOP),
            &EvaluationOptions::with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.error,
        "Code took more than 2 seconds to run. You probably have an infinite loop in your code."
    );
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_same_request_twice_gives_same_verdict() {
    let base = tempfile::tempdir().unwrap();
    let dispatcher = fake_dispatcher(base.path());
    let wrong = request(WRONG);

    let first = dispatcher.evaluate(&wrong).await.unwrap();
    let second = dispatcher.evaluate(&wrong).await.unwrap();
    assert_eq!(first, second);
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_first_failure_short_circuits() {
    let base = tempfile::tempdir().unwrap();
    let request = EvaluationRequest::new("scilab", CORRECT)
        .with_test_case(TestCase::standalone(test_add_reference(), 1.0))
        .with_test_case(TestCase::standalone("always_fail = %t;\nexit(3);", 1.0))
        .with_test_case(TestCase::standalone(test_add_reference(), 1.0));

    let result = fake_dispatcher(base.path()).evaluate(&request).await.unwrap();
    assert!(!result.success);
    assert!(result.error.starts_with("Message\nInput submitted 1 and 1"));
    assert_eq!(result.weight_earned, None);
}

#[tokio::test]
async fn test_partial_grading_sums_passing_weights() {
    let base = tempfile::tempdir().unwrap();
    let request = EvaluationRequest::new("scilab", CORRECT)
        .with_partial_grading(true)
        .with_test_case(TestCase::standalone(test_add_reference(), 1.0))
        .with_test_case(TestCase::standalone("always_fail = %t;\nexit(3);", 2.5))
        .with_test_case(TestCase::standalone(test_add_reference(), 2.0));

    let result = fake_dispatcher(base.path()).evaluate(&request).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.weight_earned, Some(3.0));
    assert!(result.error.contains("Message"));
    assert!(result.error.ends_with('\n'));
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_partial_grading_full_credit() {
    let base = tempfile::tempdir().unwrap();
    let request = EvaluationRequest::new("scilab", CORRECT)
        .with_partial_grading(true)
        .with_test_case(TestCase::standalone(test_add_reference(), 1.5))
        .with_test_case(TestCase::hook("answer = user_answer;\nexit(5);", 0.5));

    let result = fake_dispatcher(base.path()).evaluate(&request).await.unwrap();
    assert!(result.success);
    assert_eq!(result.error, CORRECT_ANSWER);
    assert_eq!(result.weight_earned, Some(2.0));
}

#[tokio::test]
async fn test_stdin_driven_case() {
    let base = tempfile::tempdir().unwrap();
    let dispatcher = fake_dispatcher(base.path());

    let passing = EvaluationRequest::new("scilab", "a = input(\"\");\ndisp(a);")
        .with_test_case(TestCase::stdin("42\n", "42", 1.0));
    let result = dispatcher.evaluate(&passing).await.unwrap();
    assert!(result.success, "{}", result.error);

    let failing = EvaluationRequest::new("scilab", "a = input(\"\");\ndisp(a);")
        .with_test_case(TestCase::stdin("41\n", "42", 1.0));
    let result = dispatcher.evaluate(&failing).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error, "Incorrect answer\nExpected output:\n42\nGot:\n41\n");
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_exit_calls_are_removed_with_notice() {
    let base = tempfile::tempdir().unwrap();
    let source = format!("{}\nexit(5)", WRONG);

    let result = fake_dispatcher(base.path()).evaluate(&request(&source)).await.unwrap();
    assert!(!result.success);
    assert!(result.error.starts_with("NOTE: exit/quit commands"));
    assert!(result.error.contains("Message"));
}

#[tokio::test]
async fn test_auxiliary_files_are_visible_to_reference() {
    let base = tempfile::tempdir().unwrap();
    let files = tempfile::tempdir().unwrap();
    let check = files.path().join("check_add.sce");
    std::fs::copy(test_add_reference(), &check).unwrap();

    // The reference names the auxiliary file by its sandbox-relative path
    let request = EvaluationRequest::new("scilab", CORRECT)
        .with_auxiliary_file(&check)
        .with_test_case(TestCase::standalone("check_add.sce", 1.0));

    let result = fake_dispatcher(base.path()).evaluate(&request).await.unwrap();
    assert!(result.success, "{}", result.error);
    assert_no_sandboxes(base.path());
}

#[tokio::test]
async fn test_concurrent_evaluations_use_separate_sandboxes() {
    let base = tempfile::tempdir().unwrap();
    let dispatcher = fake_dispatcher(base.path());
    let good = request(CORRECT);
    let bad = request(WRONG);

    let (a, b) = tokio::join!(dispatcher.evaluate(&good), dispatcher.evaluate(&bad));
    assert!(a.unwrap().success);
    assert!(!b.unwrap().success);
    assert_no_sandboxes(base.path());
}

// The same scenarios against a real interpreter, when one is installed.

fn real_scilab() -> Option<PathBuf> {
    which::which("scilab-cli").ok()
}

#[tokio::test]
async fn test_real_scilab_scenarios() {
    let Some(scilab) = real_scilab() else {
        eprintln!("scilab-cli not found, skipping real interpreter checks");
        return;
    };
    let base = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with(&scilab, base.path(), Duration::from_secs(30));

    let result = dispatcher.evaluate(&request(CORRECT)).await.unwrap();
    assert_eq!(result.error, CORRECT_ANSWER);
    assert!(result.success);

    let result = dispatcher.evaluate(&request(SYNTAX_ERROR)).await.unwrap();
    assert!(!result.success);
    assert!(result.error.contains("error"));

    let result = dispatcher.evaluate(&request(WRONG)).await.unwrap();
    assert!(!result.success);
    assert!(result.error.contains("Message"));
    assert!(result.error.lines().count() > 1);

    let result = dispatcher
        .evaluate_with(
            &request(INFINITE_LOOP),
            &EvaluationOptions::with_timeout(Duration::from_secs(4)),
        )
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(
        result.error,
        "Code took more than 4 seconds to run. You probably have an infinite loop in your code."
    );
    assert_no_sandboxes(base.path());
}
