use grader::{Dispatcher, EngineConfig, EvaluationOptions, EvaluationRequest};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone)]
struct WorkerConfig {
    engine: EngineConfig,
}

impl WorkerConfig {
    fn from_env_and_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut engine = EngineConfig::from_env();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--timeout" => {
                    match args.get(i + 1).and_then(|v| v.parse::<u64>().ok()) {
                        Some(secs) if secs > 0 => engine.timeout = Duration::from_secs(secs),
                        _ => tracing::warn!("ignoring invalid --timeout value"),
                    }
                    i += 2;
                }
                "--scilab-path" => {
                    if let Some(v) = args.get(i + 1) {
                        engine.scilab_path = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--workspace-base" => {
                    if let Some(v) = args.get(i + 1) {
                        engine.workspace_base = PathBuf::from(v);
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }

        Self { engine }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "grader_worker=info,grader=info".to_string()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = WorkerConfig::from_env_and_args();
    tracing::info!(
        "grader-worker starting (timeout={:?}, workspace_base={:?}, scilab={:?})",
        cfg.engine.timeout,
        cfg.engine.workspace_base,
        cfg.engine.scilab_path
    );

    let dispatcher = Dispatcher::new(cfg.engine);

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_line(&dispatcher, line).await;
        let s = serde_json::to_string(&response)?;
        stdout.write_all(s.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Parse one request line and evaluate it. Each line may carry a
/// `timeoutSeconds` field overriding the worker's default for that request.
async fn handle_line(dispatcher: &Dispatcher, line: &str) -> Value {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("invalid request line: {} | err={}", line, e);
            return fatal_response(format!("Invalid request: {}", e));
        }
    };

    let options = EvaluationOptions {
        timeout: parsed
            .get("timeoutSeconds")
            .and_then(|v| v.as_u64())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    };

    let request: EvaluationRequest = match serde_json::from_value(parsed) {
        Ok(r) => r,
        Err(e) => return fatal_response(format!("Invalid request: {}", e)),
    };

    match dispatcher.evaluate_with(&request, &options).await {
        Ok(result) => serde_json::to_value(&result)
            .unwrap_or_else(|e| fatal_response(format!("Could not encode result: {}", e))),
        Err(e) => fatal_response(e.to_string()),
    }
}

fn fatal_response(message: String) -> Value {
    json!({
        "success": false,
        "error": message,
        "fatal": true
    })
}
