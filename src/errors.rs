use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraderError>;

#[derive(Error, Debug)]
pub enum GraderError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Interpreter not installed or not found in PATH: {0}")]
    InterpreterNotFound(String),

    #[error("Failed to launch interpreter: {0}")]
    ProcessLaunch(String),

    #[error("Could not allocate sandbox: {0}")]
    SandboxAllocation(String),

    #[error("Invalid evaluation request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraderError {
    /// Whether this error aborts the whole evaluation instead of becoming a
    /// failing verdict.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraderError::UnsupportedLanguage(_)
                | GraderError::InvalidRequest(_)
                | GraderError::SandboxAllocation(_)
        )
    }
}
