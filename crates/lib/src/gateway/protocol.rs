//! Gateway HTTP wire types (task request/response, error body, read query).

use serde::{Deserialize, Serialize};

use crate::exec::{ExecutionResult, Outcome};

/// Failure taxonomy reported in the `kind` field of every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InputError,
    TranslationError,
    SanitizationRejection,
    ExecutionTimeout,
    ExecutionFailure,
    LaunchError,
    PathEscape,
    NotFound,
    UnsupportedPathType,
    Unauthorized,
    InternalError,
}

/// Error body: `{ "error", "kind", "details"? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Task result: `{ status, command, stdout, stderr, exitCode, elapsedMs }`.
/// Also the body of execution failures, so the caller always sees what ran and what it printed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    /// success, failure, timeout or launch-error.
    pub status: String,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    /// Set on non-success outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl From<&ExecutionResult> for TaskResponse {
    fn from(r: &ExecutionResult) -> Self {
        let (exit_code, failure) = match &r.outcome {
            Outcome::Success => (Some(0), None),
            Outcome::Failure { code } => (
                *code,
                Some((
                    ErrorKind::ExecutionFailure,
                    match code {
                        Some(c) => format!("script exited with status {}", c),
                        None => "script was terminated by a signal".to_string(),
                    },
                )),
            ),
            Outcome::Timeout => (
                None,
                Some((
                    ErrorKind::ExecutionTimeout,
                    "script exceeded its time limit and was killed".to_string(),
                )),
            ),
            Outcome::LaunchError(msg) => (
                None,
                Some((ErrorKind::LaunchError, format!("script could not be started: {}", msg))),
            ),
        };
        let (kind, error) = match failure {
            Some((k, e)) => (Some(k), Some(e)),
            None => (None, None),
        };
        Self {
            status: r.outcome.as_str().to_string(),
            command: r.command.as_str().to_string(),
            stdout: r.stdout.clone(),
            stderr: r.stderr.clone(),
            exit_code,
            elapsed_ms: r.elapsed.as_millis() as u64,
            error,
            kind,
        }
    }
}

/// `?task=` on POST /run.
#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    pub task: Option<String>,
}

/// JSON body of POST /run: `{ "task": "..." }`.
#[derive(Debug, Default, Deserialize)]
pub struct RunBody {
    pub task: Option<String>,
}

/// `?path=` on GET /read.
#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    pub path: Option<String>,
}
