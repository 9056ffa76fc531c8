//! Error types for the Rook migration toolkit
//!
//! Provides structured error types for the toolbox gateway, the health
//! monitor, the OSD inventory, the CephCluster patcher and the migration
//! controller.

use thiserror::Error;

/// Unified error type for the toolkit
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A lower-level failure annotated with the operation that was running
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("found {count} rook-ceph-tools pods, with names {names:?}, expected 1")]
    RunnerPods { count: usize, names: Vec<String> },

    #[error("unable to parse OSD number {value:?} of pod {pod:?}")]
    InvalidOsdLabel { pod: String, value: String },

    #[error("deployment {namespace}:{name} has scale {actual}, expected {expected}")]
    UnexpectedScale {
        namespace: String,
        name: String,
        actual: i32,
        expected: i32,
    },

    // =========================================================================
    // Toolbox Command Errors
    // =========================================================================
    #[error("failed to run {command:?} in {pod}: {reason}")]
    Exec {
        command: String,
        pod: String,
        reason: String,
    },

    #[error("failed to run {command:?} in {pod} with stderr {stderr:?} with exit code {exit_code}")]
    CommandExit {
        exit_code: i32,
        pod: String,
        command: String,
        stderr: String,
    },

    // =========================================================================
    // Wait Loop Errors
    // =========================================================================
    #[error("timed out waiting for {operation}{}", last_status_suffix(.last_status))]
    Timeout {
        operation: String,
        last_status: Option<String>,
    },

    #[error("cancelled while waiting for {operation}")]
    Cancelled { operation: String },

    #[error("failed to {operation} {attempts} times in a row: {source}")]
    RepeatedFailures {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("unable to parse output of {command:?}: {output:?}")]
    UnparseableOutput { command: String, output: String },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn last_status_suffix(last_status: &Option<String>) -> String {
    match last_status {
        Some(status) if !status.is_empty() => format!(", currently {:?}", status),
        _ => String::new(),
    }
}

/// Broad class of a failure, used by wait loops and by callers deciding
/// whether a re-run could succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// API call failed or output could not be decoded; worth polling again
    Transient,
    /// A wait loop exceeded its deadline
    Timeout,
    /// The caller cancelled the operation
    Cancelled,
    /// Structural misconfiguration; retrying cannot help
    Precondition,
    /// A toolbox command ran and exited non-zero
    CommandExit,
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Step { source, .. } => source.category(),

            Error::Kube(_)
            | Error::Exec { .. }
            | Error::JsonParse(_)
            | Error::UnparseableOutput { .. }
            | Error::Io(_)
            | Error::RepeatedFailures { .. } => ErrorCategory::Transient,

            Error::Timeout { .. } => ErrorCategory::Timeout,

            Error::Cancelled { .. } => ErrorCategory::Cancelled,

            Error::CommandExit { .. } => ErrorCategory::CommandExit,

            Error::ResourceNotFound { .. }
            | Error::RunnerPods { .. }
            | Error::InvalidOsdLabel { .. }
            | Error::UnexpectedScale { .. }
            | Error::Configuration(_)
            | Error::YamlParse(_)
            | Error::Internal(_) => ErrorCategory::Precondition,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Check if polling again could succeed; timeouts, cancellations and
    /// precondition failures are final
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::CommandExit
        )
    }

    /// Check if this error came from the caller cancelling
    pub fn is_cancelled(&self) -> bool {
        matches!(self.category(), ErrorCategory::Cancelled)
    }

    /// Strip `Step` wrappers and return the underlying error
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for the toolkit
pub type Result<T> = std::result::Result<T, Error>;

/// Annotate errors with the operation that produced them
pub trait ResultExt<T> {
    fn context(self, step: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, step: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, step: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Step {
            step: step.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F, S>(self, step: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Step {
            step: step().into(),
            source: Box::new(e.into()),
        })
    }
}
