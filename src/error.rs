//! Error types and error handling strategy for dispatchkit.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Failures inside a [`Task`](crate::task::Task) are captured as a
//!   [`TaskError`] and handed to whoever reads the result
//! - Contract violations (wrong-thread loop access, re-entrant callbacks,
//!   lock-order conflicts in instrumented mutexes) panic in debug builds
//!   and are not checked in release builds
//! - Cancellation is advisory and never an error by itself
//!
//! # Error Categories
//!
//! - **Lifecycle**: task/controller state transitions that are not allowed
//! - **Locking**: lock-order or lock-discipline violations
//! - **Platform**: failures reported by the OS wait primitive
//! - **Config**: invalid configuration values
//! - **Internal**: bugs in this crate

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Lifecycle ===
    /// The operation is not allowed while a task is running.
    TaskRunning,
    /// A task controller was asked to run without a function.
    NotRunnable,
    /// A task result was read before the task completed.
    TaskPending,
    /// A task body panicked.
    TaskPanicked,
    /// Posted work was dropped before it produced a result.
    Abandoned,

    // === Locking ===
    /// Acquiring a lock would invert a previously observed lock order.
    LockOrderViolation,
    /// A lock was released out of order or by a thread that does not hold it.
    LockDiscipline,

    // === Platform ===
    /// The platform wait primitive or a socket registration failed.
    Io,
    /// A thread-affine loop operation was called from another thread.
    LoopNotOnThread,

    // === Config ===
    /// A configuration value could not be parsed or is out of range.
    InvalidConfig,

    // === Internal ===
    /// Internal error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::TaskRunning
            | Self::NotRunnable
            | Self::TaskPending
            | Self::TaskPanicked
            | Self::Abandoned => {
                ErrorCategory::Lifecycle
            }
            Self::LockOrderViolation | Self::LockDiscipline => ErrorCategory::Locking,
            Self::Io | Self::LoopNotOnThread => ErrorCategory::Platform,
            Self::InvalidConfig => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns true if retrying the same call later may succeed.
    ///
    /// Only lifecycle conflicts are transient: a running task eventually
    /// finishes and a pending result eventually becomes available.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TaskRunning | Self::TaskPending)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Task and controller lifecycle failures.
    Lifecycle,
    /// Lock verification failures.
    Locking,
    /// OS primitive and thread-affinity failures.
    Platform,
    /// Configuration failures.
    Config,
    /// Internal errors.
    Internal,
}

/// The main error type for dispatchkit operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if the operation was rejected because a task is running.
    #[must_use]
    pub const fn is_task_running(&self) -> bool {
        matches!(self.kind, ErrorKind::TaskRunning)
    }

    /// Creates a task-running error for the named operation.
    #[must_use]
    pub fn task_running(operation: &str) -> Self {
        Self::new(ErrorKind::TaskRunning)
            .with_message(format!("cannot {operation} while the task is running"))
    }

    /// Creates an invalid-config error.
    #[must_use]
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(detail)
    }

    /// Creates an I/O error wrapping the platform failure.
    #[must_use]
    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io)
            .with_message(context.to_string())
            .with_source(err)
    }

    /// Creates an internal error (bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// The captured failure of a [`Task`](crate::task::Task).
///
/// A task never drops its failure silently: the error is stored with the
/// task, delivered to completion subscribers, and returned to every reader
/// of [`Task::value`](crate::task::Task::value).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task body panicked; carries the panic message.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The result was read before the task completed.
    #[error("task has not completed")]
    Pending,
    /// The work was dropped, for example with its loop, before it ran.
    #[error("work was dropped before it completed")]
    Abandoned,
}

impl TaskError {
    /// Builds a [`TaskError::Panicked`] from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }
}

impl From<TaskError> for Error {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::Panicked(msg) => Self::new(ErrorKind::TaskPanicked).with_message(msg),
            TaskError::Pending => Self::new(ErrorKind::TaskPending),
            TaskError::Abandoned => Self::new(ErrorKind::Abandoned),
        }
    }
}

/// A specialized Result type for dispatchkit operations.
pub type Result<T> = core::result::Result<T, Error>;
