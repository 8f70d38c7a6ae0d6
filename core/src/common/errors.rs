use crate::dispatcher::CallId;
use crate::utils::env::EnvVarError;
use std::fmt;
use thiserror::Error;

/// Why a worker pool or timer refused to accept a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// The executor's queue is full.
    Saturated,
    /// The executor has been shut down.
    Shutdown,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Saturated => write!(f, "executor saturated"),
            RejectionReason::Shutdown => write!(f, "executor shut down"),
        }
    }
}

/// Errors raised by the call dispatcher.
///
/// [`Rejected`] is an expected failure and reaches the unit of work through its
/// rejection path. [`NotRunning`] signals a broken slot accounting contract: a
/// unit tried to give back a concurrency slot it does not hold.
///
/// [`Rejected`]: DispatchError::Rejected
/// [`NotRunning`]: DispatchError::NotRunning
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The worker pool or the timer refused the work.
    #[error("Execution rejected: {reason}")]
    Rejected { reason: RejectionReason },

    /// The call is neither running nor paused, so it has no slot to release.
    #[error("Call {id} does not hold a dispatcher slot")]
    NotRunning { id: CallId },

    /// Concurrency limits must allow at least one running call.
    #[error("Max concurrency must be at least 1, got {requested}")]
    InvalidConcurrency { requested: usize },
}

/// Network-level failures reported by a [`Transport`](crate::transport::Transport).
///
/// These are recoverable: they travel up the chain through the normal
/// completion path and a retry policy may act on them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// HTTP client initialization failed.
    #[error("HTTP client creation failed: {reason}")]
    ClientCreation { reason: String },

    /// The request could not be sent or its response could not be read.
    #[error("Request failed: {url} - {reason}")]
    RequestFailed { url: String, reason: String },

    /// The request exceeded the transport's timeout.
    #[error("Request timeout after {millis}ms: {url}")]
    Timeout { url: String, millis: u128 },

    /// The request could not be built (bad URL, bad header value, ...).
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

/// Errors delivered through a pipeline run.
///
/// The variants fall into two groups:
///
/// ## Expected failures
/// Delivered through `completed_error` and recoverable by policies.
/// - [`Transport`] - network I/O failure
/// - [`Rejected`] - the call (or a delayed resumption of it) never ran
/// - [`Cancelled`] - the cancellation token fired before the work started
/// - [`Policy`] - a policy decided to fail the request
///
/// ## Defects
/// Raised when a policy or transport breaks the chain contract. They are
/// logged at error level and never retried.
/// - [`Escaped`] - a policy returned an error or panicked instead of
///   completing its link; wraps the error that escaped
/// - [`Panicked`] - policy code panicked (seen as the source of an escape)
/// - [`AlreadyCompleted`] - a link was completed twice
/// - [`InvalidState`] - a chain operation was called out of order
/// - [`Dispatch`] - slot accounting was violated
///
/// A response with a 4xx/5xx status is not an error at this layer; callers
/// and policies interpret status codes themselves.
///
/// # Examples
///
/// ```no_run
/// use azcore::PipelineError;
///
/// fn describe(error: &PipelineError) -> &'static str {
///     match error {
///         PipelineError::Rejected { .. } => "never ran",
///         PipelineError::Transport(_) => "ran and failed",
///         error if error.is_defect() => "pipeline bug",
///         _ => "failed",
///     }
/// }
/// ```
///
/// [`Transport`]: PipelineError::Transport
/// [`Rejected`]: PipelineError::Rejected
/// [`Cancelled`]: PipelineError::Cancelled
/// [`Policy`]: PipelineError::Policy
/// [`Escaped`]: PipelineError::Escaped
/// [`Panicked`]: PipelineError::Panicked
/// [`AlreadyCompleted`]: PipelineError::AlreadyCompleted
/// [`InvalidState`]: PipelineError::InvalidState
/// [`Dispatch`]: PipelineError::Dispatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The worker pool or timer refused the work, so the call never ran.
    #[error("Call was not executed: {reason}")]
    Rejected { reason: RejectionReason },

    #[error("Request was cancelled")]
    Cancelled,

    /// A policy failed the request through the normal completion path.
    #[error("Policy failure: {0}")]
    Policy(String),

    /// A policy bypassed the completion contract. `source` is what escaped.
    #[error("Error escaped policy {policy}: {source}")]
    Escaped {
        policy: usize,
        source: Box<PipelineError>,
    },

    /// Policy or interceptor code panicked.
    #[error("Policy code panicked: {0}")]
    Panicked(String),

    #[error("Policy {policy} completed its link more than once")]
    AlreadyCompleted { policy: usize },

    #[error("Policy {policy} cannot {operation} while its link is {state}")]
    InvalidState {
        policy: usize,
        state: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Dispatch(DispatchError),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::Policy`].
    pub fn policy(message: impl Into<String>) -> Self {
        PipelineError::Policy(message.into())
    }

    /// Whether this error signals a bug in a policy or transport rather than
    /// an operational failure.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            PipelineError::Escaped { .. }
                | PipelineError::Panicked(_)
                | PipelineError::AlreadyCompleted { .. }
                | PipelineError::InvalidState { .. }
                | PipelineError::Dispatch(_)
        )
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, PipelineError::Rejected { .. })
    }
}

impl From<DispatchError> for PipelineError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Rejected { reason } => PipelineError::Rejected { reason },
            other => PipelineError::Dispatch(other),
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error(transparent)]
    Env(#[from] EnvVarError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to start {component}: {source}")]
    Startup {
        component: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline has no transport configured")]
    MissingTransport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_dispatch_error_maps_to_rejected_kind() {
        let error: PipelineError = DispatchError::Rejected {
            reason: RejectionReason::Saturated,
        }
        .into();

        assert!(error.is_rejected());
        assert!(!error.is_defect());
    }

    #[test]
    fn test_slot_errors_are_defects() {
        let error: PipelineError = DispatchError::NotRunning { id: CallId::next() }.into();
        assert!(error.is_defect());
        assert!(PipelineError::AlreadyCompleted { policy: 2 }.is_defect());
        assert!(!PipelineError::Cancelled.is_defect());
    }

    #[test]
    fn test_escaped_error_keeps_its_source() {
        let error = PipelineError::Escaped {
            policy: 1,
            source: Box::new(PipelineError::policy("quota exceeded")),
        };

        assert!(error.is_defect());
        assert_eq!(
            error.to_string(),
            "Error escaped policy 1: Policy failure: quota exceeded"
        );
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Policy failure: quota exceeded"));
    }
}
