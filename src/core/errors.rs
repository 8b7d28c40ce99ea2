use crate::fanout::request::RequestTarget;
use crate::lineage::TaskId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by request collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the entire Skein library
#[derive(Debug, Error)]
pub enum SkeinError {
    /// A dispatched request failed inside its task
    #[error("Request failed in task {task_id}{target}: {source}")]
    Request {
        task_id: TaskId,
        target: RequestTarget,
        #[source]
        source: BoxError,
    },

    /// A spawned task panicked
    #[error("Task {task_id} panicked: {message}")]
    Panicked { task_id: TaskId, message: String },

    /// A spawned task was aborted before completing
    #[error("Task {task_id} was aborted")]
    Aborted { task_id: TaskId },

    /// A dispatched request did not finish before the join deadline
    #[error(transparent)]
    Timeout(#[from] RequestTimeout),

    /// CPU offload worker errors
    #[error("CPU offload failed: {message}")]
    Offload {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl SkeinError {
    /// Wrap a failure raised by a request so it survives the task boundary
    pub fn request<E: Into<BoxError>>(task_id: TaskId, target: RequestTarget, source: E) -> Self {
        Self::Request {
            task_id,
            target,
            source: source.into(),
        }
    }

    pub fn panicked<S: Into<String>>(task_id: TaskId, message: S) -> Self {
        Self::Panicked {
            task_id,
            message: message.into(),
        }
    }

    pub fn aborted(task_id: TaskId) -> Self {
        Self::Aborted { task_id }
    }

    /// Create an offload error
    pub fn offload<S: Into<String>>(message: S) -> Self {
        Self::Offload {
            message: message.into(),
            source: None,
        }
    }

    /// Create an offload error with source
    pub fn offload_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Offload {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// The task the error originated in, when known
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Request { task_id, .. }
            | Self::Panicked { task_id, .. }
            | Self::Aborted { task_id } => Some(*task_id),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Panicked { .. } => "panic",
            Self::Aborted { .. } => "aborted",
            Self::Timeout(_) => "timeout",
            Self::Offload { .. } => "offload",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SkeinError>;

impl From<serde_json::Error> for SkeinError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: format!("invalid json: {}", err),
            field: None,
        }
    }
}

impl From<serde_yaml::Error> for SkeinError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: format!("invalid yaml: {}", err),
            field: None,
        }
    }
}

impl From<anyhow::Error> for SkeinError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

/// A request that was still running when its join deadline elapsed.
///
/// Every field is best-effort: the rendering only mentions what the request
/// was able to report about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTimeout {
    pub target: RequestTarget,
    pub timeout: Option<Duration>,
}

impl RequestTimeout {
    pub fn new(target: RequestTarget, timeout: Option<Duration>) -> Self {
        Self { target, timeout }
    }
}

impl fmt::Display for RequestTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request timed out")?;
        if let Some(operation) = &self.target.operation {
            write!(f, " executing {}", operation)?;
        }
        if let Some(service) = &self.target.service {
            write!(f, " on {}", service)?;
        }
        if let Some(endpoint) = self.target.endpoint() {
            write!(f, " ({})", endpoint)?;
        }
        if let Some(timeout) = self.timeout {
            write!(f, " after {}s", timeout.as_secs_f64())?;
        }
        Ok(())
    }
}

impl std::error::Error for RequestTimeout {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_request_error_keeps_source() {
        let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = SkeinError::request(TaskId::ROOT, RequestTarget::default(), cause);

        assert_eq!(err.category(), "request");
        assert_eq!(err.task_id(), Some(TaskId::ROOT));
        let source = std::error::Error::source(&err).expect("source");
        let io_err = source.downcast_ref::<io::Error>().expect("io error");
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_timeout_rendering_full() {
        let target = RequestTarget::new()
            .with_endpoint("10.0.0.1", 8080)
            .with_service("users")
            .with_operation("get_user");
        let timeout = RequestTimeout::new(target, Some(Duration::from_millis(2500)));

        assert_eq!(
            timeout.to_string(),
            "request timed out executing get_user on users (10.0.0.1:8080) after 2.5s"
        );
    }

    #[test]
    fn test_timeout_rendering_partial() {
        assert_eq!(RequestTimeout::default().to_string(), "request timed out");

        let target = RequestTarget::new().with_service("billing");
        let timeout = RequestTimeout::new(target, None);
        assert_eq!(timeout.to_string(), "request timed out on billing");
    }

    #[test]
    fn test_timeout_is_not_a_request_failure() {
        let err: SkeinError = RequestTimeout::default().into();
        assert!(err.is_timeout());
        assert_eq!(err.category(), "timeout");
        assert_eq!(err.task_id(), None);
    }
}
