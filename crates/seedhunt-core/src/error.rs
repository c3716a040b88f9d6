//! Error taxonomy
//!
//! Recoverable failures (transient I/O, submission retries, corrupt state
//! documents) stay inside their component: they are logged and the component
//! carries on. Only the fatal variants propagate to the runner, which tears
//! the pipeline down and exits non-zero.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuntError {
    /// Misconfigured input; reported before any work begins.
    #[error("invalid configuration: {0}")]
    Usage(String),

    /// Approximate-scorer construction failed. Fatal only when the user
    /// mandated that backend; otherwise the runner falls back to CPU.
    #[error("backend init failed: {0}")]
    BackendInit(String),

    /// Failure during a running approximate-scorer job. The manager logs,
    /// sets the stop flag and drains.
    #[error("backend runtime failure: {0}")]
    BackendRuntime(String),

    /// Required state file exists but cannot be used.
    #[error("unreadable state: {0}")]
    UnreadableState(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl HuntError {
    /// Whether this error must abort the run regardless of context.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HuntError::Usage(_) | HuntError::UnreadableState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(HuntError::Usage("bad threads".into()).is_fatal());
        assert!(HuntError::UnreadableState("seed state".into()).is_fatal());
        assert!(!HuntError::BackendInit("no device".into()).is_fatal());
        assert!(!HuntError::BackendRuntime("lost device".into()).is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let err: HuntError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(!err.is_fatal());
    }
}
