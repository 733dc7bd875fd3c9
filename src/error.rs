/*!
 * Error types for the migration engine
 */

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CopeerError>;

/// Crate-wide error type. Variants map onto the three propagation tiers:
/// fatal (aborts the session before any worker starts), per-job (caught
/// inside a worker, logged, never aborts the session), and session-level
/// (cancellation).
#[derive(Debug, Error)]
pub enum CopeerError {
    /// Fatal: missing mount points, unreadable configuration, no suitable
    /// volume at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Fatal: manifest unreadable or empty.
    #[error("input error: {0}")]
    Input(String),

    /// Per-job: no volume can satisfy a job's size even in fallback.
    #[error("no destination volume has {required} bytes free (threshold-suitable)")]
    NoSpace { required: u64 },

    /// Per-job: a file referenced by the job does not exist at execution time.
    #[error("source missing: {0}")]
    SourceMissing(PathBuf),

    /// Per-job: the external copy tool returned a non-cancellation non-zero exit.
    #[error("copy failed: {0}")]
    CopyFailed(String),

    /// Per-job: tar write error; the partial artifact has been removed.
    #[error("archive failed: {0}")]
    ArchiveFailed(String),

    /// Session-level: external interrupt.
    #[error("cancelled by operator")]
    Cancelled,

    /// Pass-through I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CopeerError {
    /// Fatal errors abort the session before any worker starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CopeerError::Config(_) | CopeerError::Input(_))
    }

    /// Session-level cancellation, as opposed to a per-job failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CopeerError::Cancelled)
    }

    /// The CLI exit code this error implies when it surfaces at the top level.
    pub fn exit_code(&self) -> i32 {
        if self.is_cancellation() {
            130
        } else if self.is_fatal() {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CopeerError::Config("x".into()).is_fatal());
        assert!(CopeerError::Input("x".into()).is_fatal());
        assert!(!CopeerError::NoSpace { required: 1 }.is_fatal());
        assert!(!CopeerError::SourceMissing(PathBuf::from("/x")).is_fatal());
        assert!(!CopeerError::Cancelled.is_fatal());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CopeerError::Config("x".into()).exit_code(), 1);
        assert_eq!(CopeerError::Cancelled.exit_code(), 130);
        assert_eq!(CopeerError::NoSpace { required: 1 }.exit_code(), 0);
    }
}
