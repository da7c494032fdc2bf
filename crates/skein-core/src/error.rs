//! Fatal error taxonomy
//!
//! Recoverable inference problems are not errors: they are recorded as
//! [`crate::diagnostics::Diagnostic`]s and the run continues. Everything in
//! [`SkeinError`] stops the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a compilation run.
#[derive(Debug, Error)]
pub enum SkeinError {
    /// Invalid invocation, detected before any analysis starts.
    #[error("usage error: {0}")]
    Usage(String),

    /// A source module is missing, unreadable or does not parse.
    #[error("cannot load module '{module}' ({}): {reason}", path.display())]
    Load {
        module: String,
        path: PathBuf,
        reason: String,
    },

    /// The engine broke one of its own invariants. This is a defect in the
    /// engine, never a problem with the analyzed program.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SkeinError {
    pub fn load(module: impl Into<String>, path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SkeinError::Load {
            module: module.into(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// True when the error indicates an engine bug rather than bad input.
    pub fn is_defect(&self) -> bool {
        matches!(self, SkeinError::InternalInvariant(_))
    }
}

pub type Result<T> = std::result::Result<T, SkeinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_message() {
        let err = SkeinError::load("foo", "/tmp/foo.py", "no such file");
        assert_eq!(
            err.to_string(),
            "cannot load module 'foo' (/tmp/foo.py): no such file"
        );
        assert!(!err.is_defect());
    }

    #[test]
    fn test_invariant_is_defect() {
        let err = SkeinError::InternalInvariant("typeset shrank".into());
        assert!(err.is_defect());
        assert_eq!(err.exit_code(), 1);
    }
}
