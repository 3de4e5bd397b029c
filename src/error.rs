//! Error types for the korus engine

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// One positioned problem found while compiling an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Human readable description of the problem
    pub message: String,
    /// Byte offset into the expression source
    pub offset: usize,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.offset)
    }
}

/// A list of compile issues with a joined display form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IssueList(pub Vec<Issue>);

impl fmt::Display for IssueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Comprehensive error types for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Group definition failed validation (naming, shape, reserved words)
    #[error("validation error: {0}")]
    Validation(String),

    /// Type shorthand could not be transformed into a structural schema
    #[error("schema error: {0}")]
    Schema(String),

    /// Expression failed to compile
    #[error("failed to compile expression {expression:?}: {issues}")]
    ExpressionCompile {
        expression: String,
        issues: IssueList,
    },

    /// Expression failed to evaluate. `missing` is set when the failure was
    /// an absent field or binding rather than a type fault; readiness checks
    /// treat that as "not yet".
    #[error("failed to evaluate expression {expression:?}: {message}")]
    ExpressionEval {
        expression: String,
        message: String,
        missing: bool,
    },

    /// Adding an edge would close a cycle in the dependency graph
    #[error("cycle introduced by edge {from} -> {to}: {}", .path.join(" -> "))]
    Cycle {
        from: String,
        to: String,
        path: Vec<String>,
    },

    /// Emulation of a resource from its schema failed
    #[error("emulation error: {0}")]
    Emulation(String),

    /// Object store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Schema registry operation failed
    #[error("registry error: {0}")]
    Registry(String),

    /// Build-time failure in the graph construction stage
    #[error("graph error: {0}")]
    Graph(#[source] Box<Error>),

    /// Build-time failure while publishing the composite CRD
    #[error("custom resource definition error: {0}")]
    Crd(#[source] Box<Error>),

    /// Failure while registering or starting the per-group reconciler
    #[error("micro controller error: {0}")]
    MicroController(#[source] Box<Error>),

    /// Benign terminal outcome: log the item and forget it
    #[error("no requeue: {reason}")]
    NoRequeue { reason: String },

    /// The item must be re-added to the queue without rate limiting
    #[error("requeue needed: {reason}")]
    RequeueNeeded { reason: String },

    /// The item must be re-added to the queue after a delay
    #[error("requeue needed after {delay:?}: {reason}")]
    RequeueNeededAfter { reason: String, delay: Duration },

    /// Referenced resource does not exist
    #[error("resource not found")]
    ResourceNotFound,

    /// Expression references an identifier outside `spec` and the sibling ids
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The dependency graph contains a cycle
    #[error("cyclic reference")]
    CyclicReference,

    /// A resource references itself
    #[error("self reference: {0}")]
    SelfReference(String),

    /// Controller infrastructure failure (sync timeout, shutdown, registration)
    #[error("controller error: {0}")]
    Controller(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a build failure as a graph-stage error.
    pub fn graph(err: Error) -> Self {
        Error::Graph(Box::new(err))
    }

    /// Wrap a build failure as a CRD-publish-stage error.
    pub fn crd(err: Error) -> Self {
        Error::Crd(Box::new(err))
    }

    /// Wrap a build failure as a reconciler-registration-stage error.
    pub fn micro_controller(err: Error) -> Self {
        Error::MicroController(Box::new(err))
    }

    /// Signal that the current item should be re-queued without rate limiting.
    pub fn requeue(reason: impl Into<String>) -> Self {
        Error::RequeueNeeded {
            reason: reason.into(),
        }
    }

    /// Signal that the current item should be re-queued after `delay`.
    pub fn requeue_after(reason: impl Into<String>, delay: Duration) -> Self {
        Error::RequeueNeededAfter {
            reason: reason.into(),
            delay,
        }
    }

    /// True for the typed requeue signals (not failures for status purposes).
    pub fn is_requeue(&self) -> bool {
        matches!(
            self,
            Error::RequeueNeeded { .. } | Error::RequeueNeededAfter { .. }
        )
    }

    /// True when the error ultimately means "object is gone".
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound => true,
            Error::Store(err) => err.is_not_found(),
            _ => false,
        }
    }
}

/// Errors surfaced by the object store collaborator
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested object does not exist
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    /// The object already exists
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },

    /// Write conflicted with a concurrent update
    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        kind: String,
        key: String,
        message: String,
    },

    /// The payload could not be decoded
    #[error("malformed object: {0}")]
    Malformed(String),

    /// Transport or backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, key: impl fmt::Display) -> Self {
        StoreError::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_classification() {
        assert!(Error::requeue("child created").is_requeue());
        assert!(Error::requeue_after("not ready", Duration::from_secs(5)).is_requeue());
        assert!(!Error::Validation("bad id".to_string()).is_requeue());
        assert!(!Error::NoRequeue {
            reason: "terminal".to_string()
        }
        .is_requeue());
    }

    #[test]
    fn test_not_found_classification() {
        let err = Error::Store(StoreError::not_found("Vpc", "default/my-vpc"));
        assert!(err.is_not_found());
        assert!(Error::ResourceNotFound.is_not_found());
        assert!(!Error::Internal("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_cycle_display_lists_path() {
        let err = Error::Cycle {
            from: "role1".to_string(),
            to: "role2".to_string(),
            path: vec![
                "role1".to_string(),
                "role2".to_string(),
                "role1".to_string(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("role1 -> role2 -> role1"));
    }
}
