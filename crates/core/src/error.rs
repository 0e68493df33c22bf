//! Error types for the Weft runtime.

use crate::ids::{ListenerId, SubjectId};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Result type alias for Weft operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for Weft operations.
#[derive(Debug)]
pub enum Error {
    /// An engine operation was invoked outside an atomic scope.
    Inactive {
        operation: &'static str,
    },
    /// A tracked write was attempted during the read-only observer phase.
    ReadOnly {
        subject: SubjectId,
    },
    /// Two or more listeners mutually invalidate each other's reads
    /// within one pass.
    Circularity {
        participants: Vec<String>,
    },
    /// A scoped manager's exit hook failed during cleanup.
    ManagerExit {
        message: String,
    },
    /// Internal scheduling signal: the write that produced it invalidated
    /// the read of a listener that already ran this pass. Rules must
    /// propagate it unchanged; the recalc loop consumes it.
    Inverted {
        reader: ListenerId,
    },
    /// The atomic scope was aborted by user code.
    Aborted {
        message: String,
    },
    /// Invalid operation.
    InvalidOperation {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Inactive { operation } => {
                write!(f, "{} requires an active atomic scope", operation)
            }
            Error::ReadOnly { subject } => {
                write!(f, "cannot modify {} during the read-only phase", subject)
            }
            Error::Circularity { participants } => {
                write!(f, "circular write/read conflict between ")?;
                for (i, p) in participants.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                Ok(())
            }
            Error::ManagerExit { message } => {
                write!(f, "manager exit failed: {}", message)
            }
            Error::Inverted { reader } => {
                write!(f, "order inversion against {}", reader)
            }
            Error::Aborted { message } => {
                write!(f, "atomic scope aborted: {}", message)
            }
            Error::InvalidOperation { message } => {
                write!(f, "invalid operation: {}", message)
            }
        }
    }
}

impl Error {
    /// Creates an inactive-use error for the named operation.
    pub fn inactive(operation: &'static str) -> Self {
        Error::Inactive { operation }
    }

    /// Creates a read-only violation error.
    pub fn read_only(subject: SubjectId) -> Self {
        Error::ReadOnly { subject }
    }

    /// Creates a circularity error naming the participating listeners.
    pub fn circularity(participants: Vec<String>) -> Self {
        Error::Circularity { participants }
    }

    /// Creates a manager exit failure.
    pub fn manager_exit(message: impl Into<String>) -> Self {
        Error::ManagerExit {
            message: message.into(),
        }
    }

    /// Creates an abort error carrying a user message.
    pub fn aborted(message: impl Into<String>) -> Self {
        Error::Aborted {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for the internal inversion signal.
    #[inline]
    pub fn is_inverted(&self) -> bool {
        matches!(self, Error::Inverted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn test_error_display() {
        let err = Error::inactive("changed");
        assert!(err.to_string().contains("changed"));

        let err = Error::read_only(SubjectId(4));
        assert!(err.to_string().contains("subject#4"));

        let err = Error::circularity(vec!["a".to_string(), "b".to_string()]);
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_error_constructors() {
        let err = Error::aborted("boom");
        match err {
            Error::Aborted { message } => assert_eq!(message, "boom"),
            _ => panic!("Wrong error type"),
        }

        assert!(Error::Inverted { reader: ListenerId(1) }.is_inverted());
        assert!(!Error::aborted("x").is_inverted());
    }
}
