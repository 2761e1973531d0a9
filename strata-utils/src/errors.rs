//! Centralized error handling. Every pass, the scheduler, and the emitter
//! return a [StrataResult]; the pipeline stops on the first error.

/// Convenience alias for results that carry a strata [Error].
pub type StrataResult<T> = Result<T, Error>;

/// The kinds of failures the middle-end can surface. Each kind has a
/// constructor on [Error]; the kind is public so hosts and tests can match
/// on the failure class.
#[derive(Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input handed to a pass: type mismatch, broken invariant,
    /// unknown name. Programmer error on the caller's side.
    Precondition(String),
    /// The scheduling constraints cannot all hold. The first field names
    /// the offending constraint class (e.g. "bounds", "timing", "io").
    Infeasible(String, String),
    /// The LP backend could not be initialized.
    SolverUnavailable(String),
    /// The LP relaxation returned a non-integral optimum. Should not occur
    /// for a totally unimodular constraint matrix; treated as internal.
    NonIntegerSolution(String),
    /// The emitter encountered a construct not representable in the target
    /// dialect.
    Unsupported(String),
    /// Miscellaneous error.
    Misc(String),
}

/// Standard error type for this library.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn precondition<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::Precondition(msg.to_string())),
        }
    }

    pub fn infeasible<C: ToString, S: ToString>(class: C, msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::Infeasible(
                class.to_string(),
                msg.to_string(),
            )),
        }
    }

    pub fn solver_unavailable<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::SolverUnavailable(msg.to_string())),
        }
    }

    pub fn non_integer_solution<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::NonIntegerSolution(msg.to_string())),
        }
    }

    pub fn unsupported<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::Unsupported(msg.to_string())),
        }
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::Misc(msg.to_string())),
        }
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Infeasible(..))
    }

    pub fn is_precondition(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Precondition(..))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Unsupported(..))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &*self.kind {
            ErrorKind::Precondition(msg) => {
                write!(f, "Precondition violation: {}", msg)
            }
            ErrorKind::Infeasible(class, msg) => {
                write!(f, "Infeasible schedule ({}): {}", class, msg)
            }
            ErrorKind::SolverUnavailable(msg) => {
                write!(f, "LP solver unavailable: {}", msg)
            }
            ErrorKind::NonIntegerSolution(msg) => {
                write!(f, "Internal: non-integer LP solution: {}", msg)
            }
            ErrorKind::Unsupported(msg) => {
                write!(f, "Unsupported construct: {}", msg)
            }
            ErrorKind::Misc(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Error::misc(format!("write failed: {}", err))
    }
}
