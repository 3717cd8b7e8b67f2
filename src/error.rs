use ledger::StoreError;
use std::fmt::Display;

/// Failures surfaced by the engine.
///
/// Everything except `StoreUnavailable` and `Invariant` is a business-rule
/// violation: the caller did something the rules forbid, and nothing was
/// written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NotFound(String),
    InvalidState(String),
    Forbidden(String),
    Conflict(String),
    Validation(String),
    /// Transient infrastructure failure that outlasted the retry budget.
    StoreUnavailable(String),
    /// A contract the engine relies on was broken (e.g. a requester record
    /// vanished). The operation was aborted without writing.
    Invariant(String),
}

impl Error {
    pub fn is_business(&self) -> bool {
        !matches!(self, Error::StoreUnavailable(_) | Error::Invariant(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidState(_) => "invalid_state",
            Error::Forbidden(_) => "forbidden",
            Error::Conflict(_) => "conflict",
            Error::Validation(_) => "validation_error",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Invariant(_) => "internal_error",
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(what) => write!(f, "Not found: {}", what),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Error::Invariant(msg) => write!(f, "Invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        if err.is_transient() || err.is_version_conflict() {
            Error::StoreUnavailable(err.to_string())
        } else {
            Error::Invariant(err.to_string())
        }
    }
}
