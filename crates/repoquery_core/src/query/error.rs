//! Error taxonomy of the query engine.
//!
//! - [`ResolutionError`]: raised on first use of a method; cached with the
//!   descriptor slot, so later calls observe the same failure.
//! - [`BindError`]: per invocation, caller's fault.
//! - [`QueryError`]: umbrella returned by repository methods, also carrying
//!   `TooManyResults`, store failures and row-mapping failures.

use crate::db::DbError;
use crate::query::method::ParamType;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    UnknownProperty {
        entity: String,
        property: String,
    },
    AmbiguousOrInvalid {
        method: String,
        reason: String,
    },
    MissingCountQueryForNativePagination {
        method: String,
    },
}

impl ResolutionError {
    pub(crate) fn invalid(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AmbiguousOrInvalid {
            method: method.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_property(entity: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity: entity.into(),
            property: property.into(),
        }
    }
}

impl Display for ResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProperty { entity, property } => {
                write!(f, "no property `{property}` found on entity `{entity}`")
            }
            Self::AmbiguousOrInvalid { method, reason } => {
                write!(f, "cannot resolve query method `{method}`: {reason}")
            }
            Self::MissingCountQueryForNativePagination { method } => write!(
                f,
                "native paginated query `{method}` requires an explicit count query"
            ),
        }
    }
}

impl Error for ResolutionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    ArityMismatch {
        expected: usize,
        actual: usize,
    },
    TypeMismatch {
        index: usize,
        expected: ParamType,
        actual: &'static str,
    },
    InvalidPageSize,
    /// Page and slice methods need a page request at invocation time.
    MissingPageRequest,
    UnknownSortProperty(String),
}

impl Display for BindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArityMismatch { expected, actual } => {
                write!(f, "expected {expected} query arguments, got {actual}")
            }
            Self::TypeMismatch {
                index,
                expected,
                actual,
            } => write!(
                f,
                "argument {index} has type {actual}, expected {expected}"
            ),
            Self::InvalidPageSize => write!(f, "page size must be greater than zero"),
            Self::MissingPageRequest => write!(f, "paginated query invoked without a page request"),
            Self::UnknownSortProperty(property) => {
                write!(f, "cannot sort by unknown property `{property}`")
            }
        }
    }
}

impl Error for BindError {}

#[derive(Debug)]
pub enum QueryError {
    Resolution(ResolutionError),
    Bind(BindError),
    TooManyResults { method: String, count: usize },
    /// A pessimistic lock was requested outside a transaction.
    TransactionRequired { method: String },
    Db(DbError),
    /// A result row could not be mapped into the declared shape.
    InvalidData(String),
}

impl QueryError {
    /// Lock-wait timeouts are retryable at transaction level by the caller.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_lock_timeout())
    }
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolution(err) => write!(f, "{err}"),
            Self::Bind(err) => write!(f, "{err}"),
            Self::TooManyResults { method, count } => write!(
                f,
                "query `{method}` expected at most one row, found {count}"
            ),
            Self::TransactionRequired { method } => write!(
                f,
                "query `{method}` takes a pessimistic lock and must run inside a transaction"
            ),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid result data: {message}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resolution(err) => Some(err),
            Self::Bind(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::TooManyResults { .. } | Self::TransactionRequired { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<ResolutionError> for QueryError {
    fn from(value: ResolutionError) -> Self {
        Self::Resolution(value)
    }
}

impl From<BindError> for QueryError {
    fn from(value: BindError) -> Self {
        Self::Bind(value)
    }
}

impl From<DbError> for QueryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}
