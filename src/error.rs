use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// PostgreSQL SQLSTATE codes for serialization failure, deadlock and lock timeout.
const PG_CONTENTION_CODES: &[&str] = &["40001", "40P01", "55P03"];

/// SQLite primary and extended result codes for BUSY and LOCKED.
const SQLITE_CONTENTION_CODES: &[&str] = &["5", "6", "262", "517"];

/// Errors returned by the nested-set APIs.
#[derive(Debug, Error)]
pub enum NestedSetError {
    #[error("nested-set supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    #[error("cannot move node into itself or one of its descendants")]
    CyclicMove,

    #[error("node {0} not found in scope")]
    NotFound(String),

    #[error("node {0} belongs to a different scope")]
    ScopeMismatch(String),

    #[error("lock contention while mutating the tree: {0}")]
    Contention(String),

    #[error("model has no soft-delete column configured")]
    SoftDeleteUnsupported,

    #[error("invalid subtree height {0}; heights are even and at least 2")]
    InvalidHeight(i64),

    #[error("database error: {0}")]
    Database(DbErr),

    #[error("sqlx error: {0}")]
    Sqlx(sqlx::Error),

    #[error("nested-set invariant violation: {0}")]
    Invariant(String),
}

pub type Result<T, E = NestedSetError> = std::result::Result<T, E>;

impl NestedSetError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub(crate) fn not_found(key: &impl std::fmt::Debug) -> Self {
        Self::NotFound(format!("{key:?}"))
    }

    pub(crate) fn scope_mismatch(key: &impl std::fmt::Debug) -> Self {
        Self::ScopeMismatch(format!("{key:?}"))
    }

    /// Whether the whole operation can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl From<DbErr> for NestedSetError {
    fn from(err: DbErr) -> Self {
        let sqlx_err = match &err {
            DbErr::Conn(RuntimeErr::SqlxError(inner))
            | DbErr::Exec(RuntimeErr::SqlxError(inner))
            | DbErr::Query(RuntimeErr::SqlxError(inner)) => Some(inner),
            _ => None,
        };

        match sqlx_err {
            Some(inner) if is_contention(inner) => Self::Contention(inner.to_string()),
            _ => Self::Database(err),
        }
    }
}

impl From<sqlx::Error> for NestedSetError {
    fn from(err: sqlx::Error) -> Self {
        if is_contention(&err) {
            Self::Contention(err.to_string())
        } else {
            Self::Sqlx(err)
        }
    }
}

fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            PG_CONTENTION_CODES.contains(&code.as_ref())
                || SQLITE_CONTENTION_CODES.contains(&code.as_ref())
        }),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}
